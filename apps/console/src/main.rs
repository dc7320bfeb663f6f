use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    CredentialStore, HttpCatalogClient, NoCredentials, PageSource, PagedQueryController,
    StaticBearerToken,
};
use shared::{
    domain::{CategoryId, SortDirection, SortField, SubcategoryId},
    protocol::{BookSummary, NewsEvent, QuerySpec},
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(about = "Query the digital-library catalog from the terminal")]
struct Args {
    #[arg(long, default_value = "http://localhost:8080")]
    server_url: String,
    /// Bearer token for endpoints behind the admin dashboard.
    #[arg(long)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the book catalog.
    Books {
        #[arg(long, default_value = "")]
        keyword: String,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        subcategory: Option<i64>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 12)]
        size: u32,
        #[arg(long, value_enum, default_value_t = Direction::Desc)]
        direction: Direction,
    },
    /// List news and events.
    News {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
    /// Show the unpaginated latest news/events feed.
    Latest,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Direction {
    Asc,
    Desc,
}

impl From<Direction> for SortDirection {
    fn from(value: Direction) -> Self {
        match value {
            Direction::Asc => SortDirection::Asc,
            Direction::Desc => SortDirection::Desc,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let credentials: Arc<dyn CredentialStore> = match args.token {
        Some(token) => Arc::new(StaticBearerToken::new(token)),
        None => Arc::new(NoCredentials),
    };
    let client = Arc::new(HttpCatalogClient::with_credentials(
        &args.server_url,
        credentials,
    )?);

    match args.command {
        Command::Books {
            keyword,
            category,
            subcategory,
            year,
            page,
            size,
            direction,
        } => {
            let mut spec = QuerySpec::default().with_page(page).with_page_size(size);
            spec.keyword = keyword;
            spec.category_id = category.map(CategoryId);
            spec.subcategory_id = subcategory.map(SubcategoryId);
            spec.sort_field = SortField::Year;
            spec.sort_direction = direction.into();
            if let Some(year) = year {
                spec.extra_filters
                    .insert("publicationYear".to_string(), year.to_string());
            }

            let source: Arc<dyn PageSource<BookSummary>> = client.clone();
            let view = run_query(source, spec).await?;
            for book in view {
                let year = book
                    .publication_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "#{} {} by {} ({}, {})",
                    book.book_id.0,
                    book.title,
                    book.author,
                    book.publisher.as_deref().unwrap_or("-"),
                    year
                );
            }
        }
        Command::News {
            search,
            start_date,
            end_date,
            page,
            size,
        } => {
            let mut spec = QuerySpec::default().with_page(page).with_page_size(size);
            spec.keyword = search;
            if let Some(start_date) = start_date {
                spec.extra_filters.insert("startDate".to_string(), start_date);
            }
            if let Some(end_date) = end_date {
                spec.extra_filters.insert("endDate".to_string(), end_date);
            }

            let source: Arc<dyn PageSource<NewsEvent>> = client.clone();
            let view = run_query(source, spec).await?;
            for event in view {
                print_event(&event);
            }
        }
        Command::Latest => {
            for event in client.latest_news_events().await? {
                print_event(&event);
            }
        }
    }

    Ok(())
}

fn print_event(event: &NewsEvent) {
    println!(
        "#{} {} ({} .. {})",
        event.id.0,
        event.title,
        event.start_time.format("%Y-%m-%d %H:%M"),
        event.end_time.format("%Y-%m-%d %H:%M")
    );
}

/// Drive one controller round-trip: issue the query, wait for the loading
/// flag to clear, and hand back the items.
async fn run_query<T: Clone + Send + 'static>(
    source: Arc<dyn PageSource<T>>,
    spec: QuerySpec,
) -> Result<Vec<T>> {
    let controller = PagedQueryController::new(source, spec);
    let mut changes = controller.subscribe_changes();
    controller.refresh().await;

    loop {
        let view = controller.view_model().await;
        if view.is_error {
            let reason = view.error.unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("catalog query failed: {reason}");
        }
        if !view.is_loading {
            debug!(
                page = view.page,
                total_pages = view.total_pages,
                "query settled"
            );
            println!(
                "page {}/{}: {} result(s)",
                view.page + 1,
                view.total_pages.max(1),
                view.total_elements
            );
            return Ok(view.items);
        }
        if changes.recv().await.is_err() {
            anyhow::bail!("controller closed while a query was in flight");
        }
    }
}
