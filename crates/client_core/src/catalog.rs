use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, SecondsFormat, Utc};
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{BookId, NewsEventId},
    error::{ApiError, ErrorCode},
    protocol::{
        BookDraft, BookSummary, FileUpload, ImportSummary, NewsEvent, NewsEventDraft, Page,
        QuerySpec,
    },
};
use tracing::{debug, info};
use url::Url;

use crate::{controller::PageSource, error::CatalogError};

const MIN_PUBLICATION_YEAR: i32 = 1900;

/// Side-channel holder for the admin bearer token. The storage mechanism
/// (cookie jar, keyring, env) is the embedder's concern; the client only
/// asks for the current token at request time.
pub trait CredentialStore: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Default store for guest traffic: no token, public endpoints only.
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

pub struct StaticBearerToken(String);

impl StaticBearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialStore for StaticBearerToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// HTTP client for the library catalog's REST API. Cheap to clone behind an
/// `Arc`; one instance serves every list view and mutation form.
pub struct HttpCatalogClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, CatalogError> {
        Self::with_credentials(base_url, Arc::new(NoCredentials))
    }

    pub fn with_credentials(
        base_url: impl AsRef<str>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, CatalogError> {
        let parsed = Url::parse(base_url.as_ref())
            .map_err(|err| CatalogError::Validation(format!("invalid catalog base url: {err}")))?;
        Ok(Self {
            http: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = self.credentials.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(builder: RequestBuilder) -> Result<Response, CatalogError> {
        builder
            .send()
            .await
            .map_err(|err| CatalogError::Network(err.to_string()))
    }

    async fn read_error(response: Response) -> CatalogError {
        let status = response.status().as_u16();
        let body = response.json::<ApiError>().await.unwrap_or_else(|_| {
            ApiError::new(
                ErrorCode::from_status(status),
                format!("request failed with status {status}"),
            )
        });
        match body.code.unwrap_or_else(|| ErrorCode::from_status(status)) {
            ErrorCode::Unauthorized | ErrorCode::Forbidden => CatalogError::AuthRequired,
            _ => CatalogError::Server {
                status,
                message: body.message,
            },
        }
    }

    async fn expect_json<T: DeserializeOwned>(response: Response) -> Result<T, CatalogError> {
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CatalogError::Network(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| CatalogError::Decode(err.to_string()))
    }

    async fn expect_ok(response: Response) -> Result<(), CatalogError> {
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        Ok(())
    }

    pub async fn search_books(&self, spec: &QuerySpec) -> Result<Page<BookSummary>, CatalogError> {
        debug!(page = spec.page, keyword = %spec.keyword, "searching books");
        let response = Self::send(
            self.request(Method::GET, "/api/books")
                .query(&book_query_params(spec)),
        )
        .await?;
        Self::expect_json(response).await
    }

    pub async fn fetch_book(&self, book_id: BookId) -> Result<BookSummary, CatalogError> {
        let response =
            Self::send(self.request(Method::GET, &format!("/api/books/{}", book_id.0))).await?;
        Self::expect_json(response).await
    }

    pub async fn create_book(&self, draft: &BookDraft) -> Result<(), CatalogError> {
        validate_book_draft(draft)?;
        let response = Self::send(
            self.request(Method::POST, "/api/books")
                .multipart(book_form(draft)?),
        )
        .await?;
        Self::expect_ok(response).await?;
        info!(title = %draft.title, "book created");
        Ok(())
    }

    pub async fn update_book(&self, book_id: BookId, draft: &BookDraft) -> Result<(), CatalogError> {
        validate_book_draft(draft)?;
        let response = Self::send(
            self.request(Method::PUT, &format!("/api/books/{}", book_id.0))
                .multipart(book_form(draft)?),
        )
        .await?;
        Self::expect_ok(response).await?;
        info!(book_id = book_id.0, "book updated");
        Ok(())
    }

    pub async fn delete_book(&self, book_id: BookId) -> Result<(), CatalogError> {
        let response =
            Self::send(self.request(Method::DELETE, &format!("/api/books/{}", book_id.0))).await?;
        Self::expect_ok(response).await?;
        info!(book_id = book_id.0, "book deleted");
        Ok(())
    }

    /// Download the spreadsheet template used for bulk imports, as raw bytes.
    pub async fn download_import_template(&self) -> Result<Vec<u8>, CatalogError> {
        let response = Self::send(self.request(Method::GET, "/api/books/template")).await?;
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| CatalogError::Network(err.to_string()))
    }

    pub async fn import_books(&self, spreadsheet: FileUpload) -> Result<ImportSummary, CatalogError> {
        let form = multipart::Form::new().part("file", file_part(&spreadsheet)?);
        let response =
            Self::send(self.request(Method::POST, "/api/books/import").multipart(form)).await?;
        let summary: ImportSummary = Self::expect_json(response).await?;
        info!(
            imported = summary.imported,
            failed = summary.failed,
            "book import finished"
        );
        Ok(summary)
    }

    pub async fn search_news_events(
        &self,
        spec: &QuerySpec,
    ) -> Result<Page<NewsEvent>, CatalogError> {
        debug!(page = spec.page, search = %spec.keyword, "searching news/events");
        let response = Self::send(
            self.request(Method::GET, "/api/news-events")
                .query(&news_query_params(spec)),
        )
        .await?;
        Self::expect_json(response).await
    }

    pub async fn fetch_news_event(&self, id: NewsEventId) -> Result<NewsEvent, CatalogError> {
        let response =
            Self::send(self.request(Method::GET, &format!("/api/news-events/{}", id.0))).await?;
        Self::expect_json(response).await
    }

    pub async fn create_news_event(&self, draft: &NewsEventDraft) -> Result<(), CatalogError> {
        validate_news_event_draft(draft)?;
        let response = Self::send(
            self.request(Method::POST, "/api/news-events")
                .multipart(news_event_form(draft)?),
        )
        .await?;
        Self::expect_ok(response).await?;
        info!(title = %draft.title, "news/event created");
        Ok(())
    }

    pub async fn update_news_event(
        &self,
        id: NewsEventId,
        draft: &NewsEventDraft,
    ) -> Result<(), CatalogError> {
        validate_news_event_draft(draft)?;
        let response = Self::send(
            self.request(Method::PUT, &format!("/api/news-events/{}", id.0))
                .multipart(news_event_form(draft)?),
        )
        .await?;
        Self::expect_ok(response).await?;
        info!(news_event_id = id.0, "news/event updated");
        Ok(())
    }

    pub async fn delete_news_event(&self, id: NewsEventId) -> Result<(), CatalogError> {
        let response =
            Self::send(self.request(Method::DELETE, &format!("/api/news-events/{}", id.0))).await?;
        Self::expect_ok(response).await?;
        info!(news_event_id = id.0, "news/event deleted");
        Ok(())
    }

    /// Unpaginated convenience feed for the landing page; bypasses the
    /// controller entirely.
    pub async fn latest_news_events(&self) -> Result<Vec<NewsEvent>, CatalogError> {
        let response = Self::send(self.request(Method::GET, "/api/news-events/latest")).await?;
        Self::expect_json(response).await
    }
}

#[async_trait]
impl PageSource<BookSummary> for HttpCatalogClient {
    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page<BookSummary>, CatalogError> {
        self.search_books(spec).await
    }
}

#[async_trait]
impl PageSource<NewsEvent> for HttpCatalogClient {
    async fn fetch_page(&self, spec: &QuerySpec) -> Result<Page<NewsEvent>, CatalogError> {
        self.search_news_events(spec).await
    }
}

/// Book search parameters. Empty values are omitted rather than sent as
/// empty strings, matching what the backend expects.
fn book_query_params(spec: &QuerySpec) -> Vec<(String, String)> {
    let mut params = vec![
        ("page".to_string(), spec.page.to_string()),
        ("size".to_string(), spec.page_size.to_string()),
        ("sortBy".to_string(), spec.sort_field.as_param().to_string()),
        (
            "sortDirection".to_string(),
            spec.sort_direction.as_param().to_string(),
        ),
    ];
    if !spec.keyword.is_empty() {
        params.push(("keyword".to_string(), spec.keyword.clone()));
    }
    if let Some(category_id) = spec.category_id {
        params.push(("categoryId".to_string(), category_id.0.to_string()));
    }
    if let Some(subcategory_id) = spec.subcategory_id {
        params.push(("subcategoryId".to_string(), subcategory_id.0.to_string()));
    }
    for (name, value) in &spec.extra_filters {
        if !value.is_empty() {
            params.push((name.clone(), value.clone()));
        }
    }
    params
}

/// News/events parameters. The feed is always ordered by start time; only
/// the direction follows the spec. Free text travels as `search`, date
/// bounds as pass-through extra filters (`startDate`, `endDate`).
fn news_query_params(spec: &QuerySpec) -> Vec<(String, String)> {
    let mut params = vec![
        ("page".to_string(), spec.page.to_string()),
        ("size".to_string(), spec.page_size.to_string()),
        (
            "sort".to_string(),
            format!("startTime,{}", spec.sort_direction.as_sort_suffix()),
        ),
    ];
    if !spec.keyword.is_empty() {
        params.push(("search".to_string(), spec.keyword.clone()));
    }
    for (name, value) in &spec.extra_filters {
        if !value.is_empty() {
            params.push((name.clone(), value.clone()));
        }
    }
    params
}

pub fn validate_book_draft(draft: &BookDraft) -> Result<(), CatalogError> {
    if draft.title.trim().is_empty() {
        return Err(CatalogError::Validation("title is required".to_string()));
    }
    if draft.author.trim().is_empty() {
        return Err(CatalogError::Validation("author is required".to_string()));
    }
    let current_year = Utc::now().year();
    if draft.publication_year < MIN_PUBLICATION_YEAR || draft.publication_year > current_year {
        return Err(CatalogError::Validation(format!(
            "publication year must be between {MIN_PUBLICATION_YEAR} and {current_year}"
        )));
    }
    Ok(())
}

pub fn validate_news_event_draft(draft: &NewsEventDraft) -> Result<(), CatalogError> {
    if draft.title.trim().is_empty() {
        return Err(CatalogError::Validation("title is required".to_string()));
    }
    if draft.content.trim().is_empty() {
        return Err(CatalogError::Validation("content is required".to_string()));
    }
    if draft.end_time < draft.start_time {
        return Err(CatalogError::Validation(
            "end time must not precede start time".to_string(),
        ));
    }
    Ok(())
}

fn book_form(draft: &BookDraft) -> Result<multipart::Form, CatalogError> {
    let mut form = multipart::Form::new()
        .text("title", draft.title.clone())
        .text("author", draft.author.clone())
        .text("publisher", draft.publisher.clone())
        .text("publicationYear", draft.publication_year.to_string())
        .text("isbn", draft.isbn.clone())
        .text("description", draft.description.clone())
        .text("filePath", draft.file_path.clone())
        .text("subcategoryId", draft.subcategory_id.0.to_string());
    if let Some(thumbnail) = &draft.thumbnail {
        form = form.part("thumbnail", file_part(thumbnail)?);
    }
    Ok(form)
}

fn news_event_form(draft: &NewsEventDraft) -> Result<multipart::Form, CatalogError> {
    let mut form = multipart::Form::new()
        .text("title", draft.title.clone())
        .text(
            "startTime",
            draft.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .text(
            "endTime",
            draft.end_time.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .text("content", draft.content.clone());
    if let Some(image) = &draft.image {
        form = form.part("image", file_part(image)?);
    }
    Ok(form)
}

fn file_part(upload: &FileUpload) -> Result<multipart::Part, CatalogError> {
    let part = multipart::Part::bytes(upload.bytes.clone()).file_name(upload.filename.clone());
    match &upload.mime_type {
        Some(mime) => part
            .mime_str(mime)
            .map_err(|err| CatalogError::Validation(format!("invalid mime type {mime}: {err}"))),
        None => Ok(part),
    }
}
