//! Client-side core for the digital-library frontend: a typed HTTP client
//! for the catalog REST API and the paginated query controller shared by
//! every list view (admin book manager, guest research catalog, news/events
//! manager).
//!
//! The controller is the only stateful piece. Presentation code feeds it
//! intents (`set_filter`, `set_sort`, `set_page`, `refresh`) and reads back
//! a [`controller::ListViewModel`]; request tokens guarantee that responses
//! arriving out of order can never surface a superseded query's results.

pub mod catalog;
pub mod controller;
pub mod error;

pub use catalog::{
    validate_book_draft, validate_news_event_draft, CredentialStore, HttpCatalogClient,
    NoCredentials, StaticBearerToken,
};
pub use controller::{FilterPatch, ListViewModel, PageSource, PagedQueryController, QueryStatus};
pub use error::CatalogError;

#[cfg(test)]
mod tests;
