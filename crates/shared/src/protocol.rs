use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BookId, CategoryId, NewsEventId, SortDirection, SortField, SubcategoryId};

/// Full description of one desired page of results: filters, sort and the
/// page window. Values are immutable; intents build a new spec and hand it to
/// the controller. Structural equality doubles as the in-flight
/// de-duplication key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpec {
    pub keyword: String,
    pub category_id: Option<CategoryId>,
    pub subcategory_id: Option<SubcategoryId>,
    /// Named pass-through filters, e.g. `publicationYear` for books or
    /// `startDate`/`endDate` for news. Ordered so the digest is stable.
    pub extra_filters: BTreeMap<String, String>,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub page: u32,
    pub page_size: u32,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            keyword: String::new(),
            category_id: None,
            subcategory_id: None,
            extra_filters: BTreeMap::new(),
            sort_field: SortField::Year,
            sort_direction: SortDirection::Desc,
            page: 0,
            page_size: 12,
        }
    }
}

impl QuerySpec {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Structural hash used to recognise a duplicate of an in-flight request.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Clamp a requested page index into `[0, max(total_pages, 1))`.
pub fn clamp_page(total_pages: u32, requested: u32) -> u32 {
    requested.min(total_pages.saturating_sub(1))
}

/// One page of entities plus pagination metadata, as serialised by the
/// backend's Spring-style page envelope (`content`, `number`, `size`,
/// `totalPages`, `totalElements`). All fields are required: a response
/// missing any of them is a shape mismatch, not a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(rename = "number")]
    pub page: u32,
    pub size: u32,
    pub total_pages: u32,
    pub total_elements: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub book_id: BookId,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub subcategory_id: Option<SubcategoryId>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsEvent {
    pub id: NewsEventId,
    pub title: String,
    pub content: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub image: Option<String>,
}

/// File selected for upload alongside a multipart mutation (book thumbnail,
/// news image, import spreadsheet).
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Client-side shape of a book create/update form. Validated before any
/// network traffic is issued.
#[derive(Debug, Clone)]
pub struct BookDraft {
    pub title: String,
    pub author: String,
    pub publisher: String,
    pub publication_year: i32,
    pub isbn: String,
    pub description: String,
    pub file_path: String,
    pub subcategory_id: SubcategoryId,
    pub thumbnail: Option<FileUpload>,
}

#[derive(Debug, Clone)]
pub struct NewsEventDraft {
    pub title: String,
    pub content: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub image: Option<FileUpload>,
}

/// Outcome summary of a spreadsheet bulk import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    #[serde(default)]
    pub imported: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub message: Option<String>,
}
