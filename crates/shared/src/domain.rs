use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(BookId);
id_newtype!(CategoryId);
id_newtype!(SubcategoryId);
id_newtype!(NewsEventId);

/// Sort key accepted by the catalog search endpoint. `Year` maps to the
/// backend's `publicationYear` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Relevance,
    #[serde(rename = "publicationYear")]
    Year,
    Id,
}

impl SortField {
    pub fn as_param(self) -> &'static str {
        match self {
            SortField::Relevance => "relevance",
            SortField::Year => "publicationYear",
            SortField::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_param(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    /// Lowercase form used by the Spring-style `sort=field,dir` parameter.
    pub fn as_sort_suffix(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}
