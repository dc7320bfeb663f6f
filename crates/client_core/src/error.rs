use thiserror::Error;

/// Everything that can go wrong between a user intent and an applied page of
/// results. Errors never escape the controller into presentation code; they
/// are folded into the view model as an error flag plus a readable message.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Client-side form or argument validation; raised before any network
    /// traffic is issued.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport-level failure (connection refused, timeout, DNS).
    #[error("network failure: {0}")]
    Network(String),

    /// Non-2xx response from the catalog service.
    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },

    /// 401/403, or an expired/missing bearer token.
    #[error("authentication required")]
    AuthRequired,

    /// The response body did not match the documented envelope shape.
    #[error("malformed catalog response: {0}")]
    Decode(String),
}

impl CatalogError {
    pub fn is_auth(&self) -> bool {
        matches!(self, CatalogError::AuthRequired)
    }
}
