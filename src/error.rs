//! Error types for proxy operations

use thiserror::Error;

/// Errors that can occur while proxying spreadsheet tabs
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Private key could not be parsed
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Request is missing a tab, an id, or carries a malformed body
    #[error("{0}")]
    BadRequest(String),

    /// Tab has no column literally named "id"
    #[error("Tab \"{0}\" has no \"id\" column")]
    MissingIdColumn(String),

    /// Credentials only allow reads
    #[error("API-key credentials are read-only; cannot modify tab \"{0}\"")]
    ReadOnly(String),

    #[error("Sheet \"{0}\" not found")]
    TabNotFound(String),

    #[error("Row not found")]
    RowNotFound,

    #[error("Project \"{0}\" not found")]
    ProjectNotFound(String),

    /// Located row no longer holds the expected id
    #[error("Row {row} of \"{tab}\" changed before it could be modified")]
    Conflict { tab: String, row: usize },

    /// Record rejected by the tab schema
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Token endpoint rejected the assertion
    #[error("Token exchange failed ({status}): {message}")]
    TokenExchange { status: u16, message: String },

    /// Spreadsheet API returned an error
    #[error("Sheets request failed ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// A sheetdesk proxy answered with an error status
    #[error("Proxy answered {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Upstream answered 2xx with an unexpected body
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// HTTP status code reported to proxy callers
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::BadRequest(_) | ProxyError::MissingIdColumn(_) => 400,
            ProxyError::ReadOnly(_) => 403,
            ProxyError::TabNotFound(_)
            | ProxyError::RowNotFound
            | ProxyError::ProjectNotFound(_) => 404,
            ProxyError::Conflict { .. } => 409,
            ProxyError::Validation(_) => 422,
            ProxyError::Upstream { status, .. } if *status >= 500 => *status,
            ProxyError::Rejected { status, .. } => *status,
            ProxyError::TokenExchange { .. }
            | ProxyError::Upstream { .. }
            | ProxyError::MalformedResponse(_)
            | ProxyError::Http(_)
            | ProxyError::Json(_) => 502,
            ProxyError::Config(_) | ProxyError::InvalidKey(_) | ProxyError::Io(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }
}

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;
