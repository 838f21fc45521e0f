use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a failed API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Infrastructure or transport failure; callers may retry
    Server,
    /// Malformed call: missing parameter, unknown endpoint, invalid value
    Request,
    /// Declared authentication or permission fault
    Authentication,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Server => "ServerError",
            ErrorKind::Request => "RequestError",
            ErrorKind::Authentication => "AuthenticationError",
        };
        f.write_str(name)
    }
}

/// Every failure surfaced by `Context::invoke`.
///
/// The family is discriminated by [`ErrorKind`], so callers that don't care
/// which kind occurred can match on the struct alone.
#[derive(Error, Debug)]
#[error("{kind} {code}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    code: i64,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            code,
            message: message.trim_end_matches('.').to_string(),
            source: None,
        }
    }

    pub fn server(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, code, message)
    }

    pub fn request(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Request, code, message)
    }

    pub fn authentication(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, code, message)
    }

    /// Build an error for a code declared by the API in an `<error>` element
    pub fn from_api_code(code: i64, message: impl Into<String>) -> Self {
        Self::new(classify_api_code(code), code, message)
    }

    /// Build an error for a non-success HTTP status
    pub fn from_http_status(status: u16, path: &str, reason: &str) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Authentication,
            400..=499 => ErrorKind::Request,
            _ => ErrorKind::Server,
        };
        Self::new(
            kind,
            i64::from(status),
            format!("'{}' request failed ({})", path, reason),
        )
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_server(&self) -> bool {
        self.kind == ErrorKind::Server
    }

    pub fn is_request(&self) -> bool {
        self.kind == ErrorKind::Request
    }

    pub fn is_authentication(&self) -> bool {
        self.kind == ErrorKind::Authentication
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ApiError::from_http_status(
                status.as_u16(),
                err.url().map(|u| u.path()).unwrap_or_default(),
                status.canonical_reason().unwrap_or("Unknown"),
            )
            .with_source(err),
            None => ApiError::server(0, format!("HTTP transport error: {}", err)).with_source(err),
        }
    }
}

impl From<roxmltree::Error> for ApiError {
    fn from(err: roxmltree::Error) -> Self {
        ApiError::server(0, format!("Malformed XML document: {}", err)).with_source(err)
    }
}

fn classify_api_code(code: i64) -> ErrorKind {
    match code {
        100..=199 => ErrorKind::Request,
        200..=299 | 401 | 403 => ErrorKind::Authentication,
        400..=499 => ErrorKind::Request,
        _ => ErrorKind::Server,
    }
}

/// Cache-specific error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache read error: {key} - {details}")]
    Read { key: String, details: String },

    #[error("Cache write error: {key} - {details}")]
    Write { key: String, details: String },

    #[error("Cache delete error: {key} - {details}")]
    Delete { key: String, details: String },

    #[error("Cache metadata error: {key} - {details}")]
    Serialization { key: String, details: String },

    #[error("Cache directory not usable: {path}")]
    Directory { path: PathBuf },
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Invalid endpoint URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Rowset algebra failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowsetError {
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Unknown column: {column}")]
    UnknownColumn { column: String },
}

/// Result type alias for API calls
pub type Result<T> = std::result::Result<T, ApiError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Rowset result type alias
pub type RowsetResult<T> = std::result::Result<T, RowsetError>;
