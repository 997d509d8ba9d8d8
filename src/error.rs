//! Error taxonomy for taskport.
//!
//! Each stage owns one error kind. Kinds are carried to the caller as-is:
//! a rejected token stays an `AuthError`, a 404 stays an `ApiError`, and so on.
//! Error messages MUST NOT contain the API token or the passphrase.

use std::fmt;
use std::path::PathBuf;

/// Vault and token errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Authentication tag mismatch or structurally broken vault record.
    /// Does not say which of the two happened.
    #[error("invalid passphrase or corrupt vault")]
    InvalidPassphraseOrCorrupt,

    /// The service answered 401 for the stored token.
    #[error("API token was rejected by the service")]
    TokenRejected,

    #[error("token and passphrase must not be empty")]
    EmptySecret,

    #[error("vault format version {0} is not supported")]
    UnsupportedVault(u32),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Stable machine-readable code attached to every `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    BadRequest,
    Forbidden,
    NotFound,
    Unprocessable,
    RateLimited,
    ServerError,
    RetriesExhausted,
    MalformedResponse,
    Unexpected,
}

impl ApiErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Unprocessable => "unprocessable",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::RetriesExhausted => "retries_exhausted",
            Self::MalformedResponse => "malformed_response",
            Self::Unexpected => "unexpected",
        }
    }

    /// Code for a non-retryable HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            422 => Self::Unprocessable,
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::Unexpected,
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-retryable rejection from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status, if a response was received at all
    pub status: Option<u16>,
    pub code: ApiErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Option<u16>, code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), ApiErrorCode::from_status(status), message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(None, ApiErrorCode::MalformedResponse, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "API error {} [{}]: {}", status, self.code, self.message),
            None => write!(f, "API error [{}]: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

/// What a fetch from the service can surface to its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("operation cancelled")]
    Cancelled,
}

/// Settings file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    Missing { path: PathBuf },

    #[error("config file {} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    /// Rejected by validation before anything was written.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A value that cannot be represented in the chosen output format.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported output extension: {0}")]
    UnsupportedExtension(String),

    #[error("row {row}, column '{column}': {reason}")]
    Unrepresentable {
        row: usize,
        column: String,
        reason: String,
    },

    #[error("workbook error: {0}")]
    Workbook(String),
}

/// Export failures. Either way no file is left at the output path.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Umbrella error for callers driving the whole pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(e) => Error::Auth(e),
            FetchError::Api(e) => Error::Api(e),
            FetchError::Cancelled => Error::Cancelled,
        }
    }
}
