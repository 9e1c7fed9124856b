//! The error taxonomy every recoverable failure in the pipeline flows
//! through. A single flat kind enum plus a context map replaces the deep
//! class hierarchies providers and stores tend to grow.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Classified failure kinds. Retryability and HTTP status live here as
/// methods so callers never branch on anything but the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    // Validation
    InputInvalid,
    SchemaMismatch,
    RequiredField,

    // Resource
    NotFound,
    AlreadyExists,
    Exhausted,

    // Auth
    AuthenticationFailed,
    AuthorizationDenied,
    TokenInvalid,

    // Storage
    QueryFailed,
    StorageConnectionFailed,
    DuplicateKey,
    ForeignKeyViolation,
    TransactionFailed,

    // Filesystem
    FileNotFound,
    PermissionDenied,
    DiskFull,
    ReadFailed,
    WriteFailed,

    // Network
    ConnectionFailed,
    Timeout,
    DnsFailed,

    // Provider
    ProviderRateLimit,
    ProviderServerError,
    ProviderUnavailable,
    ProviderInvalidResponse,

    // Permanent
    Configuration,
    NotImplemented,
    InvalidState,
}

impl ErrorKind {
    /// Whether the built-in retry rule considers this kind transient.
    ///
    /// `ProviderServerError` is only retryable when the recorded HTTP status
    /// is >= 500; that refinement lives on [`CoreError::is_retryable`] since
    /// the status travels in the error context.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::QueryFailed
                | ErrorKind::StorageConnectionFailed
                | ErrorKind::WriteFailed
                | ErrorKind::ConnectionFailed
                | ErrorKind::Timeout
                | ErrorKind::DnsFailed
                | ErrorKind::ProviderRateLimit
                | ErrorKind::ProviderServerError
                | ErrorKind::ProviderUnavailable
        )
    }

    /// HTTP status code surfaced to API callers.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InputInvalid | ErrorKind::SchemaMismatch | ErrorKind::RequiredField => 400,
            ErrorKind::AuthenticationFailed | ErrorKind::TokenInvalid => 401,
            ErrorKind::AuthorizationDenied => 403,
            ErrorKind::NotFound | ErrorKind::FileNotFound => 404,
            ErrorKind::AlreadyExists | ErrorKind::DuplicateKey => 409,
            ErrorKind::ProviderRateLimit | ErrorKind::Exhausted => 429,
            ErrorKind::NotImplemented => 501,
            _ => 500,
        }
    }

    /// Programmer errors are logged loudly and surfaced as opaque 500s.
    pub fn is_operational(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Configuration | ErrorKind::NotImplemented | ErrorKind::InvalidState
        )
    }

    /// Stable machine-readable code used in API bodies and job rows.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "input-invalid",
            ErrorKind::SchemaMismatch => "schema-mismatch",
            ErrorKind::RequiredField => "required-field",
            ErrorKind::NotFound => "not-found",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::AuthenticationFailed => "authentication-failed",
            ErrorKind::AuthorizationDenied => "authorization-denied",
            ErrorKind::TokenInvalid => "token-invalid",
            ErrorKind::QueryFailed => "query-failed",
            ErrorKind::StorageConnectionFailed => "storage-connection-failed",
            ErrorKind::DuplicateKey => "duplicate-key",
            ErrorKind::ForeignKeyViolation => "fk-violation",
            ErrorKind::TransactionFailed => "transaction-failed",
            ErrorKind::FileNotFound => "file-not-found",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::DiskFull => "disk-full",
            ErrorKind::ReadFailed => "read-failed",
            ErrorKind::WriteFailed => "write-failed",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DnsFailed => "dns-failed",
            ErrorKind::ProviderRateLimit => "provider-rate-limit",
            ErrorKind::ProviderServerError => "provider-server-error",
            ErrorKind::ProviderUnavailable => "provider-unavailable",
            ErrorKind::ProviderInvalidResponse => "provider-invalid-response",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotImplemented => "not-implemented",
            ErrorKind::InvalidState => "invalid-state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The tagged error value carried through the whole pipeline.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    /// Free-form key/value context: entity ids, operation, provider, etc.
    pub context: BTreeMap<String, String>,
    /// Back-off hint supplied by rate-limiting upstreams.
    pub retry_after: Option<Duration>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            retry_after: None,
            source: None,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The built-in retry rule, refined by context where the kind alone is
    /// not enough: provider server errors only retry for status >= 500.
    pub fn is_retryable(&self) -> bool {
        if self.kind == ErrorKind::ProviderServerError {
            return self
                .context
                .get("status")
                .and_then(|status| status.parse::<u16>().ok())
                .map(|status| status >= 500)
                .unwrap_or(true);
        }
        self.kind.is_retryable()
    }

    // Shorthand constructors for the kinds that appear all over the codebase.

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InputInvalid, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryFailed, message)
    }

    pub fn provider_rate_limit(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(ErrorKind::ProviderRateLimit, message).with_retry_after(retry_after)
    }

    pub fn provider_server(message: impl Into<String>, status: u16) -> Self {
        Self::new(ErrorKind::ProviderServerError, message).with_context("status", status)
    }

    pub fn provider_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderInvalidResponse, message)
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ErrorKind::StorageConnectionFailed
            }
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => ErrorKind::DuplicateKey,
                sqlx::error::ErrorKind::ForeignKeyViolation => ErrorKind::ForeignKeyViolation,
                _ => ErrorKind::QueryFailed,
            },
            _ => ErrorKind::QueryFailed,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::StorageFull => ErrorKind::DiskFull,
            _ => ErrorKind::WriteFailed,
        };
        Self::new(kind, err.to_string()).with_source(err)
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::ConnectionFailed
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                ErrorKind::ProviderRateLimit
            } else if status.is_server_error() {
                ErrorKind::ProviderServerError
            } else {
                ErrorKind::ProviderInvalidResponse
            }
        } else {
            ErrorKind::ConnectionFailed
        };
        let mut out = Self::new(kind, err.to_string());
        if let Some(status) = err.status() {
            out = out.with_context("status", status.as_u16());
        }
        out.with_source(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::SchemaMismatch, err.to_string()).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_the_kind_table() {
        assert!(ErrorKind::ConnectionFailed.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::DnsFailed.is_retryable());
        assert!(ErrorKind::WriteFailed.is_retryable());
        assert!(ErrorKind::QueryFailed.is_retryable());
        assert!(ErrorKind::ProviderRateLimit.is_retryable());

        assert!(!ErrorKind::InputInvalid.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::DuplicateKey.is_retryable());
        assert!(!ErrorKind::ForeignKeyViolation.is_retryable());
        assert!(!ErrorKind::ReadFailed.is_retryable());
        assert!(!ErrorKind::ProviderInvalidResponse.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
    }

    #[test]
    fn provider_server_error_retries_only_at_or_above_500() {
        assert!(CoreError::provider_server("bad gateway", 502).is_retryable());
        assert!(!CoreError::provider_server("teapot", 418).is_retryable());
        // No recorded status: assume transient.
        assert!(CoreError::new(ErrorKind::ProviderServerError, "unknown").is_retryable());
    }

    #[test]
    fn status_codes_match_the_taxonomy() {
        assert_eq!(ErrorKind::InputInvalid.status_code(), 400);
        assert_eq!(ErrorKind::AuthenticationFailed.status_code(), 401);
        assert_eq!(ErrorKind::AuthorizationDenied.status_code(), 403);
        assert_eq!(ErrorKind::NotFound.status_code(), 404);
        assert_eq!(ErrorKind::AlreadyExists.status_code(), 409);
        assert_eq!(ErrorKind::ProviderRateLimit.status_code(), 429);
        assert_eq!(ErrorKind::NotImplemented.status_code(), 501);
        assert_eq!(ErrorKind::InvalidState.status_code(), 500);
    }

    #[test]
    fn rate_limit_carries_its_hint() {
        let err = CoreError::provider_rate_limit("slow down", Duration::from_secs(60));
        assert_eq!(err.retry_after, Some(Duration::from_secs(60)));
        assert!(err.is_retryable());
    }

    #[test]
    fn non_operational_kinds_are_flagged() {
        assert!(!ErrorKind::InvalidState.is_operational());
        assert!(!ErrorKind::Configuration.is_operational());
        assert!(ErrorKind::Timeout.is_operational());
    }
}
