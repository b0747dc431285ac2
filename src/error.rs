use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use sqlx::migrate::MigrateError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum VaultDbError {
    #[error("client closed")]
    Closed,

    #[error("caller context cancelled")]
    Cancelled,

    #[error("caller deadline exceeded")]
    DeadlineExceeded,

    #[error("secret not found at path: {0}")]
    SecretNotFound(String),

    #[error("secret lease denied for path: {0}")]
    LeaseDenied(String),

    #[error("secret store returned status {status} for path: {path}")]
    SecretStoreStatus { path: String, status: u16 },

    #[error("secret at {path} is missing field `{field}`")]
    MissingSecretField { path: String, field: &'static str },

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("driver not registered: {0}")]
    UnknownDriver(String),

    #[error("driver `{driver}` cannot open a `{scheme}` connection string")]
    DriverMismatch { driver: String, scheme: String },

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("Migration error: {0}")]
    Migrate(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultDbError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            VaultDbError::Reqwest(e) => e.is_timeout() || e.is_connect(),
            VaultDbError::SecretStoreStatus { status, .. } => *status >= 500,
            VaultDbError::Database(e) => is_transient_sqlx(e),
            VaultDbError::Migrate(MigrateError::Execute(e)) => is_transient_sqlx(e),
            VaultDbError::Io(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(e: &SqlxError) -> bool {
    matches!(e, SqlxError::Io(_) | SqlxError::PoolTimedOut)
}

impl From<figment::Error> for VaultDbError {
    fn from(e: figment::Error) -> Self {
        VaultDbError::Config(Box::new(e))
    }
}

impl IntoResponse for VaultDbError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            VaultDbError::Closed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CLIENT_CLOSED",
                "The database client has been shut down.",
            ),
            VaultDbError::Cancelled | VaultDbError::DeadlineExceeded => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                "Timed out waiting for a database connection.",
            ),
            VaultDbError::SecretNotFound(_)
            | VaultDbError::LeaseDenied(_)
            | VaultDbError::SecretStoreStatus { .. }
            | VaultDbError::MissingSecretField { .. }
            | VaultDbError::Reqwest(_)
            | VaultDbError::Json(_) => (
                StatusCode::BAD_GATEWAY,
                "SECRET_STORE",
                "Database credentials are unavailable.",
            ),
            VaultDbError::Database(_) | VaultDbError::Migrate(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_UNAVAILABLE",
                "The database is unreachable.",
            ),
            VaultDbError::UnknownDriver(_)
            | VaultDbError::DriverMismatch { .. }
            | VaultDbError::UrlParse(_)
            | VaultDbError::Config(_)
            | VaultDbError::InvalidConfig(_)
            | VaultDbError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.",
            ),
        };
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
