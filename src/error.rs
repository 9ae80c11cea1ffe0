use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Rejected caller input: unparseable dates/instants or schedule fields
/// that break the rules of their own repeat mode / rule type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid instant {0:?}, expected YYYY-MM-DDTHH:MM")]
    InvalidInstant(String),
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("invalid weekday index {0}, expected 0..=6")]
    InvalidWeekday(u8),
    #[error("invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("{0} required")]
    Missing(&'static str),
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("schedule not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        match self {
            StoreError::Validation(e) => e.into_response(),
            StoreError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            StoreError::Io(_) | StoreError::Json(_) | StoreError::Join(_) => {
                error!(error = %self, "schedule store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "schedule store unavailable").into_response()
            }
        }
    }
}
