use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::any::Any;
use std::fmt;
use thiserror::Error;

pub const UNAUTHORIZED_DETAIL: &str = "Invalid API Key";
pub const UNHANDLED_DETAIL: &str = "An unexpected error occurred. Please try again later.";

/// The two calls made into the research engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchStep {
    Research,
    Report,
}

impl fmt::Display for ResearchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResearchStep::Research => write!(f, "research"),
            ResearchStep::Report => write!(f, "report writing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid API Key")]
    Unauthorized,

    #[error("Error during {step}")]
    Upstream {
        step: ResearchStep,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Unhandled(#[from] anyhow::Error),
}

impl RelayError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RelayError::InvalidInput(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::Upstream { .. } | RelayError::Unhandled(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Text shown to clients. Server-side failures never leak their cause.
    pub fn detail(&self) -> String {
        match self {
            RelayError::InvalidInput(message) => message.clone(),
            RelayError::Unauthorized => UNAUTHORIZED_DETAIL.to_string(),
            RelayError::Upstream { .. } | RelayError::Unhandled(_) => UNHANDLED_DETAIL.to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Unhandled error while serving request");
        }
        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}
