use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use snowcast::Error;

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Snowcast(Error),
    UnknownSession(String),
    BadRequest(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Snowcast(e) => match e {
                Error::InvalidMaxLogicalNodeCount(_)
                | Error::InvalidBackupCount(_)
                | Error::InvalidName
                | Error::DegenerateLayout { .. }
                | Error::InsufficientReplicas { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT")
                }
                Error::UnknownSequencer(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SEQUENCER"),
                Error::ConfigurationConflict { .. } => {
                    (StatusCode::CONFLICT, "CONFIGURATION_CONFLICT")
                }
                Error::CapacityExhausted { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "CAPACITY_EXHAUSTED")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
            Self::UnknownSession(_) => (StatusCode::NOT_FOUND, "UNKNOWN_SESSION"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.parts();
        let error = match self {
            Self::Snowcast(e) => e.to_string(),
            Self::UnknownSession(session) => format!("unknown session '{session}'"),
            Self::BadRequest(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(code, "{error}");
        }

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.into(),
            }),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Snowcast(e)
    }
}
