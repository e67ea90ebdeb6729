use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use flotg_db::StorageError;
use flotg_queue::{Fault, QueueError, SubmitError};
use flotg_types::api::ErrorBody;

/// Everything a query call can fail with, as seen by the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not ready: queue")]
    NotReady,

    #[error("queue is busy, try again")]
    Busy,

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage read operation failed on backend")]
    Storage(#[source] StorageError),

    #[error(transparent)]
    Fault(#[from] Fault),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotReady | Self::Busy | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Storage(_) | Self::Fault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidContainerName(name) => Self::BadRequest(format!("invalid source uid {:?}", name)),
            other => Self::Storage(other),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::TimedOut(_) | SubmitError::Queue(QueueError::Full) => Self::Busy,
            SubmitError::Cancelled => Self::ShuttingDown,
            SubmitError::Queue(_) => Self::NotReady,
            SubmitError::Fault(fault) => Self::Fault(fault),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn submit_failures_map_to_retryable_statuses() {
        let busy = ApiError::from(SubmitError::TimedOut(Duration::from_secs(5)));
        assert!(matches!(busy, ApiError::Busy));
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let stopped = ApiError::from(SubmitError::Queue(QueueError::Stopped));
        assert!(matches!(stopped, ApiError::NotReady));

        let fault = ApiError::from(SubmitError::Fault(Fault::new("ReadSources")));
        assert_eq!(fault.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(fault.to_string(), "panic (details hidden): ReadSources");
    }

    #[test]
    fn storage_details_stay_on_the_server() {
        let err = ApiError::from(StorageError::Poisoned);
        assert_eq!(err.to_string(), "storage read operation failed on backend");

        let err = ApiError::from(StorageError::InvalidContainerName("a b".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
