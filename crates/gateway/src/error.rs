//! Gateway error type: the `error_kind` taxonomy projected onto HTTP.
//!
//! Every handler error renders as `{error_kind, message, retry_after?}`
//! plus optional detail fields (e.g. the existing `task_id` on a
//! duplicate submission).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use guru_domain::error::ErrorKind;
use guru_registry::RegistryError;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retry_after: Option<u64>,
    /// Extra top-level fields merged into the error body.
    pub detail: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            detail: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownTask, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::UnknownTask => StatusCode::NOT_FOUND,
            ErrorKind::StateConflict | ErrorKind::DuplicateInflight => StatusCode::CONFLICT,
            ErrorKind::Backpressure
            | ErrorKind::CircuitOpen
            | ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::Cancelled => StatusCode::GONE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let mut body = json!({
            "error_kind": self.kind,
            "message": self.message,
        });
        if let Some(retry_after) = self.retry_after {
            body["retry_after"] = json!(retry_after);
        }
        if let Some(serde_json::Value::Object(extra)) = self.detail {
            if let Some(obj) = body.as_object_mut() {
                for (k, v) in extra {
                    obj.insert(k, v);
                }
            }
        }
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let mut err = ApiError::new(e.kind(), e.to_string());
        if let RegistryError::DuplicateInflight { existing } = e {
            err = err.with_detail(json!({ "task_id": existing }));
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::invalid_input("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::unknown("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::new(ErrorKind::Backpressure, "x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::new(ErrorKind::DuplicateInflight, "x").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::new(ErrorKind::UpstreamUnavailable, "x").status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn duplicate_detail_carries_task_id() {
        let existing = uuid::Uuid::new_v4();
        let err: ApiError = RegistryError::DuplicateInflight { existing }.into();
        assert_eq!(err.kind, ErrorKind::DuplicateInflight);
        assert_eq!(
            err.detail.unwrap()["task_id"],
            json!(existing)
        );
    }
}
