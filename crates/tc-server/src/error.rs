//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`tc_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and get a JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::RequestId;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: tc_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: tc_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &tc_core::Error {
        &self.inner
    }
}

impl From<tc_core::Error> for AppError {
    fn from(e: tc_core::Error) -> Self {
        Self::new(e)
    }
}

/// Attach the current request id to a failed core result.
pub trait ForRequest<T> {
    fn for_request(self, request_id: &RequestId) -> Result<T, AppError>;
}

impl<T> ForRequest<T> for tc_core::Result<T> {
    fn for_request(self, request_id: &RequestId) -> Result<T, AppError> {
        self.map_err(|e| AppError::new(e).with_request_id(request_id.0.clone()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = self.inner.code(),
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, code = self.inner.code(), error = %self.inner, "Request rejected");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tc_core::Error;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(Error::not_found("preview", "abc"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_range_produces_400() {
        let response = AppError::new(Error::invalid_range("end before start")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn forbidden_produces_403() {
        let response = AppError::new(Error::Forbidden("other session".into())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn encode_timeout_produces_504() {
        let response = AppError::new(Error::EncodeTimeout {
            after: Duration::from_secs(5),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(Error::Internal("oops".into())).with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }

    #[test]
    fn for_request_tags_errors() {
        let rid = RequestId("req-9".into());
        let result: tc_core::Result<()> = Err(Error::Cancelled);
        let err = result.for_request(&rid).unwrap_err();
        assert_eq!(err.request_id.as_deref(), Some("req-9"));
        assert!(matches!(err.inner(), Error::Cancelled));
    }
}
