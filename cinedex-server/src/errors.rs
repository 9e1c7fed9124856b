//! Maps core error kinds onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use cinedex_core::CoreError;

/// Wrapper giving [`CoreError`] an HTTP rendering. Non-operational kinds
/// (programmer errors) are logged and surfaced as opaque 500s.
#[derive(Debug)]
pub struct ApiError {
    inner: CoreError,
    dev_mode: bool,
}

impl ApiError {
    pub fn new(inner: CoreError, dev_mode: bool) -> Self {
        Self { inner, dev_mode }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.inner.kind.status_code();
        let status = StatusCode::from_u16(status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if self.inner.kind.is_operational() {
            self.inner.message.clone()
        } else {
            error!(kind = %self.inner.kind, error = %self.inner, "non-operational error");
            "internal server error".to_string()
        };

        let mut body = json!({
            "error": {
                "message": message,
                "status": status_code,
                "code": self.inner.kind.code(),
            }
        });
        if self.dev_mode {
            body["error"]["context"] = json!(self.inner.context);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinedex_core::ErrorKind;

    #[test]
    fn statuses_follow_the_kind_mapping() {
        for (kind, expected) in [
            (ErrorKind::InputInvalid, 400),
            (ErrorKind::AuthenticationFailed, 401),
            (ErrorKind::NotFound, 404),
            (ErrorKind::AlreadyExists, 409),
            (ErrorKind::ProviderRateLimit, 429),
            (ErrorKind::NotImplemented, 501),
            (ErrorKind::QueryFailed, 500),
        ] {
            let response =
                ApiError::new(CoreError::new(kind, "boom"), false).into_response();
            assert_eq!(response.status().as_u16(), expected, "{kind:?}");
        }
    }
}
