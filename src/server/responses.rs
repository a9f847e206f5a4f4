use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::auth::AuthError;
use crate::error::WebhookError;

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    status_code: u16,
    error: &'static str,
    message: String,
}

/// Handler-level error. Maps the crate taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub WebhookError);

impl<E> From<E> for ApiError
where
    E: Into<WebhookError>,
{
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(WebhookError::InvalidRequest(message.into()))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            WebhookError::Conflict(_) | WebhookError::InvalidState(_) => StatusCode::CONFLICT,
            WebhookError::NotFound(_) => StatusCode::NOT_FOUND,
            WebhookError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            WebhookError::DeliveryFailure(_) | WebhookError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            WebhookError::Conflict(m)
            | WebhookError::NotFound(m)
            | WebhookError::InvalidState(m)
            | WebhookError::InvalidRequest(m) => m.clone(),
            WebhookError::Unauthorized(reason) => reason.to_string(),
            WebhookError::DeliveryFailure(_) | WebhookError::Storage(_) => {
                "internal error".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error"),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Value of a header the request must carry.
pub fn required_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_error_statuses() {
        let cases = [
            (WebhookError::Conflict("x".into()), StatusCode::CONFLICT),
            (WebhookError::InvalidState("x".into()), StatusCode::CONFLICT),
            (WebhookError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AuthError::NonceReused.into(), StatusCode::UNAUTHORIZED),
            (WebhookError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (WebhookError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_are_not_echoed() {
        let err = ApiError(WebhookError::Storage("lock poisoned at 0xdead".into()));
        assert_eq!(err.message(), "internal error");
    }

    #[test]
    fn test_required_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Nonce", HeaderValue::from_static("abc"));
        headers.insert("X-Timestamp", HeaderValue::from_static(""));

        assert_eq!(required_header(&headers, "X-Nonce"), Ok("abc"));
        assert_eq!(
            required_header(&headers, "X-Timestamp"),
            Err(AuthError::MissingHeader("X-Timestamp"))
        );
        assert_eq!(
            required_header(&headers, "X-API-Key"),
            Err(AuthError::MissingHeader("X-API-Key"))
        );
    }
}
