use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde_json::json;

/// Internal failure classes. These drive the HTTP status and the `type`
/// field of the OpenAI-compatible error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    AuthMissing,
    AuthFormat,
    AuthInvalid,
    AuthExpired,
    AuthBlocked,
    BudgetExceeded,
    ModelMissing,
    BodyTooLarge,
    NoCredentials,
    RateLimited,
    UpstreamTransport,
    UpstreamTimeout,
    UpstreamTooLarge,
    TranslationFailed,
    StreamAborted,
    ClientDisconnected,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct GatewayError {
    pub status: StatusCode,
    pub class: ErrorClass,
    pub message: String,
}

impl GatewayError {
    pub fn new(status: StatusCode, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            status,
            class,
            message: message.into(),
        }
    }

    pub fn auth_missing() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorClass::AuthMissing,
            "missing authorization header",
        )
    }

    pub fn auth_format() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorClass::AuthFormat,
            "authorization header must be 'Bearer <token>'",
        )
    }

    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorClass::AuthInvalid, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorClass::ModelMissing, message)
    }

    pub fn model_missing() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorClass::ModelMissing,
            "request body must carry a non-empty 'model'",
        )
    }

    pub fn body_too_large(limit_mb: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorClass::BodyTooLarge,
            format!("request body exceeds {limit_mb} MiB"),
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorClass::RateLimited,
            "Rate limit exceeded",
        )
    }

    pub fn no_credentials() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorClass::NoCredentials,
            "No credentials available",
        )
    }

    pub fn upstream_timeout() -> Self {
        Self::new(
            StatusCode::REQUEST_TIMEOUT,
            ErrorClass::UpstreamTimeout,
            "upstream request timed out",
        )
    }

    pub fn upstream_transport(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            ErrorClass::UpstreamTransport,
            message,
        )
    }

    pub fn upstream_too_large() -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            ErrorClass::UpstreamTooLarge,
            "upstream response too large",
        )
    }

    /// Short class tag recorded in the spend log's error metadata.
    pub fn class_tag(&self) -> &'static str {
        match self.class {
            ErrorClass::AuthMissing => "auth_missing",
            ErrorClass::AuthFormat => "auth_format",
            ErrorClass::AuthInvalid => "auth_invalid",
            ErrorClass::AuthExpired => "auth_expired",
            ErrorClass::AuthBlocked => "auth_blocked",
            ErrorClass::BudgetExceeded => "budget_exceeded",
            ErrorClass::ModelMissing => "model_missing",
            ErrorClass::BodyTooLarge => "body_too_large",
            ErrorClass::NoCredentials => "no_credentials",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::UpstreamTransport => "upstream_transport",
            ErrorClass::UpstreamTimeout => "upstream_timeout",
            ErrorClass::UpstreamTooLarge => "upstream_too_large",
            ErrorClass::TranslationFailed => "translation_failed",
            ErrorClass::StreamAborted => "stream_aborted",
            ErrorClass::ClientDisconnected => "client_disconnected",
        }
    }

    pub fn into_response(self) -> Response {
        envelope_response(self.status, &self.message)
    }
}

/// OpenAI-compatible error `type` for a status code.
pub fn error_type(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 | 413 => "invalid_request_error",
        401 => "authentication_error",
        402 => "insufficient_quota",
        403 => "permission_denied",
        404 => "not_found_error",
        408 => "timeout_error",
        429 => "rate_limit_error",
        502 => "api_error",
        500..=599 => "server_error",
        _ => "invalid_request_error",
    }
}

pub fn envelope_body(status: StatusCode, message: &str) -> Bytes {
    let body = json!({
        "error": {
            "message": message,
            "type": error_type(status),
            "param": null,
            "code": null,
        }
    });
    Bytes::from(body.to_string())
}

pub fn envelope_response(status: StatusCode, message: &str) -> Response {
    let mut resp = Response::new(Body::from(envelope_body(status, message)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_to_error_type_mapping() {
        assert_eq!(error_type(StatusCode::BAD_REQUEST), "invalid_request_error");
        assert_eq!(error_type(StatusCode::PAYLOAD_TOO_LARGE), "invalid_request_error");
        assert_eq!(error_type(StatusCode::UNAUTHORIZED), "authentication_error");
        assert_eq!(error_type(StatusCode::PAYMENT_REQUIRED), "insufficient_quota");
        assert_eq!(error_type(StatusCode::FORBIDDEN), "permission_denied");
        assert_eq!(error_type(StatusCode::NOT_FOUND), "not_found_error");
        assert_eq!(error_type(StatusCode::REQUEST_TIMEOUT), "timeout_error");
        assert_eq!(error_type(StatusCode::TOO_MANY_REQUESTS), "rate_limit_error");
        assert_eq!(error_type(StatusCode::BAD_GATEWAY), "api_error");
        assert_eq!(error_type(StatusCode::INTERNAL_SERVER_ERROR), "server_error");
        assert_eq!(error_type(StatusCode::SERVICE_UNAVAILABLE), "server_error");
        assert_eq!(error_type(StatusCode::IM_A_TEAPOT), "invalid_request_error");
    }

    #[test]
    fn envelope_shape_is_openai_compatible() {
        let body = envelope_body(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["message"], "Rate limit exceeded");
        assert_eq!(value["error"]["type"], "rate_limit_error");
        assert!(value["error"]["param"].is_null());
        assert!(value["error"]["code"].is_null());
    }
}
