use http::HeaderMap;
use http::StatusCode;

use crate::error::{ErrorClass, GatewayError};
use crate::spend::{SpendSink, ValidateError};

/// Authenticated caller identity carried by the request context.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    pub token_hash: String,
    pub user_id: Option<String>,
    pub end_user: Option<String>,
}

pub fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

/// Front-door auth: the master key admits directly; any other token goes
/// through the spend sink's validator when it is enabled and healthy.
pub async fn authenticate(
    headers: &HeaderMap,
    master_key: &str,
    spend: &dyn SpendSink,
) -> Result<AuthIdentity, GatewayError> {
    let end_user = headers
        .get("x-end-user")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(GatewayError::auth_missing)?;

    let token = auth
        .trim()
        .strip_prefix("Bearer ")
        .or_else(|| auth.trim().strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(GatewayError::auth_format)?;

    if token == master_key {
        return Ok(AuthIdentity {
            token_hash: hash_token(token),
            user_id: None,
            end_user,
        });
    }

    if !spend.is_enabled() || !spend.is_healthy() {
        return Err(GatewayError::auth_invalid("invalid master key"));
    }

    match spend.validate_token(token).await {
        Ok(identity) => Ok(AuthIdentity {
            token_hash: hash_token(token),
            user_id: Some(identity.user_id),
            end_user,
        }),
        Err(err) => Err(map_validate_error(err)),
    }
}

fn map_validate_error(err: ValidateError) -> GatewayError {
    match err {
        ValidateError::Invalid => GatewayError::new(
            StatusCode::UNAUTHORIZED,
            ErrorClass::AuthInvalid,
            "invalid token",
        ),
        ValidateError::Expired => GatewayError::new(
            StatusCode::UNAUTHORIZED,
            ErrorClass::AuthExpired,
            "token expired",
        ),
        ValidateError::Blocked => GatewayError::new(
            StatusCode::FORBIDDEN,
            ErrorClass::AuthBlocked,
            "token blocked",
        ),
        ValidateError::BudgetExceeded => GatewayError::new(
            StatusCode::PAYMENT_REQUIRED,
            ErrorClass::BudgetExceeded,
            "budget exceeded",
        ),
        ValidateError::Unknown(message) => GatewayError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorClass::AuthInvalid,
            message,
        ),
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use crate::spend::{MemorySpendSink, NoopSpendSink};

    use super::*;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(auth) = auth {
            map.insert("authorization", HeaderValue::from_str(auth).unwrap());
        }
        map
    }

    #[tokio::test]
    async fn master_key_admits() {
        let sink = NoopSpendSink;
        let identity = authenticate(&headers(Some("Bearer sk-M")), "sk-M", &sink)
            .await
            .unwrap();
        assert!(identity.user_id.is_none());
    }

    #[tokio::test]
    async fn missing_and_malformed_headers_fail_closed() {
        let sink = NoopSpendSink;
        let err = authenticate(&headers(None), "sk-M", &sink).await.unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        let err = authenticate(&headers(Some("Basic abc")), "sk-M", &sink)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.class, ErrorClass::AuthFormat);
    }

    #[tokio::test]
    async fn unknown_token_with_disabled_sink_is_rejected() {
        let sink = NoopSpendSink;
        let err = authenticate(&headers(Some("Bearer sk-user")), "sk-M", &sink)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "invalid master key");
    }

    #[tokio::test]
    async fn sink_validated_token_attaches_identity() {
        let sink = MemorySpendSink::new(16).with_token("sk-user", "u-1");
        let identity = authenticate(&headers(Some("Bearer sk-user")), "sk-M", &sink)
            .await
            .unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("u-1"));

        let err = authenticate(&headers(Some("Bearer sk-other")), "sk-M", &sink)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn end_user_header_is_attributed() {
        let sink = NoopSpendSink;
        let mut map = headers(Some("Bearer sk-M"));
        map.insert("x-end-user", HeaderValue::from_static("alice"));
        let identity = authenticate(&map, "sk-M", &sink).await.unwrap();
        assert_eq!(identity.end_user.as_deref(), Some("alice"));
    }
}
