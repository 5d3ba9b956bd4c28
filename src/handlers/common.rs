use crate::errors::ServiceError;
use crate::identity::Identity;
use crate::services::promotions::RequestFingerprint;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const IP_HASH_HEADER: &str = "x-ip-hash";

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Caller context supplied by the gateway in front of this service:
/// the resolved user, the cart session and fraud fingerprint headers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Identity,
    pub session_id: Option<String>,
    pub fingerprint: RequestFingerprint,
}

impl RequestContext {
    pub fn session(&self) -> Result<&str, ServiceError> {
        self.session_id.as_deref().ok_or_else(|| {
            ServiceError::ValidationError(format!("missing {} header", SESSION_ID_HEADER))
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let user_id = match header_str(headers, USER_ID_HEADER) {
            Some(raw) => Some(Uuid::parse_str(raw).map_err(|_| {
                ServiceError::Unauthorized("malformed user identity".to_string())
            })?),
            None => None,
        };

        Ok(Self {
            identity: Identity::from(user_id),
            session_id: header_str(headers, SESSION_ID_HEADER).map(str::to_string),
            fingerprint: RequestFingerprint {
                device_id: header_str(headers, DEVICE_ID_HEADER).map(str::to_string),
                ip_hash: header_str(headers, IP_HASH_HEADER).map(str::to_string),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<RequestContext, ServiceError> {
        let (mut parts, _) = request.into_parts();
        RequestContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_session_and_fingerprint() {
        let user = Uuid::new_v4();
        let request = Request::builder()
            .header(USER_ID_HEADER, user.to_string())
            .header(SESSION_ID_HEADER, "abc")
            .header(DEVICE_ID_HEADER, "device-1")
            .body(())
            .unwrap();

        let ctx = extract(request).await.unwrap();
        assert_eq!(ctx.identity.user_id(), Some(user));
        assert_eq!(ctx.session().unwrap(), "abc");
        assert_eq!(ctx.fingerprint.device_id.as_deref(), Some("device-1"));
        assert!(ctx.fingerprint.ip_hash.is_none());
    }

    #[tokio::test]
    async fn missing_headers_mean_guest_without_session() {
        let ctx = extract(Request::builder().body(()).unwrap()).await.unwrap();
        assert!(!ctx.identity.is_authenticated());
        assert!(ctx.session().is_err());
    }

    #[tokio::test]
    async fn malformed_user_id_is_rejected() {
        let request = Request::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(
            extract(request).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
