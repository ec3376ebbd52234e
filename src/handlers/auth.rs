//! Request extractors for caller identity and admin privileges.
//!
//! Authentication proper lives at the gateway; this service trusts the
//! headers the gateway injects. A request without a valid `X-User-Id` is
//! rejected with 401 before any handler runs.

use crate::{config::Config, error::ApiError};
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use std::future::{ready, Ready};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// The calling user, taken from the `X-User-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user_id = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());

        ready(match user_id {
            Some(user_id) => Ok(AuthenticatedUser { user_id }),
            None => Err(ApiError::Unauthorized(format!(
                "missing or malformed {USER_ID_HEADER} header"
            ))),
        })
    }
}

/// Marker extractor for privileged endpoints: the `X-Admin-Token` header
/// must match the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminToken;

impl FromRequest for AdminToken {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let Some(config) = req.app_data::<web::Data<Config>>() else {
            return ready(Err(ApiError::InternalError(
                "server configuration not registered".to_string(),
            )));
        };

        let presented = req
            .headers()
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());

        ready(match presented {
            Some(token) if token == config.admin_token => Ok(AdminToken),
            _ => Err(ApiError::Unauthorized(
                "admin token missing or invalid".to_string(),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_web::test]
    async fn test_user_header_is_required() {
        let req = TestRequest::default().to_http_request();
        let result = AuthenticatedUser::from_request(&req, &mut Payload::None).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[actix_web::test]
    async fn test_user_header_is_parsed() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "42"))
            .to_http_request();
        let user = AuthenticatedUser::from_request(&req, &mut Payload::None)
            .await
            .unwrap();
        assert_eq!(user.user_id, 42);
    }

    #[actix_web::test]
    async fn test_non_numeric_user_header_is_rejected() {
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "not-a-number"))
            .to_http_request();
        let result = AuthenticatedUser::from_request(&req, &mut Payload::None).await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
