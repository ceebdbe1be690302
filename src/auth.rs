//! # Authentication
//!
//! Caller authentication for protected endpoints. Requests carry an HS256
//! bearer token whose `user_id` claim identifies the acting user.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, unauthorized};
use crate::server::AppState;

/// Claims carried by caller bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Authenticated caller resolved from the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<AppConfig>: FromRef<S>,
    S: Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);
        let secret = config
            .jwt_secret_key
            .as_deref()
            .ok_or_else(|| unauthorized(Some("Authentication is not configured")))?;

        let token = extract_bearer_token(parts)?;
        let claims = verify_token(secret, token)?;
        tracing::debug!(user_id = %claims.user_id, "Authenticated request");

        Ok(AuthUser {
            user_id: claims.user_id,
        })
    }
}

fn extract_bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(unauthorized(Some(
            "Authorization header must use Bearer scheme",
        )));
    }

    Ok(token.trim())
}

/// Verifies an HS256 token and returns its claims. `exp` is enforced when present.
pub fn verify_token(secret: &str, token: &str) -> Result<UserClaims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| {
        tracing::debug!(error = %err, "Rejected bearer token");
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                unauthorized(Some("Token has expired"))
            }
            _ => unauthorized(Some("Invalid token")),
        }
    })
}

/// Issues a token for `user_id` valid for `ttl`.
pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = UserClaims {
        user_id,
        exp: Some((Utc::now() + ttl).timestamp()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        response::Response,
        routing::get,
    };
    use tower::ServiceExt;

    const SECRET: &str = "test-jwt-secret";

    async fn run_request(config: AppConfig, request: Request<Body>) -> Response {
        async fn handler(user: AuthUser) -> String {
            user.user_id.to_string()
        }

        Router::new()
            .route("/test", get(handler))
            .with_state(Arc::new(config))
            .oneshot(request)
            .await
            .unwrap()
    }

    fn config_with_secret() -> AppConfig {
        AppConfig {
            jwt_secret_key: Some(SECRET.into()),
            ..AppConfig::default()
        }
    }

    fn request_with(header: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = header {
            builder = builder.header("Authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn valid_token_resolves_user() {
        let user_id = Uuid::new_v4();
        let token = issue_token(SECRET, user_id, Duration::hours(1)).unwrap();

        let response = run_request(config_with_secret(), request_with(Some(format!("Bearer {token}")))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, user_id.to_string());
    }

    #[tokio::test]
    async fn missing_header_returns_401() {
        let response = run_request(config_with_secret(), request_with(None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn basic_scheme_returns_401() {
        let response = run_request(
            config_with_secret(),
            request_with(Some("Basic dGVzdDoxMjM=".into())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_secret_returns_401() {
        let token = issue_token("other-secret", Uuid::new_v4(), Duration::hours(1)).unwrap();
        let response = run_request(config_with_secret(), request_with(Some(format!("Bearer {token}")))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_token_returns_401() {
        let token = issue_token(SECRET, Uuid::new_v4(), Duration::hours(-1)).unwrap();
        let response = run_request(config_with_secret(), request_with(Some(format!("Bearer {token}")))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_secret_rejects_everything() {
        let token = issue_token(SECRET, Uuid::new_v4(), Duration::hours(1)).unwrap();
        let response = run_request(AppConfig::default(), request_with(Some(format!("Bearer {token}")))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
