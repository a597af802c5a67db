use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use tracing::warn;

use super::jwt::{Claims, TokenIssuer};

/// Extracts and validates the session token, yielding its claims.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header".to_string()))?;

        // "Bearer <token>" or "Token <token>"
        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .or_else(|| auth.strip_prefix("Token "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".to_string()))?;

        let tokens = TokenIssuer::from_ref(state);
        let claims = tokens.verify(token.trim()).map_err(|_| {
            warn!("invalid or expired token");
            (StatusCode::UNAUTHORIZED, "invalid or expired token".to_string())
        })?;

        Ok(AuthUser(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::AppState, users::model::User};
    use axum::http::{header::AUTHORIZATION, Request};

    async fn extract(state: &AppState, header: Option<String>) -> Result<AuthUser, (StatusCode, String)> {
        let mut builder = Request::builder();
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn accepts_bearer_and_token_schemes() {
        let state = AppState::fake();
        let user = User::new("alice", "alice@example.com");
        let token = state.tokens.issue(&user).unwrap();

        for scheme in ["Bearer", "Token"] {
            let Ok(AuthUser(claims)) = extract(&state, Some(format!("{scheme} {token}"))).await else {
                panic!("{scheme} scheme should be accepted");
            };
            assert_eq!(claims.id, user.id);
        }
    }

    #[tokio::test]
    async fn rejects_missing_or_foreign_credentials() {
        let state = AppState::fake();
        let token = state.tokens.issue(&User::new("bob", "bob@example.com")).unwrap();

        let Err((status, _)) = extract(&state, None).await else {
            panic!("missing header must be rejected");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let Err((status, msg)) = extract(&state, Some(format!("Basic {token}"))).await else {
            panic!("unknown scheme must be rejected");
        };
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(msg, "invalid auth scheme");
    }
}
