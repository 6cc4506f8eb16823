use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::Utc;

use crate::constants::ERR_MISSING_TOKEN;
use crate::db;
use crate::error::{AppError, Result};
use crate::models::User;
use crate::security::verify_token;
use crate::AppState;

// ---------------------------------------------------------------------------
// Auth extractor
// ---------------------------------------------------------------------------

/// Authenticated user from the `Authorization: Bearer <jwt>` header
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.0.id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized(ERR_MISSING_TOKEN.to_string()))?;
        let user = authenticate(state, token).await?;
        Ok(AuthUser(user))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve a raw access token to its user
///
/// Also used by the WebSocket upgrade, where browsers cannot set headers and
/// the token arrives as a query parameter.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User> {
    let claims = verify_token(token, &state.config.jwt_secret, Utc::now().timestamp())?;

    let record = db::users::find_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Token for unknown user {}", claims.sub);
            AppError::Unauthorized("Account no longer exists".to_string())
        })?;

    Ok(record.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
