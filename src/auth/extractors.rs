use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use super::{cookies, jwt::JwtKeys};
use crate::{error::ApiError, state::AppState, users::repo_types::PublicUser};

/// Authenticated caller, resolved from the access token.
///
/// Stateless apart from the existence lookup: the stored refresh token is
/// not consulted, so an access token stays usable until it expires.
#[derive(Debug, Clone)]
pub struct AuthUser(pub PublicUser);

pub(crate) fn access_token_from(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = cookies::get_cookie(headers, cookies::ACCESS_COOKIE) {
        return Some(token.to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token_from(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|e| {
            warn!(error = %e, "access token rejected");
            ApiError::unauthorized("Invalid or expired access token")
        })?;

        let user = state
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "access token for unknown user");
                ApiError::unauthorized("Invalid access token")
            })?;

        tracing::Span::current().record("user_id", tracing::field::display(user.id));
        Ok(AuthUser(PublicUser::from(user)))
    }
}
