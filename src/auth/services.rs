use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{ChangePasswordRequest, LoginRequest, RegisterInput, TokenPair},
    jwt::JwtKeys,
    password::{hash_password, verify_password},
};
use crate::{
    error::ApiError,
    state::AppState,
    storage::UploadFile,
    users::repo_types::{NewUser, PublicUser, User},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Uploads a profile image; any failure is reported against `field`.
pub(crate) async fn upload_image(
    state: &AppState,
    file: UploadFile,
    field: &str,
) -> Result<String, ApiError> {
    match state.media.upload(file).await {
        Ok(media) if !media.url.is_empty() => Ok(media.url),
        Ok(_) => Err(ApiError::validation(format!("{field} upload failed"))),
        Err(e) => {
            warn!(error = %e, field, "media upload failed");
            Err(ApiError::validation(format!("{field} upload failed")))
        }
    }
}

pub async fn register(
    state: &AppState,
    input: RegisterInput,
    avatar: Option<UploadFile>,
    cover_image: Option<UploadFile>,
) -> Result<PublicUser, ApiError> {
    let username = normalize(&input.username);
    let email = normalize(&input.email);
    let full_name = input.full_name.trim().to_string();

    if [&username, &email, &full_name].iter().any(|f| f.is_empty())
        || input.password.trim().is_empty()
    {
        return Err(ApiError::validation("All fields are required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }

    if state
        .store
        .find_by_login(Some(username.as_str()), Some(email.as_str()))
        .await?
        .is_some()
    {
        warn!(%username, "registration conflict");
        return Err(ApiError::Conflict(
            "User already exists with the provided username or email address".into(),
        ));
    }

    let avatar = avatar.ok_or_else(|| ApiError::validation("Avatar is required"))?;
    let avatar_url = upload_image(state, avatar, "Avatar").await?;
    let cover_url = match cover_image {
        Some(file) => Some(upload_image(state, file, "Cover image").await?),
        None => None,
    };

    let new_user = NewUser::with_password(
        username,
        email,
        full_name,
        avatar_url,
        cover_url,
        &input.password,
    )?;
    let user = state.store.create(new_user).await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(PublicUser::from(user))
}

/// Mints a token pair and persists the refresh half before returning.
async fn issue_tokens(state: &AppState, user: &User) -> Result<TokenPair, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    state
        .store
        .set_refresh_token(user.id, Some(refresh_token.as_str()))
        .await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

pub async fn login(state: &AppState, req: LoginRequest) -> Result<(PublicUser, TokenPair), ApiError> {
    let username = req.username.as_deref().map(normalize).filter(|s| !s.is_empty());
    let email = req.email.as_deref().map(normalize).filter(|s| !s.is_empty());
    if username.is_none() && email.is_none() {
        return Err(ApiError::validation("Username or email is required"));
    }
    if req.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let user = state
        .store
        .find_by_login(username.as_deref(), email.as_deref())
        .await?
        .ok_or_else(|| {
            warn!(?username, ?email, "login for unknown user");
            ApiError::unauthorized("User does not exist")
        })?;

    if !verify_password(&user.password_hash, &req.password)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let tokens = issue_tokens(state, &user).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((PublicUser::from(user), tokens))
}

/// Clears the stored refresh token. Calling it again is a no-op.
pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    state.store.set_refresh_token(user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Verifies and rotates a refresh token. The previous token stops working.
pub async fn refresh(state: &AppState, incoming: Option<String>) -> Result<TokenPair, ApiError> {
    let incoming = incoming
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::unauthorized("Unauthorized request"))?;

    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(&incoming).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        ApiError::unauthorized("Invalid or expired refresh token")
    })?;

    let user = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid refresh token"))?;

    if user.refresh_token.as_deref() != Some(incoming.as_str()) {
        warn!(user_id = %user.id, "stale or reused refresh token");
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let tokens = issue_tokens(state, &user).await?;
    info!(user_id = %user.id, "tokens rotated");
    Ok(tokens)
}

/// Re-hashes and stores a new password after checking the old one.
pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), ApiError> {
    if req.new_password.trim().is_empty() {
        return Err(ApiError::validation("New password is required"));
    }

    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if !verify_password(&user.password_hash, &req.old_password)? {
        warn!(%user_id, "change password with wrong old password");
        return Err(ApiError::unauthorized("Invalid old password"));
    }

    set_password(state, user_id, &req.new_password).await?;
    info!(%user_id, "password changed");
    Ok(())
}

/// The only write path for passwords; always hashes.
pub async fn set_password(state: &AppState, user_id: Uuid, plain: &str) -> Result<(), ApiError> {
    let hash = hash_password(plain)?;
    state.store.set_password_hash(user_id, &hash).await?;
    Ok(())
}
