use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, FromRef, Multipart, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE},
    dto::{ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, RegisterInput, TokenPair},
    extractors::AuthUser,
    jwt::JwtKeys,
    services,
};
use crate::{
    error::{ApiError, ApiResponse},
    state::AppState,
    storage::UploadFile,
    users::repo_types::PublicUser,
};

pub const UPLOAD_LIMIT: usize = 20 * 1024 * 1024; // 20MB

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-access-token", post(refresh))
        .route("/current-user", get(current_user))
        .route("/update-password", post(update_password))
}

type CookieHeaders = AppendHeaders<[(header::HeaderName, String); 2]>;

fn session_cookies(state: &AppState, tokens: &TokenPair) -> CookieHeaders {
    let keys = JwtKeys::from_ref(state);
    let path = &state.config.cookie_path;
    AppendHeaders([
        (
            header::SET_COOKIE,
            cookies::session_cookie(ACCESS_COOKIE, &tokens.access_token, path, keys.access_ttl()),
        ),
        (
            header::SET_COOKIE,
            cookies::session_cookie(REFRESH_COOKIE, &tokens.refresh_token, path, keys.refresh_ttl()),
        ),
    ])
}

fn cleared_cookies(state: &AppState) -> CookieHeaders {
    let path = &state.config.cookie_path;
    AppendHeaders([
        (header::SET_COOKIE, cookies::cleared_cookie(ACCESS_COOKIE, path)),
        (header::SET_COOKIE, cookies::cleared_cookie(REFRESH_COOKIE, path)),
    ])
}

/// Reads one multipart file field into memory.
pub(crate) async fn read_file(
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<UploadFile>, ApiError> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field
        .bytes()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(UploadFile {
        file_name,
        content_type,
        body,
    }))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut mp = mp?;
    let mut input = RegisterInput::default();
    let mut avatar = None;
    let mut cover_image = None;

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => input.username = read_text(field).await?,
            "email" => input.email = read_text(field).await?,
            "fullName" => input.full_name = read_text(field).await?,
            "password" => input.password = read_text(field).await?,
            "avatar" => avatar = read_file(field).await?,
            "coverImage" => cover_image = read_file(field).await?,
            other => {
                return Err(ApiError::validation(format!("Unexpected field: {other}")));
            }
        }
    }

    let user = services::register(&state, input, avatar, cover_image).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(StatusCode::CREATED, user, "User registered successfully")),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let (user, tokens) = services::login(&state, payload).await?;
    let cookies = session_cookies(&state, &tokens);
    let body = LoginResponse {
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
    };
    Ok((
        StatusCode::OK,
        cookies,
        Json(ApiResponse::ok(StatusCode::OK, body, "User logged in successfully")),
    ))
}

#[instrument(skip(state, user))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    services::logout(&state, user.id).await?;
    Ok((
        StatusCode::OK,
        cleared_cookies(&state),
        Json(ApiResponse::ok(StatusCode::OK, serde_json::json!({}), "User logged out")),
    ))
}

/// An absent or blank body carries no token; anything else must be a valid `RefreshRequest`.
fn refresh_body(body: &[u8]) -> Result<Option<RefreshRequest>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::validation(format!("Invalid request body: {e}")))
}

#[instrument(skip(state, headers, body))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload = refresh_body(&body)?;
    let incoming = cookies::get_cookie(&headers, REFRESH_COOKIE)
        .map(str::to_string)
        .or_else(|| payload.and_then(|body| body.refresh_token));

    let tokens = services::refresh(&state, incoming).await?;
    let cookies = session_cookies(&state, &tokens);
    Ok((
        StatusCode::OK,
        cookies,
        Json(ApiResponse::ok(StatusCode::OK, tokens, "Access token refreshed")),
    ))
}

#[instrument(skip(user))]
pub async fn current_user(AuthUser(user): AuthUser) -> Json<ApiResponse<PublicUser>> {
    Json(ApiResponse::ok(StatusCode::OK, user, "Current user fetched successfully"))
}

#[instrument(skip(state, user, payload))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    services::change_password(&state, user.id, payload).await?;
    Ok(Json(ApiResponse::ok(
        StatusCode::OK,
        serde_json::json!({}),
        "Password changed successfully",
    )))
}
