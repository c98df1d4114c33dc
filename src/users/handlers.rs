use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::UpdateAccountRequest,
    repo_types::{ChannelProfile, PublicUser, WatchedVideo},
    services,
};
use crate::{
    auth::{handlers::{read_file, UPLOAD_LIMIT}, AuthUser},
    error::{ApiError, ApiResponse},
    state::AppState,
    storage::UploadFile,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/update-account", patch(update_account))
        .route(
            "/update-avatar",
            patch(update_avatar).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route(
            "/update-cover-image",
            patch(update_cover_image).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/channel/:username", get(channel_profile))
        .route("/watch-history", get(watch_history))
}

/// First file in field `name`; other fields are rejected.
async fn single_file(
    mp: Result<Multipart, MultipartRejection>,
    name: &str,
) -> Result<Option<UploadFile>, ApiError> {
    let mut mp = mp?;
    let mut file = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| ApiError::validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(name) {
            let other = field.name().unwrap_or_default().to_string();
            return Err(ApiError::validation(format!("Unexpected field: {other}")));
        }
        if file.is_none() {
            file = read_file(field).await?;
        }
    }
    Ok(file)
}

#[instrument(skip(state, user, payload))]
pub async fn update_account(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let Json(payload) = payload?;
    let user = services::update_account(&state, user.id, payload).await?;
    Ok(Json(ApiResponse::ok(
        StatusCode::OK,
        user,
        "Account details updated successfully",
    )))
}

#[instrument(skip(state, user, mp))]
pub async fn update_avatar(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let file = single_file(mp, "avatar").await?;
    let user = services::update_avatar(&state, user.id, file).await?;
    Ok(Json(ApiResponse::ok(StatusCode::OK, user, "Avatar updated successfully")))
}

#[instrument(skip(state, user, mp))]
pub async fn update_cover_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let file = single_file(mp, "coverImage").await?;
    let user = services::update_cover_image(&state, user.id, file).await?;
    Ok(Json(ApiResponse::ok(
        StatusCode::OK,
        user,
        "Cover image updated successfully",
    )))
}

#[instrument(skip(state, viewer))]
pub async fn channel_profile(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<ChannelProfile>>, ApiError> {
    let profile = services::channel_profile(&state, &username, viewer.id).await?;
    Ok(Json(ApiResponse::ok(
        StatusCode::OK,
        profile,
        "Channel profile fetched successfully",
    )))
}

#[instrument(skip(state, user))]
pub async fn watch_history(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<ApiResponse<Vec<WatchedVideo>>>, ApiError> {
    let history = services::watch_history(&state, user.id).await?;
    Ok(Json(ApiResponse::ok(
        StatusCode::OK,
        history,
        "Watch history fetched successfully",
    )))
}
