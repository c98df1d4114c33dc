use tracing::info;
use uuid::Uuid;

use super::{
    dto::UpdateAccountRequest,
    repo_types::{ChannelProfile, PublicUser, WatchedVideo},
};
use crate::{
    auth::services::{is_valid_email, normalize, upload_image},
    error::ApiError,
    state::AppState,
    storage::UploadFile,
};

fn gone() -> ApiError {
    ApiError::NotFound("User not found".into())
}

pub async fn update_account(
    state: &AppState,
    user_id: Uuid,
    req: UpdateAccountRequest,
) -> Result<PublicUser, ApiError> {
    let full_name = req.full_name.trim();
    let email = normalize(&req.email);
    if full_name.is_empty() || email.is_empty() {
        return Err(ApiError::validation("All fields are required"));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::validation("Invalid email"));
    }

    if let Some(owner) = state.store.find_by_login(None, Some(email.as_str())).await? {
        if owner.id != user_id {
            return Err(ApiError::Conflict("Email is already in use".into()));
        }
    }

    let user = state
        .store
        .update_account(user_id, full_name, &email)
        .await?
        .ok_or_else(gone)?;
    info!(%user_id, "account details updated");
    Ok(PublicUser::from(user))
}

pub async fn update_avatar(
    state: &AppState,
    user_id: Uuid,
    file: Option<UploadFile>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::validation("Avatar file is missing"))?;
    let url = upload_image(state, file, "Avatar").await?;
    let user = state.store.set_avatar(user_id, &url).await?.ok_or_else(gone)?;
    info!(%user_id, "avatar updated");
    Ok(PublicUser::from(user))
}

pub async fn update_cover_image(
    state: &AppState,
    user_id: Uuid,
    file: Option<UploadFile>,
) -> Result<PublicUser, ApiError> {
    let file = file.ok_or_else(|| ApiError::validation("Cover image file is missing"))?;
    let url = upload_image(state, file, "Cover image").await?;
    let user = state
        .store
        .set_cover_image(user_id, &url)
        .await?
        .ok_or_else(gone)?;
    info!(%user_id, "cover image updated");
    Ok(PublicUser::from(user))
}

pub async fn channel_profile(
    state: &AppState,
    username: &str,
    viewer: Uuid,
) -> Result<ChannelProfile, ApiError> {
    let username = normalize(username);
    if username.is_empty() {
        return Err(ApiError::validation("Username is missing"));
    }
    state
        .store
        .channel_profile(&username, viewer)
        .await?
        .ok_or_else(|| ApiError::NotFound("Channel does not exist".into()))
}

pub async fn watch_history(state: &AppState, user_id: Uuid) -> Result<Vec<WatchedVideo>, ApiError> {
    Ok(state.store.watch_history(user_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{dto::RegisterInput, services::register};
    use crate::users::memory::MemoryUserStore;
    use bytes::Bytes;
    use std::sync::Arc;

    fn png() -> UploadFile {
        UploadFile {
            file_name: Some("pic.png".into()),
            content_type: "image/png".into(),
            body: Bytes::from_static(b"\x89PNG"),
        }
    }

    async fn user(state: &AppState, name: &str) -> PublicUser {
        let input = RegisterInput {
            username: name.into(),
            email: format!("{name}@x.com"),
            full_name: name.to_uppercase(),
            password: "pw".into(),
        };
        register(state, input, Some(png()), None).await.unwrap()
    }

    #[tokio::test]
    async fn update_account_changes_details() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        let req = UpdateAccountRequest {
            full_name: " Alice L. ".into(),
            email: "Alice@Wonder.land".into(),
        };
        let updated = update_account(&state, alice.id, req).await.unwrap();
        assert_eq!(updated.full_name, "Alice L.");
        assert_eq!(updated.email, "alice@wonder.land");
    }

    #[tokio::test]
    async fn update_account_rejects_taken_email() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        user(&state, "bob").await;
        let req = UpdateAccountRequest {
            full_name: "Alice".into(),
            email: "bob@x.com".into(),
        };
        assert!(matches!(
            update_account(&state, alice.id, req).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn images_require_a_file() {
        let state = AppState::fake();
        let alice = user(&state, "alice").await;
        assert!(matches!(
            update_avatar(&state, alice.id, None).await,
            Err(ApiError::Validation(_))
        ));

        let updated = update_cover_image(&state, alice.id, Some(png())).await.unwrap();
        assert!(updated.cover_image.unwrap().starts_with("https://fake.local/"));

        let updated = update_avatar(&state, alice.id, Some(png())).await.unwrap();
        assert_ne!(updated.avatar, alice.avatar);
    }

    #[tokio::test]
    async fn channel_profile_counts_subscriptions() {
        let store = Arc::new(MemoryUserStore::new());
        let state = AppState::fake_with(store.clone(), Arc::new(NoMedia));
        let alice = user(&state, "alice").await;
        let bob = user(&state, "bob").await;
        let carol = user(&state, "carol").await;

        store.subscribe(bob.id, alice.id).await;
        store.subscribe(carol.id, alice.id).await;
        store.subscribe(alice.id, carol.id).await;

        let seen_by_bob = channel_profile(&state, "Alice", bob.id).await.unwrap();
        assert_eq!(seen_by_bob.subscribers_count, 2);
        assert_eq!(seen_by_bob.channels_subscribed_to_count, 1);
        assert!(seen_by_bob.is_subscribed);

        let seen_by_alice = channel_profile(&state, "alice", alice.id).await.unwrap();
        assert!(!seen_by_alice.is_subscribed);

        assert!(matches!(
            channel_profile(&state, "nobody", bob.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    struct NoMedia;

    #[async_trait::async_trait]
    impl crate::storage::MediaStore for NoMedia {
        async fn upload(&self, _file: UploadFile) -> anyhow::Result<crate::storage::UploadedMedia> {
            Ok(crate::storage::UploadedMedia {
                url: "https://cdn.local/x.png".into(),
            })
        }
    }
}
