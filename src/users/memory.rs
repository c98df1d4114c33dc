use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::repo::{StoreError, UserStore};
use crate::users::repo_types::{ChannelProfile, NewUser, User, Video, VideoOwner, WatchedVideo};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    videos: HashMap<Uuid, Video>,
    subscriptions: Vec<(Uuid, Uuid)>, // (subscriber, channel)
    history: HashMap<Uuid, Vec<(Uuid, OffsetDateTime)>>,
}

/// Process-local store with the same uniqueness rules as the database.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_video(&self, video: Video) {
        self.inner.write().await.videos.insert(video.id, video);
    }

    pub async fn subscribe(&self, subscriber: Uuid, channel: Uuid) {
        let mut inner = self.inner.write().await;
        if !inner.subscriptions.contains(&(subscriber, channel)) {
            inner.subscriptions.push((subscriber, channel));
        }
    }

    pub async fn record_watch(&self, user: Uuid, video: Uuid, at: OffsetDateTime) {
        let mut inner = self.inner.write().await;
        let entries = inner.history.entry(user).or_default();
        entries.retain(|(v, _)| *v != video);
        entries.push((video, at));
    }
}

fn conflict() -> StoreError {
    StoreError::Conflict("User already exists with the provided username or email address".into())
}

impl Inner {
    fn taken(&self, username: Option<&str>, email: Option<&str>, except: Option<Uuid>) -> bool {
        self.users.values().any(|u| {
            Some(u.id) != except
                && (username == Some(u.username.as_str()) || email == Some(u.email.as_str()))
        })
    }

    fn update<F: FnOnce(&mut User)>(&mut self, id: Uuid, f: F) -> Option<User> {
        let user = self.users.get_mut(&id)?;
        f(user);
        user.updated_at = OffsetDateTime::now_utc();
        Some(user.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        let by_username =
            username.and_then(|name| inner.users.values().find(|u| u.username == name));
        let by_email = || email.and_then(|mail| inner.users.values().find(|u| u.email == mail));
        Ok(by_username.or_else(by_email).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.taken(Some(user.username.as_str()), Some(user.email.as_str()), None) {
            return Err(conflict());
        }
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: user.id,
            password_hash: user.password_hash().to_string(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.update(id, |u| u.refresh_token = token.map(str::to_string));
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.update(id, |u| u.password_hash = password_hash.to_string());
        Ok(())
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.taken(None, Some(email), Some(id)) {
            return Err(conflict());
        }
        Ok(inner.update(id, |u| {
            u.full_name = full_name.to_string();
            u.email = email.to_string();
        }))
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.update(id, |u| u.avatar = url.to_string()))
    }

    async fn set_cover_image(&self, id: Uuid, url: &str) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.update(id, |u| u.cover_image = Some(url.to_string())))
    }

    async fn channel_profile(
        &self,
        username: &str,
        viewer: Uuid,
    ) -> Result<Option<ChannelProfile>, StoreError> {
        let inner = self.inner.read().await;
        let Some(user) = inner.users.values().find(|u| u.username == username) else {
            return Ok(None);
        };
        let subs = &inner.subscriptions;
        Ok(Some(ChannelProfile {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            cover_image: user.cover_image.clone(),
            subscribers_count: subs.iter().filter(|(_, c)| *c == user.id).count() as i64,
            channels_subscribed_to_count: subs.iter().filter(|(s, _)| *s == user.id).count()
                as i64,
            is_subscribed: subs.contains(&(viewer, user.id)),
        }))
    }

    async fn watch_history(&self, id: Uuid) -> Result<Vec<WatchedVideo>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<WatchedVideo> = inner
            .history
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|(video_id, watched_at)| {
                let v = inner.videos.get(video_id)?;
                let owner = inner.users.get(&v.owner_id)?;
                Some(WatchedVideo {
                    id: v.id,
                    title: v.title.clone(),
                    description: v.description.clone(),
                    thumbnail: v.thumbnail.clone(),
                    video_file: v.video_file.clone(),
                    duration: v.duration,
                    views: v.views,
                    owner: VideoOwner {
                        username: owner.username.clone(),
                        full_name: owner.full_name.clone(),
                        avatar: owner.avatar.clone(),
                    },
                    watched_at: *watched_at,
                })
            })
            .collect();
        out.sort_by(|a, b| b.watched_at.cmp(&a.watched_at));
        Ok(out)
    }
}
