//! Media service.
//!
//! Keeps media metadata and removes the media of deleted posts when
//! `post.deleted` arrives. Storage of the files themselves is external.

use crate::application::ports::EventHandler;
use crate::application::relay::EventRelay;
use crate::application::registry::HandlerId;
use crate::domain::event::{DomainEvent, EventType};
use crate::domain::tier::Tier;
use crate::http::{enforce_admission, ApiError};
use crate::services::payloads::PostDeleted;
use crate::services::{health, GatewayUser, ServiceContext};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Metadata of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    pub user_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory media catalogue.
#[derive(Debug, Clone, Default)]
pub struct MediaLibrary {
    media: Arc<DashMap<String, Media>>,
}

impl MediaLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new file and return its metadata.
    pub fn add(&self, user_id: &str, original_name: &str, mime_type: &str, url: &str) -> Media {
        let media = Media {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        self.media.insert(media.id.clone(), media.clone());
        media
    }

    /// Metadata by id.
    pub fn get(&self, id: &str) -> Option<Media> {
        self.media.get(id).map(|media| media.value().clone())
    }

    /// Every file, newest first.
    pub fn all(&self) -> Vec<Media> {
        let mut media: Vec<Media> = self.media.iter().map(|entry| entry.value().clone()).collect();
        media.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        media
    }

    /// Remove the given ids; unknown ids are skipped. Returns how many were
    /// removed.
    pub fn remove_all<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> usize {
        ids.into_iter()
            .filter(|id| self.media.remove(id.as_str()).is_some())
            .count()
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.media.len()
    }

    /// Whether the library is empty.
    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }
}

/// Removes the media of a deleted post.
///
/// Idempotent: media already gone is skipped.
#[derive(Debug, Clone)]
pub struct PostDeletedHandler {
    library: MediaLibrary,
}

impl PostDeletedHandler {
    /// Handler cleaning up `library`.
    pub fn new(library: MediaLibrary) -> Self {
        Self { library }
    }
}

#[async_trait]
impl EventHandler for PostDeletedHandler {
    fn name(&self) -> &str {
        "media.post-deleted"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let deleted: PostDeleted = match event.payload_as() {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(event_id = %event.id(), error = %e, "ignoring malformed post.deleted payload");
                return Ok(());
            }
        };

        let removed = self.library.remove_all(&deleted.media_ids);
        tracing::info!(
            post_id = %deleted.post_id,
            requested = deleted.media_ids.len(),
            removed,
            "Processed deletion of media for post"
        );
        Ok(())
    }
}

/// Register the media service's event handlers.
pub fn subscribe(relay: &EventRelay, library: &MediaLibrary) -> Vec<HandlerId> {
    vec![relay.subscribe(
        EventType::POST_DELETED,
        Arc::new(PostDeletedHandler::new(library.clone())),
    )]
}

/// Router state of the media service.
#[derive(Debug, Clone)]
pub struct MediaState {
    pub ctx: ServiceContext,
    pub library: MediaLibrary,
}

impl AsRef<ServiceContext> for MediaState {
    fn as_ref(&self) -> &ServiceContext {
        &self.ctx
    }
}

/// Build the media service router.
pub fn router(ctx: ServiceContext, library: MediaLibrary) -> Router {
    let sensitive = middleware::from_fn_with_state(ctx.admission(Tier::Sensitive), enforce_admission);

    let routes = Router::new()
        .route("/api/media/health", get(health::<MediaState>))
        .route(
            "/api/media",
            get(list_media).merge(post(add_media).route_layer(sensitive)),
        );

    let state = MediaState {
        ctx: ctx.clone(),
        library,
    };
    ctx.finish(routes, state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMediaRequest {
    original_name: String,
    mime_type: String,
    url: String,
}

async fn list_media(State(state): State<MediaState>, _user: GatewayUser) -> Json<Vec<Media>> {
    Json(state.library.all())
}

async fn add_media(
    State(state): State<MediaState>,
    GatewayUser(user): GatewayUser,
    Json(request): Json<AddMediaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.url.trim().is_empty() || request.original_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "originalName and url are required".to_string(),
        ));
    }

    let media = state
        .library
        .add(&user, &request.original_name, &request.mime_type, &request.url);
    tracing::info!(media_id = %media.id, user_id = %user, "Media uploaded successfully");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "mediaId": media.id,
            "url": media.url,
            "message": "Media uploaded successfully",
        })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_post_deleted_is_idempotent() {
        let library = MediaLibrary::new();
        let kept = library.add("alice", "cat.png", "image/png", "https://cdn/cat.png");
        let gone = library.add("alice", "dog.png", "image/png", "https://cdn/dog.png");

        let handler = PostDeletedHandler::new(library.clone());
        let event = DomainEvent::new(
            EventType::POST_DELETED,
            json!({"postId": "p1", "userId": "alice", "mediaIds": [gone.id]}),
        );

        handler.handle(&event).await.unwrap();
        assert_eq!(library.all(), vec![kept.clone()]);

        handler.handle(&event).await.unwrap();
        assert_eq!(library.all(), vec![kept]);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_skipped() {
        let library = MediaLibrary::new();
        library.add("alice", "cat.png", "image/png", "https://cdn/cat.png");

        let handler = PostDeletedHandler::new(library.clone());
        let event = DomainEvent::new(EventType::POST_DELETED, json!({"mediaIds": 42}));

        assert!(handler.handle(&event).await.is_ok());
        assert_eq!(library.len(), 1);
    }
}
