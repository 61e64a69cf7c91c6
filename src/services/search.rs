//! Search service.
//!
//! Indexes posts on `post.created`, drops them on `post.deleted`, and
//! answers `GET /api/search/posts?query=`. Matching is a case-insensitive
//! substring test; ranking beyond recency is out of scope.

use crate::application::ports::EventHandler;
use crate::application::registry::HandlerId;
use crate::application::relay::EventRelay;
use crate::domain::event::{DomainEvent, EventType};
use crate::http::ApiError;
use crate::services::payloads::{PostCreated, PostDeleted};
use crate::services::{health, GatewayUser, ServiceContext};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Results returned per query.
pub const MAX_RESULTS: usize = 10;

/// A searchable post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedPost {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<PostCreated> for IndexedPost {
    fn from(created: PostCreated) -> Self {
        Self {
            post_id: created.post_id,
            user_id: created.user_id,
            content: created.content,
            created_at: created.created_at,
        }
    }
}

/// In-memory post index keyed by post id.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    posts: Arc<DashMap<String, IndexedPost>>,
}

impl SearchIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a post.
    pub fn upsert(&self, post: IndexedPost) {
        self.posts.insert(post.post_id.clone(), post);
    }

    /// Remove a post. Returns `false` if it was not indexed.
    pub fn remove(&self, post_id: &str) -> bool {
        self.posts.remove(post_id).is_some()
    }

    /// Up to [`MAX_RESULTS`] posts containing `query`, newest first.
    pub fn search(&self, query: &str) -> Vec<IndexedPost> {
        let needle = query.trim().to_lowercase();
        let mut hits: Vec<IndexedPost> = self
            .posts
            .iter()
            .filter(|entry| entry.value().content.to_lowercase().contains(&needle))
            .map(|entry| entry.value().clone())
            .collect();

        hits.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.post_id.cmp(&b.post_id))
        });
        hits.truncate(MAX_RESULTS);
        hits
    }

    /// Whether a post is indexed.
    pub fn contains(&self, post_id: &str) -> bool {
        self.posts.contains_key(post_id)
    }

    /// Number of indexed posts.
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// Indexes created posts. Replaying an event rewrites the same entry.
#[derive(Debug, Clone)]
pub struct PostCreatedHandler {
    index: SearchIndex,
}

impl PostCreatedHandler {
    /// Handler writing into `index`.
    pub fn new(index: SearchIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl EventHandler for PostCreatedHandler {
    fn name(&self) -> &str {
        "search.post-created"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let created: PostCreated = match event.payload_as() {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(event_id = %event.id(), error = %e, "ignoring malformed post.created payload");
                return Ok(());
            }
        };

        let post_id = created.post_id.clone();
        self.index.upsert(created.into());
        tracing::info!(%post_id, "Indexed post");
        Ok(())
    }
}

/// Drops deleted posts from the index. Unknown posts are ignored.
#[derive(Debug, Clone)]
pub struct PostDeletedHandler {
    index: SearchIndex,
}

impl PostDeletedHandler {
    /// Handler removing from `index`.
    pub fn new(index: SearchIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl EventHandler for PostDeletedHandler {
    fn name(&self) -> &str {
        "search.post-deleted"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let deleted: PostDeleted = match event.payload_as() {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(event_id = %event.id(), error = %e, "ignoring malformed post.deleted payload");
                return Ok(());
            }
        };

        let removed = self.index.remove(&deleted.post_id);
        tracing::info!(post_id = %deleted.post_id, removed, "Removed post from search index");
        Ok(())
    }
}

/// Register the search service's event handlers.
pub fn subscribe(relay: &EventRelay, index: &SearchIndex) -> Vec<HandlerId> {
    vec![
        relay.subscribe(
            EventType::POST_CREATED,
            Arc::new(PostCreatedHandler::new(index.clone())),
        ),
        relay.subscribe(
            EventType::POST_DELETED,
            Arc::new(PostDeletedHandler::new(index.clone())),
        ),
    ]
}

/// Router state of the search service.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub ctx: ServiceContext,
    pub index: SearchIndex,
}

impl AsRef<ServiceContext> for SearchState {
    fn as_ref(&self) -> &ServiceContext {
        &self.ctx
    }
}

/// Build the search service router.
pub fn router(ctx: ServiceContext, index: SearchIndex) -> Router {
    let routes = Router::new()
        .route("/api/search/health", get(health::<SearchState>))
        .route("/api/search/posts", get(search_posts));

    let state = SearchState {
        ctx: ctx.clone(),
        index,
    };
    ctx.finish(routes, state)
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

async fn search_posts(
    State(state): State<SearchState>,
    _user: GatewayUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<IndexedPost>>, ApiError> {
    if params.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query parameter is required".to_string()));
    }
    Ok(Json(state.index.search(&params.query)))
}
