//! Post service.
//!
//! | Route | Tier | Effect |
//! |---|---|---|
//! | `GET /api/posts/health` | global | health report |
//! | `GET /api/posts` | global | newest first, paginated |
//! | `POST /api/posts` | sensitive | create, publishes `post.created` |
//! | `GET /api/posts/:id` | global | fetch one |
//! | `DELETE /api/posts/:id` | sensitive | delete, publishes `post.deleted` |

use crate::domain::event::EventType;
use crate::domain::tier::Tier;
use crate::http::{enforce_admission, ApiError};
use crate::services::payloads::{PostCreated, PostDeleted};
use crate::services::{health, GatewayUser, ServiceContext};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Content length bounds, in characters.
const MIN_CONTENT: usize = 3;
const MAX_CONTENT: usize = 5000;

/// A post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user: String,
    pub content: String,
    pub media_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory post storage.
#[derive(Debug, Clone, Default)]
pub struct PostRepository {
    posts: Arc<DashMap<String, Post>>,
}

impl PostRepository {
    /// An empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new post and return it.
    pub fn create(&self, user: &str, content: &str, media_ids: Vec<String>) -> Post {
        let post = Post {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            content: content.to_string(),
            media_ids,
            created_at: Utc::now(),
        };
        self.posts.insert(post.id.clone(), post.clone());
        post
    }

    /// A post by id.
    pub fn get(&self, id: &str) -> Option<Post> {
        self.posts.get(id).map(|post| post.value().clone())
    }

    /// Remove a post owned by `user`.
    ///
    /// Returns `None` if there is no such post or `user` does not own it.
    pub fn delete(&self, id: &str, user: &str) -> Option<Post> {
        self.posts
            .remove_if(id, |_, post| post.user == user)
            .map(|(_, post)| post)
    }

    /// One page of posts, newest first, and the total count.
    pub fn page(&self, page: usize, limit: usize) -> (Vec<Post>, usize) {
        let mut posts: Vec<Post> = self.posts.iter().map(|entry| entry.value().clone()).collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = posts.len();
        let start = page.saturating_sub(1).saturating_mul(limit);
        let page = posts.into_iter().skip(start).take(limit).collect();
        (page, total)
    }

    /// Number of posts.
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    /// Whether there are no posts.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

/// Router state of the post service.
#[derive(Debug, Clone)]
pub struct PostsState {
    pub ctx: ServiceContext,
    pub posts: PostRepository,
}

impl AsRef<ServiceContext> for PostsState {
    fn as_ref(&self) -> &ServiceContext {
        &self.ctx
    }
}

/// Build the post service router.
pub fn router(ctx: ServiceContext, posts: PostRepository) -> Router {
    let sensitive = middleware::from_fn_with_state(ctx.admission(Tier::Sensitive), enforce_admission);

    let routes = Router::new()
        .route("/api/posts/health", get(health::<PostsState>))
        .route(
            "/api/posts",
            get(list_posts).merge(axum::routing::post(create_post).route_layer(sensitive.clone())),
        )
        .route(
            "/api/posts/:id",
            get(get_post).merge(axum::routing::delete(delete_post).route_layer(sensitive)),
        );

    let state = PostsState {
        ctx: ctx.clone(),
        posts,
    };
    ctx.finish(routes, state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    content: String,
    #[serde(default)]
    media_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

async fn create_post(
    State(state): State<PostsState>,
    GatewayUser(user): GatewayUser,
    Json(request): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = request.content.trim();
    let length = content.chars().count();
    if !(MIN_CONTENT..=MAX_CONTENT).contains(&length) {
        tracing::warn!(user_id = %user, length, "Validation error");
        return Err(ApiError::BadRequest(format!(
            "content must be between {} and {} characters",
            MIN_CONTENT, MAX_CONTENT
        )));
    }

    let post = state.posts.create(&user, content, request.media_ids);

    state
        .ctx
        .relay()
        .publish(
            EventType::POST_CREATED,
            &PostCreated {
                post_id: post.id.clone(),
                user_id: post.user.clone(),
                content: post.content.clone(),
                created_at: post.created_at,
            },
        )
        .await;

    tracing::info!(post_id = %post.id, user_id = %user, "Post created successfully");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Post created successfully",
            "post": post,
        })),
    ))
}

async fn list_posts(
    State(state): State<PostsState>,
    _user: GatewayUser,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let (posts, total) = state.posts.page(page, limit);

    Json(json!({
        "posts": posts,
        "currentPage": page,
        "totalPages": total.div_ceil(limit),
        "totalPosts": total,
    }))
}

async fn get_post(
    State(state): State<PostsState>,
    _user: GatewayUser,
    Path(id): Path<String>,
) -> Result<Json<Post>, ApiError> {
    state
        .posts
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))
}

async fn delete_post(
    State(state): State<PostsState>,
    GatewayUser(user): GatewayUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let post = state
        .posts
        .delete(&id, &user)
        .ok_or_else(|| ApiError::NotFound("Post not found".to_string()))?;

    state
        .ctx
        .relay()
        .publish(
            EventType::POST_DELETED,
            &PostDeleted {
                post_id: post.id.clone(),
                user_id: post.user.clone(),
                media_ids: post.media_ids.clone(),
            },
        )
        .await;

    tracing::info!(post_id = %post.id, user_id = %user, "Post deleted successfully");

    Ok(Json(json!({
        "success": true,
        "message": "Post deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_requires_owner() {
        let repo = PostRepository::new();
        let post = repo.create("alice", "hello world", vec![]);

        assert!(repo.delete(&post.id, "mallory").is_none());
        assert_eq!(repo.len(), 1);

        assert_eq!(repo.delete(&post.id, "alice"), Some(post.clone()));
        assert!(repo.delete(&post.id, "alice").is_none());
        assert!(repo.is_empty());
    }

    #[test]
    fn test_page_is_newest_first() {
        let repo = PostRepository::new();
        let first = repo.create("alice", "first post", vec![]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = repo.create("alice", "second post", vec![]);

        let (page, total) = repo.page(1, 1);
        assert_eq!(total, 2);
        assert_eq!(page, vec![second]);

        let (page, _) = repo.page(2, 1);
        assert_eq!(page, vec![first]);

        let (page, _) = repo.page(3, 1);
        assert!(page.is_empty());
    }
}
