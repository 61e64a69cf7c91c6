//! Payloads of the events exchanged between services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload of `post.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreated {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Payload of `post.deleted`.
///
/// `media_ids` lists the media attached to the post; the media service
/// removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeleted {
    pub post_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
}
