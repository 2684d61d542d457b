// Directory provider - bridges the API client with the ItemSource trait
use async_trait::async_trait;
use tracing::warn;
use ucycle_api::{ApiPost, CreatePost, DirectoryError, ItemDirectoryClient};

use crate::{
    error::FeedFetchError,
    feed::ItemSource,
    models::{Category, Item, ItemDraft, ItemStatus, LocationPoint},
    Error, Result,
};

/// Wrapper around ItemDirectoryClient that implements ItemSource
pub struct DirectoryItemSource {
    client: ItemDirectoryClient,
}

impl DirectoryItemSource {
    pub fn new(client: ItemDirectoryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemSource for DirectoryItemSource {
    async fn fetch_items(&self) -> std::result::Result<Vec<Item>, FeedFetchError> {
        let posts = self.client.list_posts().await.map_err(|e| {
            if e.is_timeout() {
                FeedFetchError::Timeout
            } else {
                FeedFetchError::Request(e.to_string())
            }
        })?;

        Ok(posts.into_iter().filter_map(post_to_item).collect())
    }

    async fn mark_collected(&self, item_id: &str) -> Result<()> {
        self.client
            .mark_collected(item_id)
            .await
            .map_err(|e| match e {
                DirectoryError::NotFound(id) => Error::NotFound(id),
                other => Error::ApiError(other.to_string()),
            })
    }

    async fn create_item(&self, draft: ItemDraft, location: LocationPoint) -> Result<Item> {
        let request = draft_to_request(draft, location);
        let post = self
            .client
            .create_post(&request)
            .await
            .map_err(|e| Error::ApiError(e.to_string()))?;

        post_to_item(post).ok_or_else(|| {
            Error::ApiError("directory returned a post with an unknown status".to_string())
        })
    }
}

/// Convert a directory post to our internal Item model
///
/// Posts with a status we don't recognise are dropped rather than failing the
/// whole refresh.
fn post_to_item(post: ApiPost) -> Option<Item> {
    let status = match post.status.as_str() {
        "active" => ItemStatus::Active,
        // Expiry is derived from expires_at on our side
        "expired" => ItemStatus::Active,
        "collected" => ItemStatus::Collected,
        "removed" => ItemStatus::Removed,
        other => {
            warn!("Skipping post {} with unknown status '{}'", post.id, other);
            return None;
        }
    };

    Some(Item {
        id: post.id,
        title: post.title,
        category: Category::from_wire(&post.category),
        description: post.description,
        latitude: post.latitude,
        longitude: post.longitude,
        status,
        created_at: post.created_at,
        expires_at: post.expires_at,
    })
}

fn draft_to_request(draft: ItemDraft, location: LocationPoint) -> CreatePost {
    CreatePost {
        image_base64: draft.image_base64,
        images: if draft.extra_images.is_empty() {
            None
        } else {
            Some(draft.extra_images)
        },
        title: draft.title,
        category: draft.category.as_str().to_string(),
        description: draft.description,
        expiry_hours: draft.expiry_hours,
        latitude: location.latitude,
        longitude: location.longitude,
    }
}
