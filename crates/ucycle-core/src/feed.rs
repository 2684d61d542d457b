// Last known listing snapshot plus the refresh that replaces it
use crate::error::FeedFetchError;
use crate::models::{Item, ItemDraft, ItemStatus, LocationPoint};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where listings come from
///
/// The directory implements this; tests script it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Full list of currently listed items
    async fn fetch_items(&self) -> std::result::Result<Vec<Item>, FeedFetchError>;

    /// Flip an active item to collected
    async fn mark_collected(&self, item_id: &str) -> Result<()>;

    /// Publish a new item at `location`
    async fn create_item(&self, draft: ItemDraft, location: LocationPoint) -> Result<Item>;
}

/// Side-channel view of refresh health
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<FeedFetchError>,
    pub consecutive_failures: u32,
}

impl FeedHealth {
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// Holds the most recently fetched listings
///
/// A failed refresh never clears the snapshot; readers keep seeing the last
/// good list and the failure shows up on the health channel instead.
pub struct ItemFeedStore {
    source: Arc<dyn ItemSource>,
    snapshot: RwLock<Arc<Vec<Item>>>,
    health: watch::Sender<FeedHealth>,
}

impl ItemFeedStore {
    pub fn new(source: Arc<dyn ItemSource>) -> Self {
        let (health, _) = watch::channel(FeedHealth::default());
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            health,
        }
    }

    /// Last successfully fetched list
    pub fn current(&self) -> Arc<Vec<Item>> {
        match self.snapshot.read() {
            Ok(snapshot) => Arc::clone(&*snapshot),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn find(&self, item_id: &str) -> Option<Item> {
        self.current().iter().find(|i| i.id == item_id).cloned()
    }

    /// Refresh, swallowing failure: on error the previous snapshot comes back
    pub async fn refresh(&self) -> Arc<Vec<Item>> {
        match self.try_refresh().await {
            Ok(items) => items,
            Err(_) => self.current(),
        }
    }

    /// Refresh and tell the caller whether it worked
    pub async fn try_refresh(&self) -> std::result::Result<Arc<Vec<Item>>, FeedFetchError> {
        match self.source.fetch_items().await {
            Ok(items) => {
                let merged = Arc::new(self.merge_monotonic(items));
                self.replace(Arc::clone(&merged));
                debug!("Feed refreshed: {} items", merged.len());

                self.health.send_modify(|h| {
                    h.last_success = Some(Utc::now());
                    h.last_error = None;
                    h.consecutive_failures = 0;
                });
                Ok(merged)
            }
            Err(e) => {
                warn!("Feed refresh failed, keeping previous snapshot: {}", e);
                self.health.send_modify(|h| {
                    h.last_error = Some(e.clone());
                    h.consecutive_failures += 1;
                });
                Err(e)
            }
        }
    }

    pub fn health(&self) -> FeedHealth {
        self.health.borrow().clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<FeedHealth> {
        self.health.subscribe()
    }

    /// Claim an item and reflect it in the snapshot straight away
    pub async fn mark_collected(&self, item_id: &str) -> Result<()> {
        if let Some(item) = self.find(item_id) {
            if !item.status.can_transition_to(ItemStatus::Collected) {
                return Err(crate::Error::InvalidTransition {
                    id: item_id.to_string(),
                    from: item.status.to_string(),
                    to: ItemStatus::Collected.to_string(),
                });
            }
        }

        self.source.mark_collected(item_id).await?;
        info!("Marked {} as collected", item_id);

        self.update(|items| {
            if let Some(item) = items.iter_mut().find(|i| i.id == item_id) {
                item.status = item.status.advance(ItemStatus::Collected);
            }
        });
        Ok(())
    }

    /// Publish an item and add it to the snapshot
    pub async fn create(&self, draft: ItemDraft, location: LocationPoint) -> Result<Item> {
        let item = self.source.create_item(draft, location).await?;
        info!("Published {} ({})", item.title, item.id);

        let created = item.clone();
        self.update(move |items| items.push(created));
        Ok(item)
    }

    /// Keep statuses moving forward even if the directory reports an older one
    fn merge_monotonic(&self, mut fresh: Vec<Item>) -> Vec<Item> {
        let previous = self.current();
        let known: HashMap<&str, ItemStatus> =
            previous.iter().map(|i| (i.id.as_str(), i.status)).collect();

        for item in fresh.iter_mut() {
            if let Some(&before) = known.get(item.id.as_str()) {
                let merged = before.advance(item.status);
                if merged != item.status {
                    warn!(
                        "Directory reports {} as {} after {}; keeping {}",
                        item.id, item.status, before, merged
                    );
                    item.status = merged;
                }
            }
        }

        fresh
    }

    fn replace(&self, items: Arc<Vec<Item>>) {
        match self.snapshot.write() {
            Ok(mut snapshot) => *snapshot = items,
            Err(poisoned) => *poisoned.into_inner() = items,
        }
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<Item>),
    {
        let mut items = (*self.current()).clone();
        f(&mut items);
        self.replace(Arc::new(items));
    }
}
