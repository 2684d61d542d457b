// The listings board - what the CLI (or any other front end) talks to
use crate::config::Config;
use crate::feed::{FeedHealth, ItemFeedStore, ItemSource};
use crate::geo::{display_set, format_distance, DisplayFilter};
use crate::location::{AcquireOptions, GeoSensor, LocationProvider, PermissionPort};
use crate::models::{time_left, EffectiveStatus, Item, ItemDraft, Position};
use crate::notify::{AudioCue, NotificationDispatcher};
use crate::poll::{PollHandle, PollLoop};
use crate::registry::{KeyValueStore, Registry, RegistryStore};
use crate::Result;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// The outside world the board needs
pub struct BoardPorts {
    pub source: Arc<dyn ItemSource>,
    pub sensor: Arc<dyn GeoSensor>,
    pub permissions: Arc<dyn PermissionPort>,
    pub store: Arc<dyn KeyValueStore>,
    pub audio: Option<Arc<dyn AudioCue>>,
}

/// One row of the browse view
#[derive(Debug, Clone, PartialEq)]
pub struct ListedItem {
    pub item: Item,
    pub distance_km: Option<f64>,
    pub favorite: bool,
}

impl ListedItem {
    pub fn formatted_distance(&self) -> Option<String> {
        self.distance_km.map(format_distance)
    }

    pub fn time_left(&self) -> String {
        time_left(&self.item, Utc::now())
    }

    pub fn status(&self) -> EffectiveStatus {
        self.item.effective_status(Utc::now())
    }
}

/// Wires location, feed, registries, notices and the poll loop together
///
/// Polling runs only while notifications are enabled. Dropping the board
/// stops the loop.
pub struct ListingsBoard {
    location: Arc<LocationProvider>,
    feed: Arc<ItemFeedStore>,
    registry: Arc<RegistryStore>,
    dispatcher: Arc<NotificationDispatcher>,
    poll: Arc<PollLoop>,
    poller: Mutex<Option<PollHandle>>,
}

impl ListingsBoard {
    /// Load registries from `ports.store` and build every component
    pub fn new(ports: BoardPorts, config: &Config) -> Self {
        let mut dispatcher = NotificationDispatcher::new(config.notice_duration());
        if let Some(audio) = ports.audio {
            dispatcher = dispatcher.with_audio(audio);
        }
        let dispatcher = Arc::new(dispatcher);

        let location = Arc::new(
            LocationProvider::new(ports.sensor, ports.permissions, config.location_settings())
                .with_notices(Arc::clone(&dispatcher)),
        );
        let feed = Arc::new(ItemFeedStore::new(ports.source));
        let registry = Arc::new(RegistryStore::load(ports.store));

        let poll = Arc::new(PollLoop::new(
            Arc::clone(&feed),
            Arc::clone(&registry),
            Arc::clone(&location),
            Arc::clone(&dispatcher),
            config.poll_settings(),
        ));

        Self {
            location,
            feed,
            registry,
            dispatcher,
            poll,
            poller: Mutex::new(None),
        }
    }

    /// Update the shared location
    pub async fn locate(&self, options: AcquireOptions) -> Result<Position> {
        Ok(self.location.acquire(options).await?)
    }

    /// Refresh the feed. On failure the previous snapshot comes back.
    pub async fn refresh(&self) -> Arc<Vec<Item>> {
        self.feed.refresh().await
    }

    /// Browse view over the current snapshot
    pub fn display_set(&self, filter: &DisplayFilter) -> Vec<ListedItem> {
        let items = self.feed.current();
        let favorites = self.registry.snapshot(Registry::Favorites);

        display_set(
            &items,
            self.location.current_point(),
            filter,
            &favorites,
            Utc::now(),
        )
        .into_iter()
        .map(|nearby| ListedItem {
            favorite: favorites.contains(&nearby.item.id),
            item: nearby.item.clone(),
            distance_km: nearby.distance_km,
        })
        .collect()
    }

    /// Publish a listing at the device's current spot and remember it's ours
    ///
    /// Needs a fresh fix; a stale cached reading could put the item in the
    /// wrong street.
    pub async fn post_item(&self, draft: ItemDraft) -> Result<Item> {
        let position = self.location.acquire(AcquireOptions::fresh()).await?;
        let item = self.feed.create(draft, position.point).await?;
        self.registry.add(Registry::OwnedPosts, &item.id);
        Ok(item)
    }

    /// Mark somebody's listing as picked up
    pub async fn claim(&self, item_id: &str) -> Result<()> {
        self.feed.mark_collected(item_id).await
    }

    /// Returns whether the item is now a favorite
    pub fn toggle_favorite(&self, item_id: &str) -> bool {
        self.registry.toggle_favorite(item_id)
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        self.registry.snapshot(Registry::Favorites)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.registry.notifications_enabled()
    }

    /// Persist the preference and start or stop polling to match
    pub fn set_notifications_enabled(&self, enabled: bool) {
        self.registry.set_notifications_enabled(enabled);
        if enabled {
            self.start_polling();
        } else {
            self.stop_polling();
        }
    }

    /// Start the poll loop if notifications are on and it isn't running yet.
    /// Must be called from inside a tokio runtime.
    pub fn start_polling(&self) -> bool {
        if !self.registry.notifications_enabled() {
            return false;
        }

        let mut poller = self.poller_slot();
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }

        info!(
            "Polling every {}s for items within {}km",
            self.poll.settings().interval.as_secs(),
            self.poll.settings().nearby_radius_km
        );
        *poller = Some(Arc::clone(&self.poll).spawn());
        true
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.poller_slot().take() {
            handle.stop();
            info!("Polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller_slot()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and wait for the loop to exit
    pub async fn shutdown(&self) {
        let handle = self.poller_slot().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    pub fn feed_health(&self) -> FeedHealth {
        self.feed.health()
    }

    pub fn location(&self) -> &Arc<LocationProvider> {
        &self.location
    }

    pub fn feed(&self) -> &Arc<ItemFeedStore> {
        &self.feed
    }

    pub fn registry(&self) -> &Arc<RegistryStore> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn poll(&self) -> &Arc<PollLoop> {
        &self.poll
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<PollHandle>> {
        self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockItemSource;
    use crate::location::{MockGeoSensor, MockPermissionPort, PermissionState};
    use crate::models::{Category, ItemStatus, LocationPoint};
    use crate::registry::MemoryStore;
    use chrono::Duration;

    const HOME: LocationPoint = LocationPoint {
        latitude: -33.7507,
        longitude: 150.6944,
    };

    fn item(id: &str, km_south: f64) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            title: format!("Item {}", id),
            category: Category::Furniture,
            description: String::new(),
            latitude: HOME.latitude - km_south / 111.19,
            longitude: HOME.longitude,
            status: ItemStatus::Active,
            created_at: now,
            expires_at: now + Duration::hours(48),
        }
    }

    fn draft() -> ItemDraft {
        ItemDraft {
            title: "Couch".into(),
            category: Category::Furniture,
            description: "Three seater".into(),
            expiry_hours: 48,
            image_base64: "aGk=".into(),
            extra_images: Vec::new(),
        }
    }

    fn board(source: MockItemSource, store: Arc<MemoryStore>) -> ListingsBoard {
        let mut sensor = MockGeoSensor::new();
        sensor.expect_is_supported().return_const(true);
        sensor
            .expect_current_position()
            .returning(|_| Ok(Position::new(HOME, Utc::now())));
        let mut permissions = MockPermissionPort::new();
        permissions
            .expect_check_permission()
            .return_const(PermissionState::Granted);

        ListingsBoard::new(
            BoardPorts {
                source: Arc::new(source),
                sensor: Arc::new(sensor),
                permissions: Arc::new(permissions),
                store,
                audio: None,
            },
            &Config::default(),
        )
    }

    #[tokio::test]
    async fn test_display_set_marks_favorites_and_sorts() {
        let mut source = MockItemSource::new();
        source
            .expect_fetch_items()
            .returning(|| Ok(vec![item("far", 8.0), item("near", 0.3), item("out", 15.0)]));

        let board = board(source, Arc::new(MemoryStore::new()));
        board.locate(AcquireOptions::silent()).await.unwrap();
        board.refresh().await;
        assert!(board.toggle_favorite("far"));

        let rows = board.display_set(&DisplayFilter::default());
        let ids: Vec<&str> = rows.iter().map(|r| r.item.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
        assert!(rows[1].favorite);
        assert_eq!(rows[0].formatted_distance().as_deref(), Some("300m"));

        let wider = DisplayFilter {
            radius_km: 20.0,
            ..DisplayFilter::default()
        };
        assert_eq!(board.display_set(&wider).len(), 3);
    }

    #[tokio::test]
    async fn test_post_item_records_ownership_once() {
        let mut source = MockItemSource::new();
        source
            .expect_create_item()
            .withf(|draft, location| draft.title == "Couch" && *location == HOME)
            .times(1)
            .returning(|_, _| Ok(item("new-post", 0.0)));

        let store = Arc::new(MemoryStore::new());
        let board = board(source, Arc::clone(&store));

        let posted = board.post_item(draft()).await.unwrap();
        assert_eq!(posted.id, "new-post");
        assert!(board.registry().contains(Registry::OwnedPosts, "new-post"));
        assert_eq!(board.registry().len(Registry::OwnedPosts), 1);
        assert!(board.feed().find("new-post").is_some());
    }

    #[tokio::test]
    async fn test_failed_post_records_nothing() {
        let mut source = MockItemSource::new();
        source
            .expect_create_item()
            .returning(|_, _| Err(crate::Error::ApiError("Invalid category".into())));

        let board = board(source, Arc::new(MemoryStore::new()));
        assert!(board.post_item(draft()).await.is_err());
        assert!(board.registry().is_empty(Registry::OwnedPosts));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_toggle_drives_polling() {
        let mut source = MockItemSource::new();
        source.expect_fetch_items().returning(|| Ok(Vec::new()));

        let board = board(source, Arc::new(MemoryStore::new()));
        assert!(board.start_polling());
        assert!(board.is_polling());

        board.set_notifications_enabled(false);
        assert!(!board.is_polling());
        assert!(!board.start_polling());

        board.set_notifications_enabled(true);
        assert!(board.is_polling());
        board.shutdown().await;
        assert!(!board.is_polling());
    }
}
