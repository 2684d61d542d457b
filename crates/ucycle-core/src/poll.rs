// Background refresh-and-diff loop that turns feed changes into notices
use crate::error::FeedFetchError;
use crate::feed::ItemFeedStore;
use crate::geo::{distance_km, format_distance};
use crate::location::LocationProvider;
use crate::models::{is_expired, Item, ItemStatus};
use crate::notify::{NoticeKind, NotificationDispatcher};
use crate::registry::{Registry, RegistryStore};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    /// Much tighter than the browse radius
    pub nearby_radius_km: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            nearby_radius_km: 1.0,
        }
    }
}

/// Something a tick noticed
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Nearby {
        item_id: String,
        title: String,
        distance_km: f64,
    },
    Collected {
        item_id: String,
        title: String,
    },
}

impl PollEvent {
    pub fn item_id(&self) -> &str {
        match self {
            PollEvent::Nearby { item_id, .. } | PollEvent::Collected { item_id, .. } => item_id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            PollEvent::Nearby {
                title, distance_km, ..
            } => format!("New item nearby: {} ({} away)", title, format_distance(*distance_km)),
            PollEvent::Collected { title, .. } => format!("Your item \"{}\" was collected!", title),
        }
    }

    pub fn kind(&self) -> NoticeKind {
        match self {
            PollEvent::Nearby { .. } => NoticeKind::Nearby,
            PollEvent::Collected { .. } => NoticeKind::Collected,
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A previous tick was still fetching
    Busy,
    /// Torn down before or during the fetch; nothing was applied
    Stopped,
    FetchFailed(FeedFetchError),
    /// First successful fetch: everything already listed was marked seen
    Baseline {
        marked_seen: usize,
        events: Vec<PollEvent>,
    },
    Evaluated {
        events: Vec<PollEvent>,
    },
}

impl TickOutcome {
    pub fn events(&self) -> &[PollEvent] {
        match self {
            TickOutcome::Baseline { events, .. } | TickOutcome::Evaluated { events } => events,
            _ => &[],
        }
    }
}

/// Periodically refreshes the feed and raises nearby/collected notices
///
/// The first successful fetch of each instance is a baseline: every listed id
/// goes into the seen set without a notice, so existing listings never cause
/// a burst of alerts. Ticks never overlap; one that finds the previous fetch
/// still pending returns `TickOutcome::Busy`.
pub struct PollLoop {
    feed: Arc<ItemFeedStore>,
    registry: Arc<RegistryStore>,
    location: Arc<LocationProvider>,
    dispatcher: Arc<NotificationDispatcher>,
    settings: PollSettings,
    baselined: AtomicBool,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollLoop {
    pub fn new(
        feed: Arc<ItemFeedStore>,
        registry: Arc<RegistryStore>,
        location: Arc<LocationProvider>,
        dispatcher: Arc<NotificationDispatcher>,
        settings: PollSettings,
    ) -> Self {
        Self {
            feed,
            registry,
            location,
            dispatcher,
            settings,
            baselined: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn has_baseline(&self) -> bool {
        self.baselined.load(Ordering::Acquire)
    }

    /// Run one tick by hand
    pub async fn tick(&self) -> TickOutcome {
        self.run_tick(None).await
    }

    async fn run_tick(&self, stop: Option<&watch::Receiver<bool>>) -> TickOutcome {
        let stopped = || stop.map(|rx| *rx.borrow()).unwrap_or(false);

        if stopped() {
            return TickOutcome::Stopped;
        }

        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Previous poll tick still running, skipping");
            return TickOutcome::Busy;
        };

        let items = match self.feed.try_refresh().await {
            Ok(items) => items,
            // Next interval is the retry
            Err(e) => return TickOutcome::FetchFailed(e),
        };

        if stopped() {
            debug!("Poll loop stopped mid-fetch, discarding result");
            return TickOutcome::Stopped;
        }

        if !self.baselined.swap(true, Ordering::AcqRel) {
            let marked_seen = self
                .registry
                .add_all(Registry::Seen, items.iter().map(|i| i.id.as_str()));
            info!("Baseline: {} listings marked as seen", marked_seen);

            let events = self.detect_collected(&items);
            return TickOutcome::Baseline {
                marked_seen,
                events,
            };
        }

        let mut events = self.detect_nearby(&items);
        events.extend(self.detect_collected(&items));
        TickOutcome::Evaluated { events }
    }

    fn detect_nearby(&self, items: &[Item]) -> Vec<PollEvent> {
        let Some(center) = self.location.current_point() else {
            debug!("No current location, skipping nearby check");
            return Vec::new();
        };

        let now = Utc::now();
        let mut ids = BTreeSet::new();
        let mut events = Vec::new();

        for item in items {
            if item.status != ItemStatus::Active || is_expired(item, now) {
                continue;
            }
            if self.registry.contains(Registry::Seen, &item.id)
                || self.registry.contains(Registry::OwnedPosts, &item.id)
            {
                continue;
            }

            let distance = distance_km(center, item.location());
            if distance > self.settings.nearby_radius_km || !ids.insert(item.id.clone()) {
                continue;
            }

            events.push(PollEvent::Nearby {
                item_id: item.id.clone(),
                title: item.title.clone(),
                distance_km: distance,
            });
        }

        for event in &events {
            self.dispatcher.show(event.message(), event.kind());
        }
        self.registry
            .add_all(Registry::Seen, ids.iter().map(String::as_str));

        events
    }

    fn detect_collected(&self, items: &[Item]) -> Vec<PollEvent> {
        let owned = self.registry.snapshot(Registry::OwnedPosts);
        if owned.is_empty() {
            return Vec::new();
        }

        // Absent from the feed is not the same as collected; leave those alone
        let events: Vec<PollEvent> = items
            .iter()
            .filter(|item| owned.contains(&item.id) && item.status == ItemStatus::Collected)
            .map(|item| PollEvent::Collected {
                item_id: item.id.clone(),
                title: item.title.clone(),
            })
            .collect();

        for event in &events {
            self.dispatcher.show(event.message(), event.kind());
        }
        self.registry
            .remove_all(Registry::OwnedPosts, events.iter().map(PollEvent::item_id));

        events
    }

    /// Start ticking on the current runtime
    ///
    /// The first tick runs straight away. The loop ends when the handle is
    /// stopped or dropped, or when notifications get switched off.
    pub fn spawn(self: Arc<Self>) -> PollHandle {
        let (stop, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if !self.registry.notifications_enabled() {
                    info!("Notifications disabled, stopping poll loop");
                    break;
                }

                match self.run_tick(Some(&stop_rx)).await {
                    TickOutcome::Stopped => break,
                    TickOutcome::FetchFailed(e) => {
                        debug!("Poll tick skipped after failed fetch: {}", e)
                    }
                    TickOutcome::Busy => {}
                    outcome => debug!("Poll tick raised {} events", outcome.events().len()),
                }
            }

            debug!("Poll loop exited");
        });

        PollHandle {
            stop,
            task: Some(task),
        }
    }
}

/// Owner of a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    /// Ask the loop to stop. An in-flight fetch completes but is ignored.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop and wait for the loop task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Poll loop task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ItemSource, MockItemSource};
    use crate::location::{
        AcquireOptions, LocationSettings, MockGeoSensor, MockPermissionPort, PermissionState,
    };
    use crate::models::{Category, ItemDraft, LocationPoint, Position};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Notify;

    const HOME: LocationPoint = LocationPoint {
        latitude: -33.7507,
        longitude: 150.6944,
    };

    fn item(id: &str, km_south: f64, status: ItemStatus) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            title: format!("Item {}", id),
            category: Category::General,
            description: String::new(),
            latitude: HOME.latitude - km_south / 111.19,
            longitude: HOME.longitude,
            status,
            created_at: now,
            expires_at: now + ChronoDuration::hours(48),
        }
    }

    async fn located_provider() -> Arc<LocationProvider> {
        let mut sensor = MockGeoSensor::new();
        sensor.expect_is_supported().return_const(true);
        sensor
            .expect_current_position()
            .returning(|_| Ok(Position::new(HOME, Utc::now())));
        let mut permissions = MockPermissionPort::new();
        permissions
            .expect_check_permission()
            .return_const(PermissionState::Granted);

        let provider = LocationProvider::new(
            Arc::new(sensor),
            Arc::new(permissions),
            LocationSettings::default(),
        );
        provider.acquire(AcquireOptions::silent()).await.unwrap();
        Arc::new(provider)
    }

    fn unlocated_provider() -> Arc<LocationProvider> {
        let mut sensor = MockGeoSensor::new();
        sensor.expect_is_supported().return_const(true);
        Arc::new(LocationProvider::new(
            Arc::new(sensor),
            Arc::new(MockPermissionPort::new()),
            LocationSettings::default(),
        ))
    }

    fn poll_loop(
        source: impl ItemSource + 'static,
        registry: Arc<RegistryStore>,
        location: Arc<LocationProvider>,
    ) -> (Arc<PollLoop>, Arc<NotificationDispatcher>) {
        let dispatcher = Arc::new(NotificationDispatcher::default());
        let poll = PollLoop::new(
            Arc::new(ItemFeedStore::new(Arc::new(source))),
            registry,
            location,
            Arc::clone(&dispatcher),
            PollSettings::default(),
        );
        (Arc::new(poll), dispatcher)
    }

    fn scripted(rounds: Vec<Vec<Item>>) -> MockItemSource {
        let mut source = MockItemSource::new();
        let mut calls = 0;
        source.expect_fetch_items().returning(move || {
            let round = rounds[calls.min(rounds.len() - 1)].clone();
            calls += 1;
            Ok(round)
        });
        source
    }

    #[tokio::test]
    async fn test_baseline_then_nearby_once() {
        let first = vec![item("a", 0.2, ItemStatus::Active)];
        let mut second = first.clone();
        second.push(item("b", 0.5, ItemStatus::Active));
        second.push(item("far", 3.0, ItemStatus::Active));

        let registry = Arc::new(RegistryStore::in_memory());
        let (poll, dispatcher) = poll_loop(
            scripted(vec![first, second]),
            Arc::clone(&registry),
            located_provider().await,
        );

        let outcome = poll.tick().await;
        assert!(matches!(outcome, TickOutcome::Baseline { marked_seen: 1, .. }));
        assert!(dispatcher.current().is_none());

        let events = poll.tick().await.events().to_vec();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].item_id(), "b");
        assert_eq!(dispatcher.current().unwrap().message, "New item nearby: Item b (500m away)");
        assert!(registry.contains(Registry::Seen, "b"));
        assert!(!registry.contains(Registry::Seen, "far"));

        assert!(poll.tick().await.events().is_empty());
    }

    #[tokio::test]
    async fn test_own_and_inactive_items_never_nearby() {
        let mut expired = item("old", 0.1, ItemStatus::Active);
        expired.expires_at = Utc::now() - ChronoDuration::minutes(1);
        let rounds = vec![
            vec![],
            vec![
                item("mine", 0.1, ItemStatus::Active),
                item("gone", 0.1, ItemStatus::Collected),
                expired,
            ],
        ];

        let registry = Arc::new(RegistryStore::in_memory());
        registry.add(Registry::OwnedPosts, "mine");
        let (poll, _) = poll_loop(scripted(rounds), Arc::clone(&registry), located_provider().await);

        poll.tick().await;
        assert!(poll.tick().await.events().is_empty());
    }

    #[tokio::test]
    async fn test_missing_location_skips_nearby_only() {
        let rounds = vec![
            vec![item("mine", 0.1, ItemStatus::Active)],
            vec![
                item("mine", 0.1, ItemStatus::Collected),
                item("new", 0.1, ItemStatus::Active),
            ],
        ];

        let registry = Arc::new(RegistryStore::in_memory());
        registry.add(Registry::OwnedPosts, "mine");
        let (poll, _) = poll_loop(scripted(rounds), Arc::clone(&registry), unlocated_provider());

        poll.tick().await;
        let events = poll.tick().await.events().to_vec();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PollEvent::Collected { .. }));
        assert!(!registry.contains(Registry::Seen, "new"));
    }

    #[tokio::test]
    async fn test_failed_fetch_skips_tick_and_keeps_baseline_pending() {
        let mut source = MockItemSource::new();
        let mut calls = 0;
        source.expect_fetch_items().returning(move || {
            calls += 1;
            if calls == 1 {
                Err(FeedFetchError::Timeout)
            } else {
                Ok(vec![item("a", 0.1, ItemStatus::Active)])
            }
        });

        let registry = Arc::new(RegistryStore::in_memory());
        let (poll, dispatcher) = poll_loop(source, Arc::clone(&registry), located_provider().await);

        assert_eq!(poll.tick().await, TickOutcome::FetchFailed(FeedFetchError::Timeout));
        assert!(!poll.has_baseline());

        assert!(matches!(poll.tick().await, TickOutcome::Baseline { .. }));
        assert!(dispatcher.current().is_none());
    }

    struct GatedSource {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ItemSource for GatedSource {
        async fn fetch_items(&self) -> std::result::Result<Vec<Item>, FeedFetchError> {
            self.gate.notified().await;
            Ok(Vec::new())
        }

        async fn mark_collected(&self, _item_id: &str) -> crate::Result<()> {
            Ok(())
        }

        async fn create_item(&self, _draft: ItemDraft, _location: LocationPoint) -> crate::Result<Item> {
            Err(crate::Error::ApiError("read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let gate = Arc::new(Notify::new());
        let source = GatedSource {
            gate: Arc::clone(&gate),
        };
        let (poll, _) = poll_loop(source, Arc::new(RegistryStore::in_memory()), unlocated_provider());

        let slow = tokio::spawn({
            let poll = Arc::clone(&poll);
            async move { poll.tick().await }
        });
        while !poll.is_busy() {
            tokio::task::yield_now().await;
        }

        assert_eq!(poll.tick().await, TickOutcome::Busy);

        gate.notify_one();
        assert!(matches!(slow.await.unwrap(), TickOutcome::Baseline { .. }));
        assert!(!poll.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_loop_stops_when_notifications_disabled() {
        let registry = Arc::new(RegistryStore::in_memory());
        let (poll, _) = poll_loop(
            scripted(vec![vec![item("a", 0.1, ItemStatus::Active)]]),
            Arc::clone(&registry),
            unlocated_provider(),
        );

        let handle = Arc::clone(&poll).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(poll.has_baseline());

        registry.set_notifications_enabled(false);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_ends_loop() {
        let (poll, _) = poll_loop(
            scripted(vec![vec![]]),
            Arc::new(RegistryStore::in_memory()),
            unlocated_provider(),
        );

        let handle = Arc::clone(&poll).spawn();
        tokio::time::sleep(Duration::from_secs(65)).await;
        handle.shutdown().await;
    }
}
