// Core listings logic - location, feed, proximity, registries and the poll loop
pub mod board;
pub mod config;
pub mod error;
pub mod feed;
pub mod geo;
pub mod location;
pub mod models;
pub mod notify;
pub mod poll;
pub mod providers;
pub mod registry;

pub use board::{BoardPorts, ListedItem, ListingsBoard};
pub use config::Config;
pub use error::{Error, FeedFetchError, LocationError, PersistenceError};
pub use feed::{FeedHealth, ItemFeedStore, ItemSource};
pub use geo::{display_set, distance_km, format_distance, within_radius, DisplayFilter, NearbyItem};
pub use location::{
    AcquireOptions, Capability, GeoSensor, LocationProvider, LocationSettings, PermissionPort,
    PermissionState, PositionOptions,
};
pub use models::{
    is_expired, time_left, Category, EffectiveStatus, Item, ItemDraft, ItemStatus, LocationPoint,
    Position,
};
pub use notify::{AudioCue, Notice, NoticeKind, NotificationDispatcher};
pub use poll::{PollEvent, PollHandle, PollLoop, PollSettings, TickOutcome};
pub use providers::DirectoryItemSource;
pub use registry::{KeyValueStore, MemoryStore, Registry, RegistryStore};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
