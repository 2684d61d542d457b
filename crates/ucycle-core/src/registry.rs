// Locally persisted bookkeeping: favorites, own posts, seen posts, and the
// notifications switch
use crate::error::PersistenceError;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

const NOTIFICATIONS_KEY: &str = "ucycle.notifications_enabled";

/// Port to the device's durable key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

impl KeyValueStore for ucycle_cache::SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        ucycle_cache::SqliteStore::get(self, key).map_err(|e| PersistenceError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        ucycle_cache::SqliteStore::set(self, key, value).map_err(|e| PersistenceError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Process-local store, gone when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let values = self.values.lock().map_err(|_| PersistenceError::Read {
            key: key.to_string(),
            reason: "store lock poisoned".into(),
        })?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut values = self.values.lock().map_err(|_| PersistenceError::Write {
            key: key.to_string(),
            reason: "store lock poisoned".into(),
        })?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The id sets we keep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Registry {
    /// Toggled by the user
    Favorites,
    /// Items this device created and still waits to hear are collected
    OwnedPosts,
    /// Items already evaluated for a "nearby" notification. Only grows.
    Seen,
}

impl Registry {
    pub fn storage_key(&self) -> &'static str {
        match self {
            Registry::Favorites => "ucycle.favorites",
            Registry::OwnedPosts => "ucycle.owned_posts",
            Registry::Seen => "ucycle.seen_posts",
        }
    }

    pub fn all() -> [Registry; 3] {
        [Registry::Favorites, Registry::OwnedPosts, Registry::Seen]
    }
}

#[derive(Debug)]
struct RegistryState {
    favorites: BTreeSet<String>,
    owned: BTreeSet<String>,
    seen: BTreeSet<String>,
    notifications_enabled: bool,
}

impl RegistryState {
    fn set(&self, registry: Registry) -> &BTreeSet<String> {
        match registry {
            Registry::Favorites => &self.favorites,
            Registry::OwnedPosts => &self.owned,
            Registry::Seen => &self.seen,
        }
    }

    fn set_mut(&mut self, registry: Registry) -> &mut BTreeSet<String> {
        match registry {
            Registry::Favorites => &mut self.favorites,
            Registry::OwnedPosts => &mut self.owned,
            Registry::Seen => &mut self.seen,
        }
    }
}

/// Shared registry state, loaded once and written through on every change
///
/// Every mutating call persists the touched registry before it returns.
/// A failed write is logged and the in-memory state kept; the next mutation
/// writes the whole set again.
pub struct RegistryStore {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<RegistryState>,
}

impl RegistryStore {
    /// Load every registry. Missing or unreadable values start empty.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let state = RegistryState {
            favorites: load_set(store.as_ref(), Registry::Favorites),
            owned: load_set(store.as_ref(), Registry::OwnedPosts),
            seen: load_set(store.as_ref(), Registry::Seen),
            notifications_enabled: load_flag(store.as_ref(), NOTIFICATIONS_KEY, true),
        };

        debug!(
            "Registries loaded: {} favorites, {} owned, {} seen, notifications {}",
            state.favorites.len(),
            state.owned.len(),
            state.seen.len(),
            if state.notifications_enabled { "on" } else { "off" }
        );

        Self {
            store,
            state: Mutex::new(state),
        }
    }

    /// Fresh registries backed by memory only
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStore::new()))
    }

    pub fn contains(&self, registry: Registry, id: &str) -> bool {
        self.state().set(registry).contains(id)
    }

    pub fn len(&self, registry: Registry) -> usize {
        self.state().set(registry).len()
    }

    pub fn is_empty(&self, registry: Registry) -> bool {
        self.len(registry) == 0
    }

    /// Copy of a registry's current ids
    pub fn snapshot(&self, registry: Registry) -> BTreeSet<String> {
        self.state().set(registry).clone()
    }

    /// Returns true if the id was not there before
    pub fn add(&self, registry: Registry, id: &str) -> bool {
        self.add_all(registry, std::iter::once(id)) == 1
    }

    /// Returns true if the id was there
    #[cfg(test)]
    pub fn remove(&self, registry: Registry, id: &str) -> bool {
        self.remove_all(registry, std::iter::once(id)) == 1
    }

    /// Add several ids with a single write. Returns how many were new.
    pub fn add_all<'a, I>(&self, registry: Registry, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state();
        let set = state.set_mut(registry);
        let added = ids
            .into_iter()
            .filter(|id| set.insert((*id).to_string()))
            .count();

        if added > 0 {
            self.persist_set(registry, state.set(registry));
        }
        added
    }

    /// Remove several ids with a single write. Returns how many were present.
    pub fn remove_all<'a, I>(&self, registry: Registry, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.state();
        let set = state.set_mut(registry);
        let removed = ids.into_iter().filter(|id| set.remove(*id)).count();

        if removed > 0 {
            self.persist_set(registry, state.set(registry));
        }
        removed
    }

    /// Flip favorite membership. Returns whether the id is now a favorite.
    pub fn toggle_favorite(&self, id: &str) -> bool {
        let mut state = self.state();
        let favorites = state.set_mut(Registry::Favorites);
        let now_favorite = if favorites.remove(id) {
            false
        } else {
            favorites.insert(id.to_string());
            true
        };

        self.persist_set(Registry::Favorites, state.set(Registry::Favorites));
        now_favorite
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.contains(Registry::Favorites, id)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.state().notifications_enabled
    }

    pub fn set_notifications_enabled(&self, enabled: bool) {
        let mut state = self.state();
        state.notifications_enabled = enabled;
        self.persist_value(NOTIFICATIONS_KEY, &enabled.to_string());
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // Mutations never leave a set half-updated, so a poisoned lock still
        // holds consistent data
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_set(&self, registry: Registry, ids: &BTreeSet<String>) {
        match serde_json::to_string(ids) {
            Ok(encoded) => self.persist_value(registry.storage_key(), &encoded),
            Err(e) => warn!("Failed to encode {}: {}", registry.storage_key(), e),
        }
    }

    fn persist_value(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("{}", e);
        }
    }
}

fn load_set(store: &dyn KeyValueStore, registry: Registry) -> BTreeSet<String> {
    let key = registry.storage_key();
    match store.get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring corrupt {}: {}", key, e);
            BTreeSet::new()
        }),
        Ok(None) => BTreeSet::new(),
        Err(e) => {
            warn!("{}", e);
            BTreeSet::new()
        }
    }
}

fn load_flag(store: &dyn KeyValueStore, key: &str, default: bool) -> bool {
    match store.get(key) {
        Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring corrupt {}: {:?}", key, raw);
            default
        }),
        Ok(None) => default,
        Err(e) => {
            warn!("{}", e);
            default
        }
    }
}
