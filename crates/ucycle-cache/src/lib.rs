// SQLite-backed key-value store
// Everything the device remembers between runs ends up here

pub mod cache;

pub use cache::SqliteStore;
