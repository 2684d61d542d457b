// Client for the item directory service
pub mod directory;
pub mod retry;

// Re-export common types
pub use directory::{ApiPost, CreatePost, DirectoryError, ItemDirectoryClient};
pub use retry::RetryConfig;
