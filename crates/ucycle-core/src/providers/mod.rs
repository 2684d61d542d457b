// Item source implementations
pub mod directory;

pub use directory::DirectoryItemSource;
