pub mod blob_cache;
pub mod database;
pub mod registry;

pub use blob_cache::BlobCache;
pub use database::{Database, Definitions};
pub use registry::{DatabaseResolver, Databases};

pub use lsif_cache::CacheStats;
pub use lsif_core::{LsifError, Result};
