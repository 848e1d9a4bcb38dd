pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BackendFlags, CacheConfig, ConverterConfig, LoggingConfig, ServerConfig, Settings,
    StorageConfig,
};
pub use error::*;
pub use types::*;
