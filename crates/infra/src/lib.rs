//! Infrastructure layer: bundle storage, command orchestration, config.

pub mod config;
pub mod error;
pub mod service;
pub mod store;

pub use config::{AppConfig, ConfigError, LogFormat, StoreConfig};
pub use error::CommandError;
pub use service::BundleService;
pub use store::{BundleStore, InMemoryBundleStore, PostgresBundleStore, StoreError};
