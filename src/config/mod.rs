//! Configuration loading and validation

mod parser;
mod types;
mod validation;

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use types::{
    Config, CrawlerConfig, MigrationConfig, ProxyConfig, ScalingConfig, SeedsConfig,
    SessionPoolConfig, StorageConfig,
};
pub use validation::validate;
