//! Configuration module
//!
//! - `types`: typed configuration sections with serde defaults
//! - `io`: file + environment loading, flat env overrides
//! - `validation`: startup validation pass

mod io;
mod types;
mod validation;

pub use io::{apply_env_overrides, load_config};
pub use types::{
    BusConfig, Config, DatabaseConfig, EmbeddingConfig, GatewayConfig, LlmConfig, RegistryConfig,
    SagaConfig, StateStoreConfig,
};
pub use validation::{validate_config, ConfigValidationResult};
