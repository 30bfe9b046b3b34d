//! Configuration loading
//!
//! Sources, later wins: built-in defaults, an optional `sqlsight.toml`,
//! `SQLSIGHT__`-prefixed environment sections, and finally the well-known
//! flat variables (`LLM_API_KEY`, `STATE_STORE_URL`, `BUS_URL`,
//! `REGISTRY_URL`, `MOCK_LLM`, `DATABASE_URL`).

use secrecy::SecretString;
use tracing::debug;

use crate::error::Result;

use super::types::Config;

/// Load configuration from file and environment
pub fn load_config() -> Result<Config> {
    // A .env file is a convenience for local runs; absence is fine.
    dotenvy::dotenv().ok();

    let builder = config::Config::builder()
        .add_source(config::File::with_name("sqlsight").required(false))
        .add_source(
            config::Environment::with_prefix("SQLSIGHT")
                .separator("__")
                .try_parsing(true),
        );

    let mut loaded: Config = builder.build()?.try_deserialize()?;
    apply_env_overrides(&mut loaded);
    Ok(loaded)
}

/// Apply the flat, well-known environment variables
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(key) = std::env::var("LLM_API_KEY") {
        config.llm.api_key = SecretString::from(key);
    }
    if let Ok(url) = std::env::var("STATE_STORE_URL") {
        config.state_store.url = url;
    }
    if let Ok(url) = std::env::var("BUS_URL") {
        config.bus.url = url;
    }
    if let Ok(url) = std::env::var("REGISTRY_URL") {
        config.registry.url = url;
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Ok(mock) = std::env::var("MOCK_LLM") {
        config.llm.mock = matches!(mock.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        if config.llm.mock {
            debug!("MOCK_LLM set; using the deterministic LLM client");
        }
    }
}
