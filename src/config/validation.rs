//! Configuration validation

use secrecy::ExposeSecret;
use url::Url;

use super::types::Config;

/// Outcome of a validation pass
#[derive(Debug, Default)]
pub struct ConfigValidationResult {
    /// Problems that prevent startup
    pub errors: Vec<String>,
    /// Problems worth logging but not fatal
    pub warnings: Vec<String>,
}

impl ConfigValidationResult {
    /// Whether the configuration can boot
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a configuration before startup
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::default();

    if !config.llm.mock && config.llm.api_key.expose_secret().is_empty() {
        result
            .errors
            .push("LLM_API_KEY is required unless MOCK_LLM is set".to_string());
    }

    if Url::parse(&config.registry.url).is_err() {
        result
            .errors
            .push(format!("registry.url is not a valid URL: {}", config.registry.url));
    }
    if Url::parse(&config.llm.base_url).is_err() {
        result
            .errors
            .push(format!("llm.base_url is not a valid URL: {}", config.llm.base_url));
    }

    for (name, url) in [
        ("state_store.url", &config.state_store.url),
        ("bus.url", &config.bus.url),
    ] {
        if url != "memory://" && !url.starts_with("postgres://") && !url.starts_with("postgresql://")
        {
            result.warnings.push(format!(
                "{} '{}' is not a recognised backend; falling back to memory://",
                name, url
            ));
        }
    }

    if config.state_store.url.starts_with("postgres") && config.database.url.is_none() {
        result
            .errors
            .push("state_store.url selects PostgreSQL but DATABASE_URL is unset".to_string());
    }

    match config.embedding.backend.as_str() {
        "fastembed" | "hash" => {}
        other => result.errors.push(format!(
            "embedding.backend must be 'fastembed' or 'hash', found '{}'",
            other
        )),
    }

    if config.saga.max_iterations == 0 {
        result
            .errors
            .push("saga.max_iterations must be at least 1".to_string());
    }
    if !(-1.0..=1.0).contains(&config.chunker.similarity_threshold) {
        result
            .errors
            .push("chunker.similarity_threshold must be within [-1, 1]".to_string());
    }
    if config.chunker.max_chunk_size < 100 {
        result
            .warnings
            .push("chunker.max_chunk_size below 100 produces fragmentary chunks".to_string());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_default_config_needs_api_key() {
        let config = Config::default();
        let result = validate_config(&config);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("LLM_API_KEY"));
    }

    #[test]
    fn test_mock_mode_needs_no_key() {
        let mut config = Config::default();
        config.llm.mock = true;
        assert!(validate_config(&config).is_valid());
    }

    #[test]
    fn test_bad_values_are_reported() {
        let mut config = Config::default();
        config.llm.api_key = SecretString::from("sk-test");
        config.registry.url = "not a url".to_string();
        config.saga.max_iterations = 0;
        config.chunker.similarity_threshold = 2.0;
        config.embedding.backend = "word2vec".to_string();

        let result = validate_config(&config);
        assert_eq!(result.errors.len(), 4);
    }

    #[test]
    fn test_unrecognised_backend_warns() {
        let mut config = Config::default();
        config.llm.mock = true;
        config.bus.url = "redis://localhost".to_string();

        let result = validate_config(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }
}
