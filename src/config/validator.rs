use crate::config::Config;
use crate::error::{FolioError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_daemon(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_agent(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FolioError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_daemon(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.daemon.socket_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "daemon.socket_path",
                "Socket path cannot be empty",
            ));
        }

        if config.daemon.max_connections == 0 {
            errors.push(ValidationError::new(
                "daemon.max_connections",
                "Max connections must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        match provider.as_str() {
            "fastembed" => {}
            "http" => {
                if config.embedding.endpoint.is_empty() {
                    errors.push(ValidationError::new(
                        "embedding.endpoint",
                        "Endpoint is required for the http provider",
                    ));
                }
            }
            _ => errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be 'fastembed' or 'http', got '{}'", provider),
            )),
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        let retry = &config.embedding.retry;
        if retry.max_attempts == 0 {
            errors.push(ValidationError::new(
                "embedding.retry.max_attempts",
                "At least one attempt is required",
            ));
        }

        if retry.initial_delay_ms > retry.max_delay_ms {
            errors.push(ValidationError::new(
                "embedding.retry.initial_delay_ms",
                format!(
                    "Initial delay ({}ms) exceeds max delay ({}ms)",
                    retry.initial_delay_ms, retry.max_delay_ms
                ),
            ));
        }

        if retry.multiplier < 1.0 {
            errors.push(ValidationError::new(
                "embedding.retry.multiplier",
                format!("Multiplier must be at least 1.0, got {}", retry.multiplier),
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.k == 0 {
            errors.push(ValidationError::new(
                "retrieval.k",
                "k must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.vector_weight) {
            errors.push(ValidationError::new(
                "retrieval.vector_weight",
                format!(
                    "Vector weight must be between 0.0 and 1.0, got {}",
                    retrieval.vector_weight
                ),
            ));
        }

        if retrieval.rrf_k.is_nan() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF constant must be non-negative, got {}", retrieval.rrf_k),
            ));
        }

        match retrieval.fingerprint.as_str() {
            "full" => {}
            "prefix" => {
                if retrieval.prefix_len == 0 {
                    errors.push(ValidationError::new(
                        "retrieval.prefix_len",
                        "Prefix length must be greater than 0",
                    ));
                }
            }
            other => errors.push(ValidationError::new(
                "retrieval.fingerprint",
                format!("Fingerprint must be 'full' or 'prefix', got '{}'", other),
            )),
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "Model cannot be empty"));
        }

        if !config.llm.base_url.starts_with("http://") && !config.llm.base_url.starts_with("https://")
        {
            errors.push(ValidationError::new(
                "llm.base_url",
                format!("Base URL must be http(s), got '{}'", config.llm.base_url),
            ));
        }

        if config.llm.idle_timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.idle_timeout_secs",
                "Idle timeout must be greater than 0",
            ));
        }
    }

    fn validate_agent(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.agent.max_cycles == 0 {
            errors.push(ValidationError::new(
                "agent.max_cycles",
                "At least one tool cycle is required",
            ));
        }
    }
}
