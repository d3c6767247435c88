//! Application configuration

use crate::cli::{Cli, Commands};
use dlpstream_core::Likelihood;
use dlpstream_pipeline::PipelineConfig;
use dlpstream_redaction::HttpRedactionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of `dlpstream.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Batching, retry, polling and sink settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Redaction backend
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Remote log store, required by `dlpstream logs`
    #[serde(default)]
    pub log_store: Option<LogStoreConfig>,
}

/// Redaction backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Remote service; the built-in pattern redactor is used when unset
    #[serde(default)]
    pub service: Option<HttpRedactionConfig>,

    #[serde(default)]
    pub min_likelihood: Likelihood,
}

/// Remote log store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    pub endpoint: String,

    #[serde(default = "default_log_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl AppConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: &str, cli: &Cli) -> anyhow::Result<Self> {
        // A missing file means defaults
        let mut config: Self = if Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            if content.trim().is_empty() {
                Self::default()
            } else {
                serde_yaml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {}", config_path, e))?
            }
        } else {
            Self::default()
        };

        // Apply CLI overrides
        if let Some(likelihood) = cli.min_likelihood {
            config.classifier.min_likelihood = likelihood;
        }

        if let Some(endpoint) = &cli.classifier_endpoint {
            match &mut config.classifier.service {
                Some(service) => service.endpoint = endpoint.clone(),
                None => config.classifier.service = Some(HttpRedactionConfig::new(endpoint.clone())),
            }
        }

        if let Commands::Logs {
            log_store: Some(endpoint),
            ..
        } = &cli.command
        {
            match &mut config.log_store {
                Some(store) => store.endpoint = endpoint.clone(),
                None => {
                    config.log_store = Some(LogStoreConfig {
                        endpoint: endpoint.clone(),
                        timeout_ms: default_log_store_timeout_ms(),
                    })
                }
            }
        }

        Ok(config)
    }
}

fn default_log_store_timeout_ms() -> u64 {
    10_000
}
