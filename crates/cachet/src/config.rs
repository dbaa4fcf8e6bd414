//! Configuration loading

use anyhow::{Context, Result};
use cachet_core::{
    CacheDefaults, Codec, DEFAULT_MAX_ARG_COUNT, DEFAULT_MEMBER_SET_PREFIX,
    DEFAULT_REVERSE_INDEX_KEY, DEFAULT_SCHEDULE, Framing, KeyGenerator, PipelineConfig,
    RegistryConfig,
};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Prefix of environment overrides, e.g. `CACHET_STORE__URL`
const ENV_PREFIX: &str = "CACHET";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Defaults for operations that set no cache name or expiry
    #[serde(default)]
    pub defaults: CacheDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Redis,
    /// In-process store; nothing outlives the process
    Memory,
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            url: default_store_url(),
        }
    }
}

/// Key generation and registry addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_max_arg_count")]
    pub max_arg_count: usize,
    #[serde(default = "default_member_set_prefix")]
    pub member_set_prefix: String,
    #[serde(default = "default_reverse_index_key")]
    pub reverse_index_key: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            max_arg_count: default_max_arg_count(),
            member_set_prefix: default_member_set_prefix(),
            reverse_index_key: default_reverse_index_key(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecConfig {
    #[serde(default)]
    pub framing: Framing,
}

/// Write pipeline sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Reconciler schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Cron expression with a leading seconds field
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            schedule: default_schedule(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address of the Prometheus scrape endpoint; disabled when unset
    #[serde(default)]
    pub prometheus_address: Option<String>,
}

/// `CACHET_` then `__` between nesting levels
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

// Default value functions
fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_max_arg_count() -> usize {
    DEFAULT_MAX_ARG_COUNT
}

fn default_member_set_prefix() -> String {
    DEFAULT_MEMBER_SET_PREFIX.to_string()
}

fn default_reverse_index_key() -> String {
    DEFAULT_REVERSE_INDEX_KEY.to_string()
}

fn default_workers() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_enabled() -> bool {
    true
}

fn default_schedule() -> String {
    DEFAULT_SCHEDULE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file, then apply `CACHET_*`
    /// environment overrides
    ///
    /// A missing file is not an error; defaults fill whatever is not set.
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: &str, environment: Environment) -> Result<Self> {
        let config_path = Path::new(path);
        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
        }

        let config: Config = config::Config::builder()
            .add_source(
                File::from(config_path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration from {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            member_set_prefix: self.keys.member_set_prefix.clone(),
            reverse_index_key: self.keys.reverse_index_key.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.pipeline.workers,
            queue_capacity: self.pipeline.queue_capacity,
        }
    }

    pub fn key_generator(&self) -> KeyGenerator {
        KeyGenerator::new(self.keys.max_arg_count)
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.codec.framing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(config.store.kind, StoreKind::Redis);
        assert_eq!(config.keys.max_arg_count, 5);
        assert_eq!(config.keys.member_set_prefix, "REDIS_CACHE_KEYS_OF_");
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.reconciler.schedule, "0 10 0 * * *");
        assert!(config.reconciler.enabled);
        assert_eq!(config.codec.framing, Framing::Tagged);
        assert!(config.metrics.prometheus_address.is_none());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
kind = "memory"

[keys]
max_arg_count = 3

[codec]
framing = "sniffed"

[reconciler]
enabled = false

[defaults]
cache_name = "shared"
expire = "1D"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.store.url, "redis://127.0.0.1:6379");
        assert_eq!(config.key_generator().max_arg_count(), 3);
        assert_eq!(config.codec().framing(), Framing::Sniffed);
        assert!(!config.reconciler.enabled);
        assert_eq!(config.defaults.cache_name.as_deref(), Some("shared"));
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.registry_config().reverse_index_key,
            "C7264226X_CACHE_NAME_OF_KEY_HASH"
        );
    }

    #[test]
    fn test_environment_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[store]\nurl = \"redis://from-file:6379\"").unwrap();

        let vars = [
            ("CACHET_STORE__URL", "redis://cache:6380"),
            ("CACHET_PIPELINE__WORKERS", "3"),
            ("CACHET_DEFAULTS__EXPIRE", "3H"),
            // Read by the CLI itself, not a configuration key
            ("CACHET_CONFIG", "elsewhere.toml"),
            ("OTHER_STORE__URL", "redis://ignored:1"),
        ];
        let environment = environment().source(Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));

        let config = Config::load_with(file.path().to_str().unwrap(), environment).unwrap();
        assert_eq!(config.store.url, "redis://cache:6380");
        assert_eq!(config.pipeline.workers, 3);
        assert_eq!(config.pipeline.queue_capacity, 1024);
        assert_eq!(config.defaults.expire.as_deref(), Some("3H"));
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[pipeline]\nworkers = \"many\"").unwrap();
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("max_arg_count = 5"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.pipeline.workers, 8);
    }
}
