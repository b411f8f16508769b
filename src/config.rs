use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::ports::CertificateSource;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub signing: SigningConfig,
    #[serde(default)]
    pub software_store: Option<SoftwareStoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Store used when a request does not name one.
    #[serde(default)]
    pub source: CertificateSource,
    #[serde(default)]
    pub provider_timeout_secs: Option<u64>,
    pub max_concurrent_reads: usize,
}

/// PEM material served by the OpenSSL software provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoftwareStoreConfig {
    /// Certificates exposed as key containers.
    #[serde(default)]
    pub container: Vec<KeyEntryConfig>,
    /// Registered stores, keyed by store name.
    #[serde(default)]
    pub registered: HashMap<String, Vec<KeyEntryConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyEntryConfig {
    pub certificate: PathBuf,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("signing.source", "container")?
            .set_default("signing.max_concurrent_reads", 8)?
            .add_source(File::with_name("config/signing").required(false));

        // Explicit overrides replace the process environment so tests stay isolated
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Format: APP_SIGNING__PROVIDER_TIMEOUT_SECS
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::RegisteredStore;

    #[test]
    fn test_default_config() {
        let config = Config::load_with_sources(Some(HashMap::new())).expect("Failed to load config");

        assert_eq!(config.signing.source, CertificateSource::Container);
        assert_eq!(config.signing.provider_timeout_secs, None);
        assert_eq!(config.signing.max_concurrent_reads, 8);
        assert!(config.software_store.is_none());
    }

    #[test]
    fn test_override_config() {
        let mut env_vars = HashMap::new();
        env_vars.insert(
            "signing.provider_timeout_secs".to_string(),
            "30".to_string(),
        );
        env_vars.insert("signing.max_concurrent_reads".to_string(), "2".to_string());

        let config = Config::load_with_sources(Some(env_vars)).expect("Failed to load config");

        assert_eq!(config.signing.provider_timeout_secs, Some(30));
        assert_eq!(config.signing.max_concurrent_reads, 2);
        assert_eq!(config.signing.source, CertificateSource::Container);
    }

    #[test]
    fn test_registered_source_deserialization() {
        let config: SigningConfig = serde_json::from_str(
            r#"{"source": {"registered": {"name": "My"}}, "max_concurrent_reads": 4}"#,
        )
        .unwrap();

        assert_eq!(
            config.source,
            CertificateSource::Registered(RegisteredStore::personal())
        );
        assert_eq!(config.provider_timeout_secs, None);
    }
}
