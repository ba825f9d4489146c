//! Stack configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::BackendKind;

/// Configuration for a [`StackRegistry`](crate::StackRegistry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Backend every counter map is created on
    pub backend: BackendKind,

    /// Prefix prepended to counter map names to form table names
    pub table_prefix: String,

    /// Relational connection URL (`sqlite::memory:`, `sqlite://path/to.db`)
    pub url: Option<String>,

    /// Run `system_setup` when a structure is first created
    pub auto_setup: bool,

    /// Period of the background maintenance sweep, `0` disables it
    pub maintenance_interval_ms: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            table_prefix: "KL_".to_string(),
            url: None,
            auto_setup: true,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl StackConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory backend
    pub fn memory() -> Self {
        Self::default()
    }

    /// Relational backend at `url`
    pub fn relational(url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Relational,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the table prefix
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Set the connection URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Enable or disable setup on first use
    pub fn with_auto_setup(mut self, enabled: bool) -> Self {
        self.auto_setup = enabled;
        self
    }

    /// Set the maintenance period in milliseconds
    pub fn with_maintenance_interval_ms(mut self, ms: u64) -> Self {
        self.maintenance_interval_ms = ms;
        self
    }

    /// Maintenance period, `None` when disabled
    pub fn maintenance_interval(&self) -> Option<Duration> {
        (self.maintenance_interval_ms > 0).then(|| Duration::from_millis(self.maintenance_interval_ms))
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if !self.table_prefix.is_empty()
            && !self
                .table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::Configuration(format!(
                "table_prefix '{}' may only contain ASCII letters, digits and '_'",
                self.table_prefix
            )));
        }

        if let Some(url) = &self.url {
            if url.trim().is_empty() {
                return Err(Error::Configuration("url cannot be empty".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StackConfig::default();
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.table_prefix, "KL_");
        assert!(config.auto_setup);
        assert_eq!(config.maintenance_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
backend: relational
url: "sqlite::memory:"
maintenance_interval_ms: 0
"#;
        let config = StackConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.backend, BackendKind::Relational);
        assert_eq!(config.url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(config.table_prefix, "KL_");
        assert_eq!(config.maintenance_interval(), None);
    }

    #[test]
    fn test_invalid_yaml() {
        let err = StackConfig::from_yaml_str("backend: [nope").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        let err = StackConfig::from_yaml_str("backend: redis").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_prefix() {
        assert!(StackConfig::new().with_table_prefix("").validate().is_ok());
        assert!(StackConfig::new().with_table_prefix("KL-").validate().is_err());
        assert!(StackConfig::new().with_url(" ").validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = StackConfig::relational("sqlite::memory:")
            .with_auto_setup(false)
            .with_maintenance_interval_ms(250);
        assert_eq!(config.backend, BackendKind::Relational);
        assert!(!config.auto_setup);
        assert_eq!(config.maintenance_interval(), Some(Duration::from_millis(250)));
    }
}
