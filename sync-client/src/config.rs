//! Configuration loading for sync sessions.
//!
//! Configuration is loaded from a TOML file:
//!
//! ```toml
//! sync_code = "9f86d081884c7d659a2feaa0"
//! connect_timeout_secs = 10
//! merge_policy = "append"
//!
//! [bootstrap]
//! registration_timeout_secs = 5
//! max_retries = 3
//! ```
//!
//! Timeouts are seconds and may be fractional (`connect_timeout_secs = 1.5`).

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{generate_sync_code, BootstrapPolicy, MergePolicy, MAX_RETRIES};
use sync_types::SyncCode;

/// Root configuration for a sync session.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Shared secret; every device of one user holds the same code.
    pub sync_code: SyncCode,
    /// How long an outbound connection may take to open (default: 10s).
    #[serde(
        rename = "connect_timeout_secs",
        default = "default_connect_timeout",
        deserialize_with = "duration_from_secs"
    )]
    pub connect_timeout: Duration,
    /// How received tasks are merged (default: append).
    #[serde(default)]
    pub merge_policy: MergePolicy,
    /// Broker registration tunables.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Broker registration configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootstrapConfig {
    /// Acknowledgement timeout per attempt (default: 5s).
    #[serde(
        rename = "registration_timeout_secs",
        default = "default_registration_timeout",
        deserialize_with = "duration_from_secs"
    )]
    pub registration_timeout: Duration,
    /// Retries after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

// Default value functions
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_registration_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            registration_timeout: default_registration_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl BootstrapConfig {
    /// The policy handed to the bootstrap state machine.
    pub fn policy(&self) -> BootstrapPolicy {
        BootstrapPolicy {
            registration_timeout: self.registration_timeout,
            max_retries: self.max_retries,
        }
    }
}

impl SyncConfig {
    /// Configuration with default tunables for `sync_code`.
    pub fn new(sync_code: SyncCode) -> Self {
        Self {
            sync_code,
            connect_timeout: default_connect_timeout(),
            merge_policy: MergePolicy::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }

    /// Configuration for a brand-new sync group with a random code.
    pub fn generate() -> Result<Self, ConfigError> {
        let code = generate_sync_code().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self::new(code))
    }

    /// Set the outbound connection open timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Set the registration timeout and retry budget.
    pub fn with_bootstrap(mut self, registration_timeout: Duration, max_retries: u32) -> Self {
        self.bootstrap = BootstrapConfig {
            registration_timeout,
            max_retries,
        };
        self
    }

    /// Outbound connection open timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Bootstrap policy derived from the `[bootstrap]` section.
    pub fn bootstrap_policy(&self) -> BootstrapPolicy {
        self.bootstrap.policy()
    }

    /// Reject values that would make a session unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.bootstrap.registration_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "bootstrap.registration_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}

// Whole or fractional seconds. Negative and non-finite values are rejected.
fn duration_from_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Parsed values are out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn code() -> SyncCode {
        SyncCode::new("abc123").unwrap()
    }

    #[test]
    fn new_uses_defaults() {
        let config = SyncConfig::new(code());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.merge_policy, MergePolicy::Append);
        assert_eq!(config.bootstrap_policy(), BootstrapPolicy::default());
    }

    #[test]
    fn minimal_toml_fills_defaults() {
        let config = SyncConfig::from_toml_str(r#"sync_code = "abc123""#).unwrap();
        assert_eq!(config.sync_code, code());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.bootstrap.registration_timeout, Duration::from_secs(5));
        assert_eq!(config.bootstrap.max_retries, 3);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
sync_code = "abc123"
connect_timeout_secs = 30
merge_policy = "last-writer-wins"

[bootstrap]
registration_timeout_secs = 2
max_retries = 5
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.merge_policy, MergePolicy::LastWriterWins);
        assert_eq!(
            config.bootstrap_policy(),
            BootstrapPolicy {
                registration_timeout: Duration::from_secs(2),
                max_retries: 5,
            }
        );
    }

    #[test]
    fn missing_sync_code_is_parse_error() {
        let result = SyncConfig::from_toml_str("connect_timeout_secs = 10");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn empty_sync_code_is_parse_error() {
        let result = SyncConfig::from_toml_str(r#"sync_code = """#);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn zero_timeouts_are_invalid() {
        let result = SyncConfig::from_toml_str("sync_code = \"abc\"\nconnect_timeout_secs = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let config = SyncConfig::new(code()).with_bootstrap(Duration::ZERO, 3);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn sub_second_timeouts_keep_their_precision() {
        let config = SyncConfig::new(code())
            .with_connect_timeout(Duration::from_millis(1500))
            .with_bootstrap(Duration::from_millis(500), 3);

        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(
            config.bootstrap_policy().registration_timeout,
            Duration::from_millis(500)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn fractional_seconds_parse_from_toml() {
        let toml = r#"
sync_code = "abc123"
connect_timeout_secs = 1.5

[bootstrap]
registration_timeout_secs = 0.25
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(
            config.bootstrap_policy().registration_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn negative_timeout_is_parse_error() {
        let result = SyncConfig::from_toml_str("sync_code = \"abc\"\nconnect_timeout_secs = -1");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn generated_config_has_fresh_code() {
        let a = SyncConfig::generate().unwrap();
        let b = SyncConfig::generate().unwrap();
        assert_eq!(a.sync_code.as_str().len(), 24);
        assert_ne!(a.sync_code, b.sync_code);
    }

    #[test]
    fn debug_does_not_leak_code() {
        let debug = format!("{:?}", SyncConfig::new(code()));
        assert!(!debug.contains("abc123"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sync_code = \"abc123\"\nmerge_policy = \"append\"").unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sync_code, code());
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/todo-sync.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
