//! Engine configuration.
//!
//! Configuration is resolved once at process start-up into an immutable
//! [`EngineConfig`] and passed into the engine and orchestrator. Nothing below the
//! CLI reads environment variables.

use crate::constants::{
    DEFAULT_ASSERTION_LIFETIME_SECS, DEFAULT_BASE_DELAY_MS, DEFAULT_CHECKPOINT_DIR,
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_DOCUMENT_MEDIA_TYPE, DEFAULT_MAX_RETRIES,
    DEFAULT_POOL_MAX_IDLE_PER_HOST, DEFAULT_REGISTRATION_TIMEOUT_SECS,
    DEFAULT_SUBMISSION_TIMEOUT_SECS,
};
use crate::engine::{RetryPolicy, Timeouts};
use crate::orchestrator::Endpoints;
use ihe_types::Oid;
use ihe_wire::{CodedValue, DocumentMetadata};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config schema mismatch at {at}: {reason}")]
    Schema { at: String, reason: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointsConfig {
    pub registration: String,
    pub submission: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimeoutsConfig {
    pub registration_secs: u64,
    pub submission_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            registration_secs: DEFAULT_REGISTRATION_TIMEOUT_SECS,
            submission_secs: DEFAULT_SUBMISSION_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CheckpointConfig {
    pub interval: usize,
    pub dir: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CHECKPOINT_INTERVAL,
            dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertionConfig {
    pub subject: String,
    pub audience: String,
    /// File holding the pre-signed assertion token.
    pub path: PathBuf,
    #[serde(default = "default_assertion_lifetime")]
    pub lifetime_secs: u64,
}

fn default_assertion_lifetime() -> u64 {
    DEFAULT_ASSERTION_LIFETIME_SECS
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentConfig {
    /// Document template submitted for every patient.
    pub path: PathBuf,
    pub class_code: CodedValue,
    pub type_code: CodedValue,
    pub format_code: CodedValue,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

fn default_media_type() -> String {
    DEFAULT_DOCUMENT_MEDIA_TYPE.to_owned()
}

impl DocumentConfig {
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            class_code: Some(self.class_code.clone()),
            type_code: Some(self.type_code.clone()),
            format_code: Some(self.format_code.clone()),
            media_type: self.media_type.clone(),
            title: self.title.clone(),
        }
    }
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_MAX_IDLE_PER_HOST
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    sender_oid: Oid,
    receiver_oid: Oid,
    endpoints: EndpointsConfig,
    #[serde(default)]
    timeouts: TimeoutsConfig,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    checkpoint: CheckpointConfig,
    #[serde(default = "default_pool_size")]
    pool_max_idle_per_host: usize,
    assertion: AssertionConfig,
    document: DocumentConfig,
    #[serde(default)]
    audit_dir: Option<PathBuf>,
}

/// Engine configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    sender: Oid,
    receiver: Oid,
    endpoints: EndpointsConfig,
    timeouts: TimeoutsConfig,
    retry: RetryConfig,
    checkpoint: CheckpointConfig,
    pool_max_idle_per_host: usize,
    assertion: AssertionConfig,
    document: DocumentConfig,
    audit_dir: Option<PathBuf>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses and validates a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Schema`] (with the failing path) if the document does not
    /// match the schema, or [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        let file = match serde_path_to_error::deserialize::<_, ConfigFile>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let at = err.path().to_string();
                let source = err.into_inner();
                let at = if at.is_empty() { "<root>".to_owned() } else { at };
                return Err(ConfigError::Schema {
                    at,
                    reason: source.to_string(),
                });
            }
        };
        Self::validated(file)
    }

    fn validated(file: ConfigFile) -> Result<Self, ConfigError> {
        for (name, url) in [
            ("endpoints.registration", &file.endpoints.registration),
            ("endpoints.submission", &file.endpoints.submission),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if file.timeouts.registration_secs == 0 || file.timeouts.submission_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if file.checkpoint.interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint.interval must be at least 1".into(),
            ));
        }
        if file.assertion.subject.trim().is_empty() || file.assertion.audience.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "assertion.subject and assertion.audience are required".into(),
            ));
        }
        if file.assertion.lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "assertion.lifetime_secs must be positive".into(),
            ));
        }

        Ok(Self {
            sender: file.sender_oid,
            receiver: file.receiver_oid,
            endpoints: file.endpoints,
            timeouts: file.timeouts,
            retry: file.retry,
            checkpoint: file.checkpoint,
            pool_max_idle_per_host: file.pool_max_idle_per_host,
            assertion: file.assertion,
            document: file.document,
            audit_dir: file.audit_dir,
        })
    }

    pub fn sender(&self) -> &Oid {
        &self.sender
    }

    pub fn receiver(&self) -> &Oid {
        &self.receiver
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            registration: self.endpoints.registration.clone(),
            submission: self.endpoints.submission.clone(),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            registration: Duration::from_secs(self.timeouts.registration_secs),
            submission: Duration::from_secs(self.timeouts.submission_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    pub fn checkpoint_interval(&self) -> usize {
        self.checkpoint.interval
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint.dir
    }

    pub fn pool_max_idle_per_host(&self) -> usize {
        self.pool_max_idle_per_host
    }

    pub fn assertion(&self) -> &AssertionConfig {
        &self.assertion
    }

    pub fn document(&self) -> &DocumentConfig {
        &self.document
    }

    pub fn audit_dir(&self) -> Option<&Path> {
        self.audit_dir.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sender_oid: "1.3.6.1.4.1.21367.2017.2.1.1"
receiver_oid: "1.3.6.1.4.1.21367.2017.2.1.2"
endpoints:
  registration: https://registry.example.org/pix
  submission: https://repository.example.org/xdsb
assertion:
  subject: harness
  audience: https://registry.example.org
  path: assertion.xml
document:
  path: templates/ccd.xml
  class_code: { code: "34133-9", scheme: "2.16.840.1.113883.6.1" }
  type_code: { code: "60591-5", scheme: "2.16.840.1.113883.6.1" }
  format_code: { code: "urn:ihe:pcc:xphr:2007", scheme: "1.3.6.1.4.1.19376.1.2.3" }
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = EngineConfig::from_yaml_str(MINIMAL).expect("valid config");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.timeouts(), Timeouts::default());
        assert_eq!(config.checkpoint_interval(), 10);
        assert_eq!(config.checkpoint_dir(), Path::new("checkpoints"));
        assert_eq!(config.pool_max_idle_per_host(), 4);
        assert_eq!(config.document().media_type, "text/xml");
        assert_eq!(config.assertion().lifetime_secs, 3_600);
        assert!(config.audit_dir().is_none());
        assert_eq!(config.sender().as_str(), "1.3.6.1.4.1.21367.2017.2.1.1");
        assert!(config.document().metadata().class_code.is_some());
    }

    #[test]
    fn overrides_are_applied() {
        let text = format!(
            "{MINIMAL}timeouts:\n  registration_secs: 5\n  submission_secs: 60\nretry:\n  max_retries: 1\n  base_delay_ms: 250\ncheckpoint:\n  interval: 50\n  dir: /var/lib/ihe\naudit_dir: audit\n"
        );
        let config = EngineConfig::from_yaml_str(&text).expect("valid config");
        assert_eq!(config.timeouts().registration, Duration::from_secs(5));
        assert_eq!(config.timeouts().submission, Duration::from_secs(60));
        assert_eq!(config.retry_policy().max_retries, 1);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(250));
        assert_eq!(config.checkpoint_interval(), 50);
        assert_eq!(config.audit_dir(), Some(Path::new("audit")));
    }

    #[test]
    fn schema_errors_report_path() {
        let text = MINIMAL.replace("sender_oid: \"1.3.6.1.4.1.21367.2017.2.1.1\"", "sender_oid: \"abc\"");
        match EngineConfig::from_yaml_str(&text) {
            Err(ConfigError::Schema { at, .. }) => assert_eq!(at, "sender_oid"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}verbose: true\n");
        assert!(matches!(
            EngineConfig::from_yaml_str(&text),
            Err(ConfigError::Schema { .. })
        ));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let text = format!("{MINIMAL}checkpoint:\n  interval: 0\n");
        assert!(matches!(
            EngineConfig::from_yaml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn non_http_endpoint_is_invalid() {
        let text = MINIMAL.replace("https://registry.example.org/pix", "ftp://registry");
        match EngineConfig::from_yaml_str(&text) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("endpoints.registration")),
            other => panic!("expected invalid, got {other:?}"),
        }
    }
}
