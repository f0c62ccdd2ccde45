//! Constants used throughout the core crate.
//!
//! Defaults for every optional configuration value live here so that the
//! config loader, the CLI and the tests agree on them.

/// Environment variable naming the configuration file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "IHE_CONFIG";

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ihe.yaml";

/// Retries after the first attempt for a transient failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First backoff delay; doubles on each further retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Per-attempt timeout for a registration exchange.
pub const DEFAULT_REGISTRATION_TIMEOUT_SECS: u64 = 30;

/// Per-attempt timeout for a document submission exchange.
pub const DEFAULT_SUBMISSION_TIMEOUT_SECS: u64 = 120;

/// Patients processed between periodic checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

/// Directory for checkpoint and result files.
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// Idle connections kept per host. Connection reuse only; dispatch stays sequential.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 4;

/// Lifetime given to a file-backed signed assertion when it is loaded.
pub const DEFAULT_ASSERTION_LIFETIME_SECS: u64 = 3_600;

pub const DEFAULT_DOCUMENT_MEDIA_TYPE: &str = "text/xml";

pub const CHECKPOINT_FILE_SUFFIX: &str = ".checkpoint.json";

pub const RESULT_FILE_SUFFIX: &str = ".result.json";

/// Longest response excerpt kept in an HTTP status error.
pub const HTTP_ERROR_EXCERPT_LEN: usize = 512;
