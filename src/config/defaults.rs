//! Default configuration values
//!
//! All constants used throughout the config module are defined here.

/// Default per-call timeout. Processing a download can be slow.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 120_000;

/// Delay before restarting a worker that exited unexpectedly
pub const DEFAULT_RESTART_DELAY_MS: u64 = 2_000;

/// Interpreter used for development launches when no virtualenv is present
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Argument that puts the worker into JSON-RPC serve mode
pub const WORKER_SERVE_ARG: &str = "serve";

/// Name of the bundled worker binary (and of the directory that holds it)
pub const BUNDLED_WORKER_NAME: &str = "kipartbridge-sidecar";

/// Environment variable pointing the development worker at its own sources
pub const WORKER_CODE_PATH_ENV: &str = "PYTHONPATH";

/// File extensions intercepted by the capture pipeline (lowercase, no dot)
pub const DEFAULT_CAPTURE_EXTENSIONS: &[&str] = &["zip"];

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "PARTBRIDGE_CONFIG";

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "~/.partbridge/config.json";

/// Default staging directory for captured downloads
pub const DEFAULT_STAGING_DIR: &str = "~/.partbridge/staging";

/// Default page size for list_components
pub const DEFAULT_LIST_LIMIT: u32 = 100;
