//! Configuration module - host settings
//!
//! - `defaults` - All default constant values
//! - `types` - Configuration struct definitions (Config, WorkerConfig, CaptureConfig)
//! - `loader` - File system loading and parsing

mod defaults;
mod loader;
mod types;

pub use defaults::{
    BUNDLED_WORKER_NAME, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_INTERPRETER, DEFAULT_LIST_LIMIT,
    DEFAULT_RESTART_DELAY_MS, WORKER_CODE_PATH_ENV, WORKER_SERVE_ARG,
};

pub use types::{CaptureConfig, Config, DeploymentMode, WorkerConfig};

pub use loader::{config_path, load_config, load_config_from};

#[cfg(test)]
pub use defaults::DEFAULT_CAPTURE_EXTENSIONS;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
