//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;

// ============================================
// WORKER CONFIG
// ============================================

/// How the worker executable is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeploymentMode {
    /// Bundled binary when present next to the host, otherwise development
    #[default]
    Auto,
    /// Standalone packaged worker binary
    Bundled,
    /// Interpreter plus script path, for running from a source checkout
    Development,
}

/// Worker process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    #[serde(default)]
    pub mode: DeploymentMode,
    /// Explicit path to the bundled worker binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled_binary: Option<String>,
    /// Interpreter for development launches (default: python3)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Worker entry script for development launches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Directory holding the worker's own sources (exported to the worker env)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_dir: Option<String>,
    /// Extra environment variables merged over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}
fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}
fn default_restart_delay_ms() -> u64 {
    DEFAULT_RESTART_DELAY_MS
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            mode: DeploymentMode::Auto,
            bundled_binary: None,
            interpreter: DEFAULT_INTERPRETER.to_string(),
            script: None,
            code_dir: None,
            env: HashMap::new(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

impl WorkerConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

// ============================================
// CAPTURE CONFIG
// ============================================

/// Download capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Intercepted file extensions, without the leading dot
    #[serde(default = "default_capture_extensions")]
    pub extensions: Vec<String>,
    /// Private staging directory (default: ~/.partbridge/staging)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
}

fn default_capture_extensions() -> Vec<String> {
    DEFAULT_CAPTURE_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            extensions: default_capture_extensions(),
            staging_dir: None,
        }
    }
}

impl CaptureConfig {
    /// Staging directory with `~` expanded
    pub fn staging_dir(&self) -> PathBuf {
        let raw = self.staging_dir.as_deref().unwrap_or(DEFAULT_STAGING_DIR);
        PathBuf::from(shellexpand::tilde(raw).as_ref())
    }
}

// ============================================
// MAIN CONFIG
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Library root forwarded to the worker; the worker picks its own when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_root: Option<String>,
}

impl Config {
    /// Library root with `~` expanded
    pub fn library_root(&self) -> Option<String> {
        self.library_root
            .as_deref()
            .map(|root| shellexpand::tilde(root).into_owned())
    }
}
