//! Worker launch resolution
//!
//! Turns a `WorkerConfig` into a concrete program, argument list, and extra
//! environment. Two deployment modes exist:
//!
//! - **Bundled**: a standalone worker binary shipped next to the host, run
//!   as `<binary> serve`
//! - **Development**: an interpreter running the worker script from a source
//!   checkout, run as `<interpreter> <script> serve` with the worker's code
//!   directory exported through `PYTHONPATH`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{
    DeploymentMode, WorkerConfig, BUNDLED_WORKER_NAME, WORKER_CODE_PATH_ENV, WORKER_SERVE_ARG,
};

/// Fully resolved worker command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Merged over the inherited environment at spawn time
    pub env: HashMap<String, String>,
    /// The mode that was actually chosen (never `Auto`)
    pub mode: DeploymentMode,
}

impl WorkerLaunch {
    /// Launch an arbitrary program; used by tests and embedders with their
    /// own worker
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: HashMap::new(),
            mode: DeploymentMode::Development,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Resolve the launch for `config`
    pub fn resolve(config: &WorkerConfig) -> Self {
        let mut launch = match config.mode {
            DeploymentMode::Bundled => Self::bundled(config),
            DeploymentMode::Development => Self::development(config),
            DeploymentMode::Auto => {
                let binary = bundled_binary_path(config);
                if binary.as_ref().is_some_and(|p| p.exists()) {
                    Self::bundled(config)
                } else {
                    debug!(candidate = ?binary, "No bundled worker found, using development launch");
                    Self::development(config)
                }
            }
        };

        for (key, value) in &config.env {
            launch.env.insert(key.clone(), value.clone());
        }

        info!(
            mode = ?launch.mode,
            program = %launch.program.display(),
            args = ?launch.args,
            "Resolved worker launch"
        );
        launch
    }

    fn bundled(config: &WorkerConfig) -> Self {
        let program = bundled_binary_path(config).unwrap_or_else(|| PathBuf::from(BUNDLED_WORKER_NAME));
        Self {
            program,
            args: vec![WORKER_SERVE_ARG.to_string()],
            env: HashMap::new(),
            mode: DeploymentMode::Bundled,
        }
    }

    fn development(config: &WorkerConfig) -> Self {
        let project_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

        let script = config
            .script
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| project_root.join("worker").join("main.py"));

        let code_dir = config
            .code_dir
            .as_deref()
            .map(expand)
            .or_else(|| script.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| project_root.join("worker"));

        let mut env = HashMap::new();
        env.insert(
            WORKER_CODE_PATH_ENV.to_string(),
            code_dir.to_string_lossy().into_owned(),
        );

        Self {
            program: development_interpreter(&project_root, &config.interpreter),
            args: vec![
                script.to_string_lossy().into_owned(),
                WORKER_SERVE_ARG.to_string(),
            ],
            env,
            mode: DeploymentMode::Development,
        }
    }
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Where the bundled worker binary is expected.
///
/// An explicit `bundledBinary` wins; otherwise it lives in the resources
/// directory next to the host executable (`Resources` on macOS bundles).
fn bundled_binary_path(config: &WorkerConfig) -> Option<PathBuf> {
    if let Some(explicit) = config.bundled_binary.as_deref() {
        return Some(expand(explicit));
    }

    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;
    let candidates = [
        exe_dir.join("resources"),
        exe_dir.join("..").join("Resources"),
    ];
    candidates
        .iter()
        .map(|resources| {
            resources
                .join("python")
                .join(BUNDLED_WORKER_NAME)
                .join(BUNDLED_WORKER_NAME)
        })
        .find(|path| path.exists())
}

/// Project virtualenv interpreter if present, else the configured
/// interpreter looked up on PATH, else the raw configured value.
fn development_interpreter(project_root: &Path, configured: &str) -> PathBuf {
    let venv_python = project_root.join("venv").join("bin").join("python3");
    if venv_python.exists() {
        debug!(path = %venv_python.display(), "Using project virtualenv interpreter");
        return venv_python;
    }

    let configured = expand(configured);
    match which::which(&configured) {
        Ok(found) => found,
        Err(e) => {
            debug!(
                interpreter = %configured.display(),
                error = %e,
                "Interpreter not found on PATH, spawning as configured"
            );
            configured
        }
    }
}
