use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::BackendKind;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "nospace.toml";
pub const DEFAULT_INTERPRETER_PATH: &str = "./components/nospace20/bin/nospace20";
pub const DEFAULT_SCRATCH_DIR: &str = "./tmp";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_PROCESSES: usize = 5;
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(2_000);
pub const DEFAULT_STEP_BUDGET: u64 = 10_000;
pub const DEFAULT_MAX_TOTAL_STEPS: u64 = 100_000_000;

/// Contents of `nospace.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigToml {
    pub interpreter_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    /// Advisory only; concurrent runs are not capped.
    pub max_processes: Option<usize>,
    pub scratch_dir: Option<PathBuf>,
    pub kill_grace_ms: Option<u64>,
    pub backend: Option<BackendKind>,
    pub step_budget: Option<u64>,
    pub max_total_steps: Option<u64>,
}

/// Values supplied on the command line or through the environment. They
/// take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub interpreter_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub max_processes: Option<usize>,
    pub scratch_dir: Option<PathBuf>,
    pub backend: Option<BackendKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Native interpreter spawned by the process backend.
    pub interpreter_path: PathBuf,
    /// Wall-clock limit for one process run.
    pub timeout: Duration,
    pub max_processes: usize,
    /// Directory that receives the per-run source files.
    pub scratch_dir: PathBuf,
    /// Delay between SIGTERM and SIGKILL.
    pub kill_grace: Duration,
    pub backend: BackendKind,
    /// Instructions executed by the VM between yields.
    pub step_budget: u64,
    /// Hard ceiling on VM instructions for one run.
    pub max_total_steps: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interpreter_path: PathBuf::from(DEFAULT_INTERPRETER_PATH),
            timeout: DEFAULT_TIMEOUT,
            max_processes: DEFAULT_MAX_PROCESSES,
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            kill_grace: DEFAULT_KILL_GRACE,
            backend: BackendKind::default(),
            step_budget: DEFAULT_STEP_BUDGET,
            max_total_steps: DEFAULT_MAX_TOTAL_STEPS,
        }
    }
}

impl Config {
    /// Loads `config_path` (or `./nospace.toml` when `None`) and applies
    /// `overrides`. A missing file yields the defaults.
    pub fn load(
        config_path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Config, ConfigError> {
        let path = config_path.map_or_else(|| PathBuf::from(CONFIG_FILE_NAME), Path::to_path_buf);
        let toml = load_config_toml(&path, config_path.is_some())?;
        Config::from_toml(toml, overrides)
    }

    pub fn from_toml(cfg: ConfigToml, overrides: ConfigOverrides) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let timeout = overrides
            .timeout_secs
            .or(cfg.timeout_secs)
            .map_or(defaults.timeout, Duration::from_secs);
        let step_budget = cfg.step_budget.unwrap_or(defaults.step_budget);

        if timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be at least one second".to_string()));
        }
        if step_budget == 0 {
            return Err(ConfigError::Invalid("step_budget must be positive".to_string()));
        }

        Ok(Config {
            interpreter_path: overrides
                .interpreter_path
                .or(cfg.interpreter_path)
                .unwrap_or(defaults.interpreter_path),
            timeout,
            max_processes: overrides
                .max_processes
                .or(cfg.max_processes)
                .unwrap_or(defaults.max_processes),
            scratch_dir: overrides
                .scratch_dir
                .or(cfg.scratch_dir)
                .unwrap_or(defaults.scratch_dir),
            kill_grace: cfg
                .kill_grace_ms
                .map_or(defaults.kill_grace, Duration::from_millis),
            backend: overrides.backend.or(cfg.backend).unwrap_or(defaults.backend),
            step_budget,
            max_total_steps: cfg.max_total_steps.unwrap_or(defaults.max_total_steps),
        })
    }
}

/// Reads a config file. When `required` is false a missing file is treated
/// as empty.
pub fn load_config_toml(path: &Path, required: bool) -> Result<ConfigToml, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!("⚙️ [config] {} not found, using defaults", path.display());
            return Ok(ConfigToml::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
