use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Args;
use nospace_core::BackendKind;
use nospace_core::Config;
use nospace_core::ConfigOverrides;

pub const DEFAULT_PORT: u16 = 8080;

/// Settings shared by every entry point that builds a [`Config`].
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Config file to read instead of `./nospace.toml`.
    #[arg(long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Path of the native interpreter.
    #[arg(long = "bin-path", env = "NOSPACE_BIN_PATH", value_name = "PATH")]
    pub interpreter_path: Option<PathBuf>,

    /// Wall-clock limit for one process run, in seconds.
    #[arg(long = "timeout", env = "NOSPACE_TIMEOUT", value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "NOSPACE_MAX_PROCESSES", value_name = "N")]
    pub max_processes: Option<usize>,

    /// Directory for per-run source files.
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Execution backend: `process` or `vm`.
    #[arg(long)]
    pub backend: Option<BackendKind>,
}

impl ConfigArgs {
    pub fn load(self) -> anyhow::Result<Config> {
        let overrides = ConfigOverrides {
            interpreter_path: self.interpreter_path,
            timeout_secs: self.timeout_secs,
            max_processes: self.max_processes,
            scratch_dir: self.scratch_dir,
            backend: self.backend,
        };
        Ok(Config::load(self.config_file.as_deref(), overrides)?)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub config: ConfigArgs,
}
