use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the exif-edit library.
///
/// Controls how the external worker is launched and how long it may take,
/// plus output behavior (backups).
///
/// # Loading
///
/// ```rust,no_run
/// use exif_edit::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.worker.program = "/opt/exiftool/exiftool".into();
/// config.output.backup_originals = false;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External worker used for formats the in-process library cannot write.
    pub worker: WorkerConfig,
    /// Output behavior (backups).
    pub output: OutputConfig,
}

/// How to start and talk to the persistent worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable name or path.
    pub program: String,
    /// Arguments that put the worker into read-commands-from-stdin mode.
    pub args: Vec<String>,
    /// How long to wait for the ready marker of one request.
    pub response_timeout_ms: u64,
    /// How long to wait for the process to exit on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Extra time allowed for error output to arrive after the ready marker.
    pub stderr_grace_ms: u64,
}

/// Output and behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// If `true`, create a `.bak` backup before modifying an image.
    pub backup_originals: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "exiftool".to_string(),
            args: ["-stay_open", "True", "-@", "-"]
                .into_iter()
                .map(String::from)
                .collect(),
            response_timeout_ms: 10_000,
            shutdown_timeout_ms: 2_000,
            stderr_grace_ms: 25,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backup_originals: true,
        }
    }
}

impl WorkerConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stderr_grace(&self) -> Duration {
        Duration::from_millis(self.stderr_grace_ms)
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }
}
