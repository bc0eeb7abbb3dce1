use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

use crate::telemetry::ManagerTelemetry;

/// Manager settings loaded from TOML.
///
/// ```toml
/// [engine]
/// host = "127.0.0.1"
/// port = 6311
///
/// [storage]
/// dir = "models"
///
/// [telemetry]
/// log_path = "logs/manager.log"
/// event_log = "logs/events.jsonl"
/// min_level = "info"
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Engine endpoint.
    pub engine: EngineSettings,
    /// Artifact storage.
    pub storage: StorageSettings,
    /// Log and event sinks.
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ManagerConfigSerde {
    #[serde(default)]
    engine: EngineSettings,
    #[serde(default)]
    storage: StorageSettings,
    #[serde(default)]
    telemetry: TelemetrySettings,
}

/// Where the engine listens.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Host name or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect and handshake timeout in milliseconds; zero disables it.
    /// Evaluations are never timed out.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Artifact storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Directory holding artifacts, export files and training dumps.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Telemetry sinks; both optional.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines lifecycle event file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Lowest level written to the log.
    #[serde(default = "default_min_level")]
    pub min_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_path: None,
            event_log: None,
            min_level: default_min_level(),
        }
    }
}

impl ManagerConfig {
    /// Loads configuration from a TOML file. Relative paths are resolved
    /// against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading manager config {}", path.display()))?;
        let base = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_toml(&raw, &base).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses configuration text, resolving relative paths against `base`.
    pub fn from_toml(raw: &str, base: &Path) -> Result<Self> {
        let document: ManagerConfigSerde = toml::from_str(raw)?;
        let mut config = Self {
            engine: document.engine,
            storage: document.storage,
            telemetry: document.telemetry,
        };
        if config.engine.host.trim().is_empty() {
            bail!("engine.host must not be empty");
        }
        if LogLevel::parse(&config.telemetry.min_level).is_none() {
            bail!("unknown telemetry.min_level {:?}", config.telemetry.min_level);
        }
        config.storage.dir = resolve(base, &config.storage.dir);
        config.telemetry.log_path = config.telemetry.log_path.map(|p| resolve(base, &p));
        config.telemetry.event_log = config.telemetry.event_log.map(|p| resolve(base, &p));
        Ok(config)
    }

    /// `host:port` of the engine.
    #[must_use]
    pub fn engine_address(&self) -> String {
        format!("{}:{}", self.engine.host, self.engine.port)
    }

    /// Engine timeout, if any.
    #[must_use]
    pub const fn engine_timeout(&self) -> Option<Duration> {
        if self.engine.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.engine.timeout_ms))
        }
    }

    /// Builds telemetry from the configured sinks; `None` when none is set.
    pub fn telemetry(&self) -> Result<Option<ManagerTelemetry>> {
        let settings = &self.telemetry;
        if settings.log_path.is_none() && settings.event_log.is_none() {
            return Ok(None);
        }
        let mut builder = ManagerTelemetry::builder("rmodels.manager")
            .min_level(LogLevel::parse(&settings.min_level).unwrap_or_default());
        if let Some(path) = &settings.log_path {
            builder = builder.log_path(path);
        }
        if let Some(path) = &settings.event_log {
            let publisher = FileEventPublisher::new(path)
                .with_context(|| format!("opening event log {}", path.display()))?;
            builder = builder.event_publisher(Arc::new(publisher));
        }
        builder.build().map(Some)
    }
}

fn resolve(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    6311
}

const fn default_timeout_ms() -> u64 {
    30_000
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_min_level() -> String {
    "info".into()
}
