//! Orchestrator configuration loaded from `~/.lookout/config.yaml`.
//!
//! Every value has a built-in default matching the stock worker deployment,
//! so the file is optional and only needs the settings that differ:
//!
//! ```yaml
//! timeouts:
//!   stop_ms: 3000
//! polling:
//!   frame_interval_ms: 150
//! workers:
//!   crowd-count:
//!     address: 127.0.0.1:6004
//!     pid_file: /var/run/lookout/crowd.pid
//!   registration:
//!     command:
//!       program: /opt/vision/venv/bin/python
//!       args: [face_registration_stream.py]
//!       working_dir: /opt/vision/backend
//! ```
//!
//! Timeouts and retry counts are tuning knobs, not protocol. Validation only
//! insists that every budget stays bounded and non-zero.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backoff::BackoffConfig;
use crate::error::{LookoutError, Result};
use crate::logging::lookout_home;
use crate::types::WorkerKind;

/// Upper bound for the finalize budget and the auto-finalize deadline.
pub const MAX_DEADLINE_MS: u64 = 24 * 60 * 60 * 1000;

/// Default config file location (`~/.lookout/config.yaml`).
pub fn default_config_path() -> Result<PathBuf> {
    Ok(lookout_home()?.join("config.yaml"))
}

/// How to launch a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Executable to run
    pub program: String,
    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandConfig {
    /// A `python <script> [args..]` command with UTF-8 stdio.
    pub fn python(script: &str, args: &[&str]) -> Self {
        let mut env = BTreeMap::new();
        env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
        Self {
            program: "python".to_string(),
            args: std::iter::once(script)
                .chain(args.iter().copied())
                .map(String::from)
                .collect(),
            working_dir: None,
            env,
        }
    }
}

/// Readiness polling budget for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Maximum number of `/health` probes
    pub max_attempts: u32,
    /// Pause between probes, in milliseconds
    pub spacing_ms: u64,
}

impl ReadinessConfig {
    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }
}

/// Fully resolved settings for one worker kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// `host:port` the worker listens on
    pub address: String,
    /// File the worker writes its process id into, if any
    pub pid_file: Option<PathBuf>,
    /// How to spawn the worker when it is not running
    pub command: Option<CommandConfig>,
    /// Where spawned worker stdout/stderr go (discarded when unset)
    pub log_file: Option<PathBuf>,
    /// Readiness budget after a spawn
    pub readiness: ReadinessConfig,
    /// Stop a healthy worker before reuse so no prior session state leaks
    pub reset_on_reuse: bool,
    /// Pause after the reset `/stop`, in milliseconds
    pub reset_pause_ms: u64,
    /// The spawn command starts a session by itself
    pub spawn_starts_session: bool,
    /// Status cadence for actions on this worker, in milliseconds
    pub status_interval_ms: u64,
    /// Finalize an action automatically after this long (0 disables)
    pub auto_finalize_after_ms: u64,
}

impl WorkerConfig {
    /// Built-in defaults for a worker kind.
    pub fn defaults_for(kind: WorkerKind) -> Self {
        match kind {
            WorkerKind::Registration => Self {
                address: "127.0.0.1:5001".into(),
                pid_file: None,
                command: Some(CommandConfig::python("face_registration_stream.py", &[])),
                log_file: None,
                readiness: ReadinessConfig {
                    max_attempts: 15,
                    spacing_ms: 200,
                },
                reset_on_reuse: true,
                reset_pause_ms: 300,
                spawn_starts_session: false,
                status_interval_ms: 1_000,
                auto_finalize_after_ms: 0,
            },
            WorkerKind::SingleAuth => Self {
                address: "127.0.0.1:5002".into(),
                pid_file: None,
                command: Some(CommandConfig::python("single_face_stream.py", &[])),
                log_file: None,
                readiness: ReadinessConfig {
                    max_attempts: 15,
                    spacing_ms: 200,
                },
                reset_on_reuse: true,
                reset_pause_ms: 300,
                spawn_starts_session: false,
                status_interval_ms: 1_000,
                auto_finalize_after_ms: 0,
            },
            WorkerKind::MultiAuth => Self {
                address: "127.0.0.1:5003".into(),
                pid_file: None,
                command: Some(CommandConfig::python("multi_face_stream.py", &[])),
                log_file: None,
                readiness: ReadinessConfig {
                    max_attempts: 10,
                    spacing_ms: 300,
                },
                reset_on_reuse: true,
                reset_pause_ms: 300,
                spawn_starts_session: false,
                status_interval_ms: 2_000,
                auto_finalize_after_ms: 30_000,
            },
            WorkerKind::CrowdCount => Self {
                address: "127.0.0.1:5004".into(),
                pid_file: Some(PathBuf::from("crowd_counting_stream.pid")),
                command: Some(CommandConfig::python("crowd_counting_stream.py", &["start"])),
                log_file: None,
                readiness: ReadinessConfig {
                    max_attempts: 12,
                    spacing_ms: 250,
                },
                reset_on_reuse: false,
                reset_pause_ms: 300,
                spawn_starts_session: true,
                status_interval_ms: 1_000,
                auto_finalize_after_ms: 0,
            },
        }
    }

    /// Base URL for the worker's HTTP API.
    pub fn base_url(&self) -> String {
        if self.address.starts_with("http://") || self.address.starts_with("https://") {
            self.address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.address)
        }
    }

    pub fn reset_pause(&self) -> Duration {
        Duration::from_millis(self.reset_pause_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Auto-finalize deadline, if enabled.
    pub fn auto_finalize_after(&self) -> Option<Duration> {
        (self.auto_finalize_after_ms > 0)
            .then(|| Duration::from_millis(self.auto_finalize_after_ms.min(MAX_DEADLINE_MS)))
    }

    fn apply(&mut self, o: WorkerOverride) {
        if let Some(v) = o.address {
            self.address = v;
        }
        if let Some(v) = o.pid_file {
            self.pid_file = Some(v);
        }
        if let Some(v) = o.command {
            self.command = Some(v);
        }
        if let Some(v) = o.log_file {
            self.log_file = Some(v);
        }
        if let Some(v) = o.readiness {
            self.readiness = v;
        }
        if let Some(v) = o.reset_on_reuse {
            self.reset_on_reuse = v;
        }
        if let Some(v) = o.reset_pause_ms {
            self.reset_pause_ms = v;
        }
        if let Some(v) = o.spawn_starts_session {
            self.spawn_starts_session = v;
        }
        if let Some(v) = o.status_interval_ms {
            self.status_interval_ms = v;
        }
        if let Some(v) = o.auto_finalize_after_ms {
            self.auto_finalize_after_ms = v;
        }
    }

    fn validate(&self, kind: WorkerKind) -> Result<()> {
        let authority = self
            .address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let port_ok = authority
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !port_ok {
            return Err(LookoutError::ConfigValidation {
                message: format!("{kind}: address '{}' must be host:port", self.address),
            });
        }
        if self.readiness.max_attempts == 0 {
            return Err(LookoutError::ConfigValidation {
                message: format!("{kind}: readiness.max_attempts must be at least 1"),
            });
        }
        if self.auto_finalize_after_ms > MAX_DEADLINE_MS {
            return Err(LookoutError::ConfigValidation {
                message: format!("{kind}: auto_finalize_after_ms must not exceed {MAX_DEADLINE_MS}"),
            });
        }
        if self.status_interval_ms == 0 {
            return Err(LookoutError::ConfigValidation {
                message: format!("{kind}: status_interval_ms must be positive"),
            });
        }
        if let Some(cmd) = &self.command {
            if cmd.program.trim().is_empty() {
                return Err(LookoutError::ConfigValidation {
                    message: format!("{kind}: command.program must not be empty"),
                });
            }
        }
        Ok(())
    }
}

/// Partial worker settings as written in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WorkerOverride {
    address: Option<String>,
    pid_file: Option<PathBuf>,
    command: Option<CommandConfig>,
    log_file: Option<PathBuf>,
    readiness: Option<ReadinessConfig>,
    reset_on_reuse: Option<bool>,
    reset_pause_ms: Option<u64>,
    spawn_starts_session: Option<bool>,
    status_interval_ms: Option<u64>,
    auto_finalize_after_ms: Option<u64>,
}

/// Per-call-site HTTP timeouts, in milliseconds.
///
/// Readiness probes are short; stop requests are longer so a worker can
/// release its camera before answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub health_ms: u64,
    pub readiness_probe_ms: u64,
    pub start_ms: u64,
    pub stop_ms: u64,
    pub force_stop_ms: u64,
    pub status_ms: u64,
    pub frame_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_ms: 1_000,
            readiness_probe_ms: 750,
            start_ms: 2_000,
            stop_ms: 1_500,
            force_stop_ms: 2_500,
            status_ms: 1_500,
            frame_ms: 1_000,
        }
    }
}

impl TimeoutConfig {
    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }
    pub fn readiness_probe(&self) -> Duration {
        Duration::from_millis(self.readiness_probe_ms)
    }
    pub fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }
    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }
    pub fn force_stop(&self) -> Duration {
        Duration::from_millis(self.force_stop_ms)
    }
    pub fn status(&self) -> Duration {
        Duration::from_millis(self.status_ms)
    }
    pub fn frame(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }
}

/// Polling cadences shared by every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Frame fetch interval
    pub frame_interval_ms: u64,
    /// Budget for the backend to acknowledge a stop
    pub finalize_timeout_ms: u64,
    /// Consecutive transport failures before an action fails
    pub max_consecutive_failures: u32,
    /// Delay growth while a cadence keeps failing
    pub backoff: BackoffConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 200,
            finalize_timeout_ms: 15_000,
            max_consecutive_failures: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl PollingConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms.min(MAX_DEADLINE_MS))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    workers: BTreeMap<WorkerKind, WorkerOverride>,
    timeouts: TimeoutConfig,
    polling: PollingConfig,
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorConfig {
    pub workers: BTreeMap<WorkerKind, WorkerConfig>,
    pub timeouts: TimeoutConfig,
    pub polling: PollingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: WorkerKind::all()
                .into_iter()
                .map(|kind| (kind, WorkerConfig::defaults_for(kind)))
                .collect(),
            timeouts: TimeoutConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist. Without one the default
    /// location is used and a missing file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(LookoutError::config_not_found(path));
                }
                Self::from_yaml(path)
            }
            None => {
                let path = default_config_path()?;
                if path.exists() {
                    Self::from_yaml(&path)
                } else {
                    debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LookoutError::ConfigNotFound {
            path: path.to_path_buf(),
            source: Some(e),
        })?;
        let config = Self::parse(&content).map_err(|e| match e {
            LookoutError::ConfigInvalid { message, .. } => LookoutError::ConfigInvalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a YAML string and validate it.
    pub fn parse(content: &str) -> Result<Self> {
        let file: ConfigFile = if content.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| LookoutError::ConfigInvalid {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?
        };

        let mut config = Self {
            timeouts: file.timeouts,
            polling: file.polling,
            ..Self::default()
        };
        for (kind, overrides) in file.workers {
            if let Some(worker) = config.workers.get_mut(&kind) {
                worker.apply(overrides);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (kind, worker) in &self.workers {
            worker.validate(*kind)?;
        }
        if self.polling.frame_interval_ms == 0 {
            return Err(LookoutError::ConfigValidation {
                message: "polling.frame_interval_ms must be positive".into(),
            });
        }
        if self.polling.finalize_timeout_ms == 0 {
            return Err(LookoutError::ConfigValidation {
                message: "polling.finalize_timeout_ms must be positive".into(),
            });
        }
        if self.polling.finalize_timeout_ms > MAX_DEADLINE_MS {
            return Err(LookoutError::ConfigValidation {
                message: format!("polling.finalize_timeout_ms must not exceed {MAX_DEADLINE_MS}"),
            });
        }
        if self.polling.max_consecutive_failures == 0 {
            return Err(LookoutError::ConfigValidation {
                message: "polling.max_consecutive_failures must be at least 1".into(),
            });
        }
        let t = &self.timeouts;
        let timeouts = [
            t.health_ms,
            t.readiness_probe_ms,
            t.start_ms,
            t.stop_ms,
            t.force_stop_ms,
            t.status_ms,
            t.frame_ms,
        ];
        if timeouts.contains(&0) {
            return Err(LookoutError::ConfigValidation {
                message: "timeouts must all be positive".into(),
            });
        }
        Ok(())
    }

    /// Settings for one worker kind.
    pub fn worker(&self, kind: WorkerKind) -> WorkerConfig {
        self.workers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| WorkerConfig::defaults_for(kind))
    }

    /// Replace the settings for one worker kind.
    pub fn with_worker(mut self, kind: WorkerKind, worker: WorkerConfig) -> Self {
        self.workers.insert(kind, worker);
        self
    }
}
