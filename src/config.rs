//! Configuration types and loading
//!
//! YAML with kebab-case keys and full defaults, loaded through a fallback
//! chain: explicit path, project-local `.agentherd.yml`, then
//! `~/.config/agentherd/agentherd.yml`, then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::instance::TimeoutConfig;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub agent: AgentConfig,
    pub output: OutputConfig,
    pub timeouts: TimeoutsConfig,
    pub pipeline: PipelineConfig,
    pub ralph: RalphConfig,
    pub adversarial: AdversarialConfig,
    pub scheduler: SchedulerConfig,
    pub worktree: WorktreeConfig,
    pub ultraplan: UltraPlanConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".agentherd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("agentherd").join("agentherd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }
}

/// Session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// New instances go straight from Pending to Working
    #[serde(rename = "auto-start-on-add")]
    pub auto_start_on_add: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_start_on_add: true,
        }
    }
}

/// External agent binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable
    pub command: String,

    /// Fixed arguments placed before the prompt
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
        }
    }
}

/// Output capture limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Per-instance buffer cap in bytes
    #[serde(rename = "max-bytes")]
    pub max_bytes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
        }
    }
}

/// Supervisor timeout thresholds, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// No output at all for this long -> Stuck
    pub activity: u64,

    /// Output grows but the tail is frozen this long -> Stuck
    pub stale: u64,

    /// Wall-clock bound for a whole run -> Timeout
    pub completion: u64,

    /// Trailing window the stale fingerprint covers
    #[serde(rename = "stale-window-bytes")]
    pub stale_window_bytes: usize,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            activity: 120,
            stale: 300,
            completion: 1800,
            stale_window_bytes: 4096,
        }
    }
}

impl TimeoutsConfig {
    pub fn to_timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig {
            activity: Duration::from_secs(self.activity),
            stale: Duration::from_secs(self.stale),
            completion: Duration::from_secs(self.completion),
            stale_window_bytes: self.stale_window_bytes,
        }
    }
}

/// Plan execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Live instances across the whole plan
    #[serde(rename = "max-parallel")]
    pub max_parallel: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_parallel: 3 }
    }
}

/// Ralph loop defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    /// Iteration cap when the user omits one
    #[serde(rename = "max-iterations-default")]
    pub max_iterations_default: u32,

    /// Start the next iteration without waiting for the user
    #[serde(rename = "auto-continue")]
    pub auto_continue: bool,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations_default: 10,
            auto_continue: true,
        }
    }
}

/// Adversarial loop defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdversarialConfig {
    /// Round cap when the user omits one
    #[serde(rename = "max-rounds-default")]
    pub max_rounds_default: u32,
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self { max_rounds_default: 5 }
    }
}

/// Tick driver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(rename = "tick-ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 100 }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

/// Working-copy provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Path to the main repository
    #[serde(rename = "repo-root")]
    pub repo_root: PathBuf,

    /// Directory worktrees are created under
    #[serde(rename = "base-dir")]
    pub base_dir: PathBuf,

    /// Branch prefix for worktree branches
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            base_dir: PathBuf::from("/tmp/agentherd/worktrees"),
            branch_prefix: "agentherd".to_string(),
        }
    }
}

/// Ultra-plan session options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UltraPlanConfig {
    pub notifications: NotificationsConfig,
}

/// User alerts on plan completion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub enabled: bool,

    #[serde(rename = "use-sound")]
    pub use_sound: bool,

    #[serde(rename = "sound-path")]
    pub sound_path: Option<PathBuf>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_sound: false,
            sound_path: None,
        }
    }
}
