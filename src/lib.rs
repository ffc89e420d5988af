//! Browser fleet orchestration
//!
//! Drives many isolated browser profiles through caller-supplied automation
//! logic: slot-based window placement, filesystem profile locks with
//! liveness-based reclamation, per-profile proxy resolution, and sequential
//! or bounded-concurrent scheduling.

pub mod actions;
pub mod context;
pub mod error;
pub mod lock;
pub mod matrix;
pub mod notify;
pub mod profile;
pub mod proxy;
pub mod scheduler;
pub mod session;

use std::path::PathBuf;

use tracing::{error, info, warn};

pub use actions::{run_chain, ActionStep, Flow};
pub use context::{CancelToken, RunContext, TOOL_ID};
pub use error::{FleetError, SkipReason};
pub use matrix::{PositionMatrix, ScreenSize, WindowRect};
pub use profile::Profile;
pub use proxy::{ProxyChoice, ProxyResolver, ProxySpec};
pub use scheduler::{ConcurrentScheduler, RunReport, SequentialScheduler};
pub use session::{BrowserBackend, BrowserHandle, LaunchSpec, Session, SessionHandler, SessionLauncher};

/// Fleet configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    /// Maximum simultaneously active sessions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Delay between consecutive launches (seconds)
    #[serde(default = "default_stagger_secs")]
    pub stagger_secs: u64,
    /// Retry interval while waiting for a free matrix slot (seconds)
    #[serde(default = "default_slot_poll_secs")]
    pub slot_poll_secs: u64,
    /// Age past which a profile lock is reclaimed regardless of liveness
    /// (seconds)
    #[serde(default = "default_lock_max_age_secs")]
    pub lock_max_age_secs: u64,
    /// Proxy health-check timeout (seconds)
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
    /// Hard limit on browser startup before declaring failure (seconds)
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub disable_gpu: bool,

    /// Logical screen dimensions used for window placement
    #[serde(default)]
    pub screen: ScreenSize,

    /// Unpacked extension directories loaded into every session, beyond
    /// any per-profile proxy auth bundle
    #[serde(default)]
    pub extensions: Vec<PathBuf>,

    /// Shared fallback proxies, validated once at startup
    #[serde(default)]
    pub shared_proxies: Vec<String>,
}

fn default_max_concurrent() -> usize { 4 }
fn default_stagger_secs() -> u64 { 10 }
fn default_slot_poll_secs() -> u64 { 10 }
fn default_lock_max_age_secs() -> u64 { 43200 }
fn default_proxy_timeout_secs() -> u64 { 5 }
fn default_startup_timeout_secs() -> u64 { 45 }

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            stagger_secs: default_stagger_secs(),
            slot_poll_secs: default_slot_poll_secs(),
            lock_max_age_secs: default_lock_max_age_secs(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            headless: false,
            disable_gpu: false,
            screen: ScreenSize::default(),
            extensions: vec![],
            shared_proxies: vec![],
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("browserfleet").join("logs"))
}

impl FleetConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("browserfleet").join("config.json"))
    }

    /// Load config from file, falling back to defaults on any problem.
    /// A configuration error never hard-stops a run.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return Self::sanitized(config);
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Clamp out-of-range values instead of failing.
    fn sanitized(mut config: Self) -> Self {
        if config.max_concurrent == 0 {
            warn!("maxConcurrent must be at least 1, using 1");
            config.max_concurrent = 1;
        }
        config
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Initialize logging: console layer plus a daily-rolling file layer when
/// a log directory is available. Keep the returned guard alive for the
/// lifetime of the program.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "browserfleet.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
