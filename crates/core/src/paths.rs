//! Centralized path + environment-variable resolution (§6 External
//! interfaces). Mirrors `claude_view_core::paths`: a single source of truth
//! instead of ad-hoc `dirs::cache_dir().join(...)` calls scattered around.

use std::path::PathBuf;
use std::time::Duration;

/// App cache root: `~/.cache/codemem/` (Linux) or the platform equivalent.
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("codemem"))
}

/// SQLite database file, honoring `CODEMEM_DB` if set.
pub fn db_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CODEMEM_DB") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    app_cache_dir().map(|d| d.join("codemem.db"))
}

/// Legacy (pre-migration) database path this node may need to migrate from.
pub fn legacy_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".codemem").join("codemem.sqlite"))
}

/// Tantivy search index directory.
pub fn search_index_dir() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("search-index"))
}

/// Directory holding this device's sync identity keypair, honoring
/// `CODEMEM_KEYS_DIR`.
pub fn keys_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CODEMEM_KEYS_DIR") {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    app_cache_dir().map(|d| d.join("keys"))
}

/// The default project scope for requests that omit one, from
/// `CODEMEM_PROJECT`.
pub fn default_project() -> Option<String> {
    std::env::var("CODEMEM_PROJECT").ok().filter(|s| !s.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Err(_) => default,
        Ok(v) => !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | ""),
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Raw-event pipeline configuration, sourced from the §6 environment
/// variables. Constructed once at daemon startup; `Default` reproduces the
/// documented defaults for use in tests and programmatic callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventsConfig {
    pub auto_flush: bool,
    pub debounce: Duration,
    pub sweeper_enabled: bool,
    pub sweeper_interval: Duration,
    pub sweeper_idle: Duration,
    pub sweeper_limit: u64,
    pub worker_max_events: Option<u64>,
    pub retention: Duration,
    pub stuck_batch: Duration,
}

impl Default for RawEventsConfig {
    fn default() -> Self {
        Self {
            auto_flush: false,
            debounce: Duration::from_millis(60_000),
            sweeper_enabled: true,
            sweeper_interval: Duration::from_millis(30_000),
            sweeper_idle: Duration::from_millis(120_000),
            sweeper_limit: 25,
            worker_max_events: Some(250),
            retention: Duration::from_millis(0),
            stuck_batch: Duration::from_millis(300_000),
        }
    }
}

impl RawEventsConfig {
    /// Load from the process environment, falling back to documented
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let worker_max_events = env_u64(
            "CODEMEM_RAW_EVENTS_WORKER_MAX_EVENTS",
            defaults.worker_max_events.unwrap_or(250),
        );
        Self {
            auto_flush: env_flag("CODEMEM_RAW_EVENTS_AUTO_FLUSH", defaults.auto_flush),
            debounce: Duration::from_millis(env_u64(
                "CODEMEM_RAW_EVENTS_DEBOUNCE_MS",
                defaults.debounce.as_millis() as u64,
            )),
            sweeper_enabled: env_flag("CODEMEM_RAW_EVENTS_SWEEPER", defaults.sweeper_enabled),
            sweeper_interval: Duration::from_millis(env_u64(
                "CODEMEM_RAW_EVENTS_SWEEPER_INTERVAL_MS",
                defaults.sweeper_interval.as_millis() as u64,
            )),
            sweeper_idle: Duration::from_millis(env_u64(
                "CODEMEM_RAW_EVENTS_SWEEPER_IDLE_MS",
                defaults.sweeper_idle.as_millis() as u64,
            )),
            sweeper_limit: env_u64("CODEMEM_RAW_EVENTS_SWEEPER_LIMIT", defaults.sweeper_limit),
            worker_max_events: if worker_max_events == 0 { None } else { Some(worker_max_events) },
            retention: Duration::from_millis(env_u64("CODEMEM_RAW_EVENTS_RETENTION_MS", 0)),
            stuck_batch: Duration::from_millis(env_u64(
                "CODEMEM_RAW_EVENTS_STUCK_BATCH_MS",
                defaults.stuck_batch.as_millis() as u64,
            )),
        }
    }
}

/// Port the sync HTTP server binds, from `CODEMEM_SYNC_PORT`.
pub fn sync_port() -> u16 {
    std::env::var("CODEMEM_SYNC_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(47960)
}
