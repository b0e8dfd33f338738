//! Process-wide startup configuration (§1 ambient stack, §6): the env vars
//! every other crate documents are read once here, not scattered through
//! call sites, mirroring `claude-view-server`'s `get_port`/`get_static_dir`
//! helpers generalized into one struct.

use std::path::PathBuf;

use codemem_core::RawEventsConfig;

/// Everything a `serve` invocation needs, resolved once from the process
/// environment. `Default` reproduces the documented defaults for tests and
/// programmatic construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: Option<PathBuf>,
    pub keys_dir: Option<PathBuf>,
    pub default_project: Option<String>,
    pub sync_port: u16,
    pub raw_events: RawEventsConfig,
    pub device_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            keys_dir: None,
            default_project: None,
            sync_port: 47960,
            raw_events: RawEventsConfig::default(),
            device_id: "local".to_string(),
        }
    }
}

impl ServerConfig {
    /// Resolve configuration from the process environment (§6), falling
    /// back to platform defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            db_path: codemem_core::paths::db_path(),
            keys_dir: codemem_core::paths::keys_dir(),
            default_project: codemem_core::paths::default_project(),
            sync_port: codemem_core::paths::sync_port(),
            raw_events: RawEventsConfig::from_env(),
            device_id: std::env::var("CODEMEM_DEVICE_ID").unwrap_or_else(|_| "local".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.sync_port, 47960);
        assert!(!cfg.raw_events.auto_flush);
    }
}
