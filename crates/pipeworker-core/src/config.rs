//! Worker and pool configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ipc::frame::DEFAULT_MAX_FRAME;

/// Environment variable overriding [`WorkerConfig::workdir_root`].
pub const ENV_WORKDIR_ROOT: &str = "PIPEWORKER_WORKDIR_ROOT";

/// Environment variable overriding [`WorkerConfig::exit_timeout_ms`].
pub const ENV_EXIT_TIMEOUT_MS: &str = "PIPEWORKER_EXIT_TIMEOUT_MS";

/// Settings of a single worker process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Parent of the working directory; the system temp dir when unset.
    pub workdir_root: Option<PathBuf>,
    /// Prefix of the working directory name.
    pub workdir_prefix: String,
    /// Keep named results alive in the engine for warm starts.
    pub use_restart_cache: bool,
    /// How long a graceful `Exit` may take before the process is killed.
    pub exit_timeout_ms: u64,
    /// Poll interval of the startup watchdog.
    pub watchdog_interval_ms: u64,
    /// Version sent with the `Hello` handshake.
    pub protocol_version: i64,
    /// Largest reply frame accepted from the engine.
    pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workdir_root: None,
            workdir_prefix: "pipeworker".to_string(),
            use_restart_cache: true,
            exit_timeout_ms: 2000,
            watchdog_interval_ms: 10,
            protocol_version: 1,
            max_frame_bytes: DEFAULT_MAX_FRAME,
        }
    }
}

impl WorkerConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid worker config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Apply `PIPEWORKER_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = lookup(ENV_WORKDIR_ROOT) {
            self.workdir_root = Some(PathBuf::from(root));
        }
        if let Some(timeout) = lookup(ENV_EXIT_TIMEOUT_MS) {
            self.exit_timeout_ms = timeout.parse().map_err(|e| {
                Error::Config(format!("{} must be an integer: {}", ENV_EXIT_TIMEOUT_MS, e))
            })?;
        }
        Ok(self)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }
}

/// Settings of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub worker: WorkerConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: rayon::current_num_threads(),
            worker: WorkerConfig {
                workdir_prefix: "pipeworker_pool".to_string(),
                ..WorkerConfig::default()
            },
        }
    }
}

impl PoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Self::default()
        }
    }

    /// Configuration of pool member `index`.
    ///
    /// Tasks are not pinned to a worker, so warm starts cannot be relied on
    /// and the restart cache is always off.
    pub fn member(&self, index: usize) -> WorkerConfig {
        WorkerConfig {
            workdir_prefix: format!("{}_{}", self.worker.workdir_prefix, index),
            use_restart_cache: false,
            ..self.worker.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = WorkerConfig::from_json_str(r#"{"use_restart_cache": false}"#).unwrap();
        assert!(!config.use_restart_cache);
        assert_eq!(config.exit_timeout(), Duration::from_secs(2));
        assert_eq!(config.workdir_prefix, "pipeworker");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            WorkerConfig::from_json_str("{nope"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = WorkerConfig::default()
            .with_overrides(|key| match key {
                ENV_WORKDIR_ROOT => Some("/scratch".to_string()),
                ENV_EXIT_TIMEOUT_MS => Some("500".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.workdir_root, Some(PathBuf::from("/scratch")));
        assert_eq!(config.exit_timeout_ms, 500);

        let bad = WorkerConfig::default().with_overrides(|key| {
            (key == ENV_EXIT_TIMEOUT_MS).then(|| "soon".to_string())
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_pool_members_disable_cache() {
        let pool = PoolConfig::new(3);
        let member = pool.member(2);
        assert!(!member.use_restart_cache);
        assert_eq!(member.workdir_prefix, "pipeworker_pool_2");
    }
}
