use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::Config;
use crate::error::ConfigError;

/// Live-reloadable configuration holder.
///
/// Wraps `Config` in an `ArcSwap` so readers never block and writers
/// atomically swap the pointer. The service loop calls [`ConfigHandle::reload`]
/// at cycle boundaries when a reload signal arrived, so an in-flight cycle
/// always completes under the snapshot it started with.
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
    path: PathBuf,
    data_dir: PathBuf,
}

impl ConfigHandle {
    /// Create a new handle seeded with `config`.
    pub fn new(config: Config) -> Self {
        let path = config.config_path.clone();
        let data_dir = config.data_dir.clone();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            path,
            data_dir,
        }
    }

    /// Load current config snapshot. Lock-free.
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.inner.load()
    }

    /// Return a clone of the current `Arc<Config>`.
    pub fn load_full(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Reload config from disk, atomically swapping the active snapshot.
    ///
    /// Returns `Ok(())` on success, propagating parse/validation errors. On
    /// error the previous snapshot stays active.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let fresh = Config::load_from(&self.path, &self.data_dir)
            .map_err(|e| ConfigError::HotReload(e.to_string()))?;
        self.inner.store(Arc::new(fresh));
        tracing::info!(path = %self.path.display(), "config reloaded");
        Ok(())
    }

    /// Manually swap in a new config (e.g. in tests).
    pub fn store(&self, config: Config) {
        self.inner.store(Arc::new(config));
    }

    /// Config file path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for ConfigHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            path: self.path.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}
