//! Directory layout for journals and scratch files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::observability::default_true;

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write error and recovery journals.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Root of the journals: `<log_dir>/errors`, `<log_dir>/recovery`.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Scratch directory probed by `filesystem_health`.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Directories removed by `clear_application_cache`.
    #[serde(default = "default_cache_dirs")]
    pub cache_dirs: Vec<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: default_log_dir(),
            temp_dir: default_temp_dir(),
            cache_dirs: default_cache_dirs(),
        }
    }
}

impl PersistenceConfig {
    /// Directory of the error journal.
    #[must_use]
    pub fn error_dir(&self) -> PathBuf {
        self.log_dir.join("errors")
    }

    /// Directory of the recovery history journal.
    #[must_use]
    pub fn recovery_dir(&self) -> PathBuf {
        self.log_dir.join("recovery")
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_cache_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("./cache")]
}
