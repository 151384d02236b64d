//! Builtin recovery actions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde_json::{Value, json};

use super::types::RecoveryActionHandler;
use crate::error::{CallResult, ResilienceError};
use crate::resilience::CircuitBreakerRegistry;

fn action_error(action: &str, err: impl std::fmt::Display) -> ResilienceError {
    ResilienceError::RecoveryAction {
        action: action.to_string(),
        message: err.to_string(),
    }
}

/// Removes and recreates the temp directory.
#[derive(Debug, Clone)]
pub struct CleanupTempFiles {
    dir: PathBuf,
}

impl CleanupTempFiles {
    /// Clean `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl RecoveryActionHandler for CleanupTempFiles {
    async fn run(&self) -> CallResult<Value> {
        let existed = tokio::fs::try_exists(&self.dir).await.unwrap_or(false);
        if existed {
            tokio::fs::remove_dir_all(&self.dir)
                .await
                .map_err(|e| action_error("cleanup_temp_files", e))?;
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| action_error("cleanup_temp_files", e))?;
        tracing::info!(dir = %self.dir.display(), "Temp directory cleaned");
        Ok(json!({ "action": "temp_files_cleaned", "existed": existed }))
    }
}

/// Removes the application cache directories.
#[derive(Debug, Clone)]
pub struct ClearApplicationCache {
    dirs: Vec<PathBuf>,
}

impl ClearApplicationCache {
    /// Clear every directory in `dirs`.
    #[must_use]
    pub const fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl RecoveryActionHandler for ClearApplicationCache {
    async fn run(&self) -> CallResult<Value> {
        let mut cleaned = 0;
        for dir in &self.dirs {
            if tokio::fs::try_exists(dir).await.unwrap_or(false) {
                tokio::fs::remove_dir_all(dir)
                    .await
                    .map_err(|e| action_error("clear_application_cache", e))?;
                cleaned += 1;
            }
        }
        tracing::info!(cleaned_directories = cleaned, "Application cache cleared");
        Ok(json!({ "cleaned_directories": cleaned }))
    }
}

/// Deletes `*.log` files older than a maximum age, recursively.
#[derive(Debug, Clone)]
pub struct CleanupLogFiles {
    dir: PathBuf,
    max_age: Duration,
}

impl CleanupLogFiles {
    /// Default age after which log files are deleted.
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

    /// Clean logs under `dir` older than `max_age`.
    #[must_use]
    pub const fn new(dir: PathBuf, max_age: Duration) -> Self {
        Self { dir, max_age }
    }
}

fn remove_old_logs(dir: &Path, cutoff: SystemTime) -> std::io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            removed += remove_old_logs(&path, cutoff)?;
        } else if path.extension().is_some_and(|ext| ext == "log") && metadata.modified()? < cutoff {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[async_trait]
impl RecoveryActionHandler for CleanupLogFiles {
    async fn run(&self) -> CallResult<Value> {
        let dir = self.dir.clone();
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(json!({ "cleaned_files": 0, "message": "no log directory" }));
        }
        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let removed = tokio::task::spawn_blocking(move || remove_old_logs(&dir, cutoff))
            .await
            .map_err(|e| action_error("cleanup_log_files", e))?
            .map_err(|e| action_error("cleanup_log_files", e))?;
        tracing::info!(cleaned_files = removed, "Old log files removed");
        Ok(json!({ "cleaned_files": removed }))
    }
}

/// Force-closes every circuit breaker.
#[derive(Debug, Clone)]
pub struct ResetNetworkConnections {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl ResetNetworkConnections {
    /// Reset breakers in `breakers`.
    #[must_use]
    pub const fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }
}

#[async_trait]
impl RecoveryActionHandler for ResetNetworkConnections {
    async fn run(&self) -> CallResult<Value> {
        let reset = self.breakers.reset_all();
        tracing::info!(reset_breakers = reset, "Network connections reset");
        Ok(json!({ "reset_breakers": reset }))
    }
}

/// Raises an error-level alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertAdministrators;

#[async_trait]
impl RecoveryActionHandler for AlertAdministrators {
    async fn run(&self) -> CallResult<Value> {
        tracing::error!(alert = true, "System health degraded, administrator attention required");
        Ok(json!({ "alerted": true }))
    }
}
