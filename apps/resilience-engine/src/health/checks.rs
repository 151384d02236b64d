//! Builtin health probes.
//!
//! Host metrics come from `sysinfo`. Refreshing them blocks (CPU usage needs
//! two samples `MINIMUM_CPU_UPDATE_INTERVAL` apart), so every host probe
//! runs its refresh on the blocking pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sysinfo::{Disks, MINIMUM_CPU_UPDATE_INTERVAL, Pid, ProcessesToUpdate, System};

use super::types::{HealthProbe, HealthReading, Thresholds};
use crate::error::{CallResult, ResilienceError};
use crate::error_store::ErrorStore;
use crate::network::NetworkClient;

/// `cpu_usage` thresholds (percent).
pub const CPU_USAGE_THRESHOLDS: Thresholds = Thresholds::new(80.0, 95.0);
/// `memory_usage` thresholds (percent).
pub const MEMORY_USAGE_THRESHOLDS: Thresholds = Thresholds::new(85.0, 95.0);
/// `disk_space` thresholds (percent used).
pub const DISK_SPACE_THRESHOLDS: Thresholds = Thresholds::new(85.0, 95.0);
/// `process_health` thresholds (score, lower is worse).
pub const PROCESS_HEALTH_THRESHOLDS: Thresholds = Thresholds::new(80.0, 60.0);

const PROBE_FILE: &str = "health_check.tmp";
const PROBE_CONTENT: &str = "health check";

/// Write/read probe in a directory. Scores 100 when the round trip works,
/// 50 when the content differs and 0 when I/O fails.
#[derive(Debug, Clone)]
pub struct FilesystemProbe {
    dir: PathBuf,
}

impl FilesystemProbe {
    /// Probe `dir`, creating it if needed.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    async fn round_trip(&self) -> std::io::Result<bool> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(PROBE_FILE);
        tokio::fs::write(&path, PROBE_CONTENT).await?;
        let content = tokio::fs::read_to_string(&path).await?;
        tokio::fs::remove_file(&path).await?;
        Ok(content == PROBE_CONTENT)
    }
}

#[async_trait]
impl HealthProbe for FilesystemProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        let reading = match self.round_trip().await {
            Ok(true) => HealthReading::new(100.0, "score")
                .with_details(json!({ "writable": true, "readable": true })),
            Ok(false) => HealthReading::new(50.0, "score")
                .with_details(json!({ "writable": true, "readable": true, "content_mismatch": true })),
            Err(e) => HealthReading::new(0.0, "score").with_details(json!({
                "writable": false,
                "readable": false,
                "error": e.to_string(),
            })),
        };
        Ok(reading)
    }
}

/// Network health as a success percentage.
///
/// Probes `urls` when any are configured; otherwise reports the client's
/// request success rate (100 before any request was made).
#[derive(Debug, Clone)]
pub struct NetworkConnectivityProbe {
    client: Arc<NetworkClient>,
    urls: Vec<String>,
}

impl NetworkConnectivityProbe {
    /// Probe through `client`.
    #[must_use]
    pub const fn new(client: Arc<NetworkClient>, urls: Vec<String>) -> Self {
        Self { client, urls }
    }
}

#[async_trait]
impl HealthProbe for NetworkConnectivityProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        if self.urls.is_empty() {
            let stats = self.client.stats();
            let value = if stats.total_requests == 0 {
                100.0
            } else {
                stats.success_rate
            };
            return Ok(HealthReading::new(value, "%").with_details(json!({
                "source": "request_stats",
                "total_requests": stats.total_requests,
                "failed_requests": stats.failed_requests,
            })));
        }

        let report = self.client.check_connectivity(&self.urls).await;
        Ok(HealthReading::new(report.success_rate(), "%").with_details(json!({
            "source": "connectivity_probe",
            "successful_checks": report.successful_checks,
            "failed_checks": report.failed_checks,
            "average_latency_ms": report.average_latency.as_millis() as u64,
        })))
    }
}

/// Errors recorded within a trailing window.
#[derive(Debug, Clone)]
pub struct ErrorRateProbe {
    store: Arc<ErrorStore>,
    window: Duration,
}

impl ErrorRateProbe {
    /// Count errors in `store` over the last `window`.
    #[must_use]
    pub const fn new(store: Arc<ErrorStore>, window: Duration) -> Self {
        Self { store, window }
    }
}

#[async_trait]
impl HealthProbe for ErrorRateProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        let count = self.store.count_within(self.window);
        Ok(HealthReading::new(count as f64, "count").with_details(json!({
            "window_secs": self.window.as_secs(),
            "total_errors": self.store.len(),
        })))
    }
}

/// `used` as a percentage of `total`, 0 when `total` is 0.
#[must_use]
pub fn usage_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Score for this process: 100, minus 30 when it saturates its CPU share and
/// minus 30 when it holds more than half of the host memory.
#[must_use]
pub fn process_health_score(cpu_percent: f64, memory_share: f64) -> f64 {
    let mut score = 100.0;
    if cpu_percent > 90.0 {
        score -= 30.0;
    }
    if memory_share > 50.0 {
        score -= 30.0;
    }
    score
}

/// Longest mount point containing `path`.
fn mount_for<'a>(path: &Path, mounts: impl IntoIterator<Item = &'a Path>) -> Option<&'a Path> {
    mounts
        .into_iter()
        .filter(|mount| path.starts_with(mount))
        .max_by_key(|mount| mount.components().count())
}

/// Shared `sysinfo` handle.
#[derive(Clone)]
pub struct SystemSampler {
    system: Arc<Mutex<System>>,
}

impl std::fmt::Debug for SystemSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSampler").finish_non_exhaustive()
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    /// Sampler with nothing loaded yet; probes refresh what they read.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    async fn sample<T, F>(&self, read: F) -> CallResult<T>
    where
        F: FnOnce(&mut System) -> CallResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || read(&mut *system.lock()))
            .await
            .map_err(|e| ResilienceError::system(format!("host sampling task failed: {e}")))?
    }
}

/// Global CPU usage in percent.
#[derive(Debug, Clone)]
pub struct CpuUsageProbe {
    sampler: SystemSampler,
}

impl CpuUsageProbe {
    /// Probe through `sampler`.
    #[must_use]
    pub const fn new(sampler: SystemSampler) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl HealthProbe for CpuUsageProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        self.sampler
            .sample(|system| {
                system.refresh_cpu_usage();
                std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
                system.refresh_cpu_usage();
                let per_cpu: Vec<f32> = system.cpus().iter().map(sysinfo::Cpu::cpu_usage).collect();
                Ok(HealthReading::new(f64::from(system.global_cpu_usage()), "%").with_details(json!({
                    "cpu_count": per_cpu.len(),
                    "per_cpu": per_cpu,
                })))
            })
            .await
    }
}

/// Used memory in percent of total.
#[derive(Debug, Clone)]
pub struct MemoryUsageProbe {
    sampler: SystemSampler,
}

impl MemoryUsageProbe {
    /// Probe through `sampler`.
    #[must_use]
    pub const fn new(sampler: SystemSampler) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl HealthProbe for MemoryUsageProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        self.sampler
            .sample(|system| {
                system.refresh_memory();
                let total = system.total_memory();
                let used = system.used_memory();
                Ok(HealthReading::new(usage_percent(used, total), "%").with_details(json!({
                    "total": total,
                    "used": used,
                    "available": system.available_memory(),
                    "free": system.free_memory(),
                })))
            })
            .await
    }
}

/// Used space of the disk holding `path`, in percent.
#[derive(Debug, Clone)]
pub struct DiskSpaceProbe {
    path: PathBuf,
}

impl DiskSpaceProbe {
    /// Probe the disk mounted at or above `path`.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl HealthProbe for DiskSpaceProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        let path = std::path::absolute(&self.path)
            .map_err(|e| ResilienceError::system(format!("resolve '{}': {e}", self.path.display())))?;

        tokio::task::spawn_blocking(move || {
            let disks = Disks::new_with_refreshed_list();
            let mount = mount_for(&path, disks.list().iter().map(sysinfo::Disk::mount_point))
                .ok_or_else(|| ResilienceError::system(format!("no disk mounted for '{}'", path.display())))?;
            let Some(disk) = disks.list().iter().find(|d| d.mount_point() == mount) else {
                return Err(ResilienceError::system(format!("disk at '{}' disappeared", mount.display())));
            };

            let total = disk.total_space();
            let free = disk.available_space();
            let used = total.saturating_sub(free);
            Ok(HealthReading::new(usage_percent(used, total), "%").with_details(json!({
                "mount_point": mount.display().to_string(),
                "total": total,
                "used": used,
                "free": free,
            })))
        })
        .await
        .map_err(|e| ResilienceError::system(format!("disk sampling task failed: {e}")))?
    }
}

/// Resource use of this process as a [`process_health_score`].
#[derive(Debug, Clone)]
pub struct ProcessHealthProbe {
    sampler: SystemSampler,
    pid: Pid,
}

impl ProcessHealthProbe {
    /// Probe the current process.
    pub fn current(sampler: SystemSampler) -> CallResult<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| ResilienceError::system(format!("current pid: {e}")))?;
        Ok(Self { sampler, pid })
    }
}

#[async_trait]
impl HealthProbe for ProcessHealthProbe {
    async fn probe(&self) -> CallResult<HealthReading> {
        let pid = self.pid;
        self.sampler
            .sample(move |system| {
                system.refresh_memory();
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
                system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

                let process = system
                    .process(pid)
                    .ok_or_else(|| ResilienceError::system(format!("process {pid} not found")))?;
                let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
                let cpu_percent = f64::from(process.cpu_usage()) / cores as f64;
                let memory_share = usage_percent(process.memory(), system.total_memory());

                Ok(HealthReading::new(process_health_score(cpu_percent, memory_share), "score")
                    .with_details(json!({
                        "pid": pid.as_u32(),
                        "cpu_percent": cpu_percent,
                        "memory_bytes": process.memory(),
                        "memory_percent": memory_share,
                    })))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_case::test_case;

    use super::*;
    use crate::health::HealthStatus;

    #[tokio::test]
    async fn test_filesystem_probe_healthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let probe = FilesystemProbe::new(dir.path().join("probe"));
        let reading = probe.probe().await.expect("reading");
        assert!((reading.value - 100.0).abs() < f64::EPSILON);
        assert!(!dir.path().join("probe").join(PROBE_FILE).exists());
    }

    #[tokio::test]
    async fn test_filesystem_probe_unwritable() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A regular file where the directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "x").expect("write");
        let probe = FilesystemProbe::new(blocker);
        let reading = probe.probe().await.expect("reading");
        assert!(reading.value.abs() < f64::EPSILON);
        assert_eq!(reading.details["writable"], false);
    }

    #[tokio::test]
    async fn test_error_rate_counts_recent() {
        let store = Arc::new(ErrorStore::new());
        for _ in 0..3 {
            store.record_error(&ResilienceError::api("x"), "probe", 1, BTreeMap::new());
        }
        let probe = ErrorRateProbe::new(Arc::clone(&store), Duration::from_secs(3600));
        let reading = probe.probe().await.expect("reading");
        assert!((reading.value - 3.0).abs() < f64::EPSILON);
        assert_eq!(reading.unit, "count");
    }

    #[test_case(CPU_USAGE_THRESHOLDS, 45.0, HealthStatus::Healthy; "cpu idle")]
    #[test_case(CPU_USAGE_THRESHOLDS, 85.0, HealthStatus::Warning; "cpu busy")]
    #[test_case(CPU_USAGE_THRESHOLDS, 97.0, HealthStatus::Critical; "cpu saturated")]
    #[test_case(MEMORY_USAGE_THRESHOLDS, 60.0, HealthStatus::Healthy; "memory normal")]
    #[test_case(MEMORY_USAGE_THRESHOLDS, 90.0, HealthStatus::Warning; "memory high")]
    #[test_case(MEMORY_USAGE_THRESHOLDS, 95.0, HealthStatus::Critical; "memory exhausted")]
    #[test_case(DISK_SPACE_THRESHOLDS, 50.0, HealthStatus::Healthy; "disk roomy")]
    #[test_case(DISK_SPACE_THRESHOLDS, 85.0, HealthStatus::Warning; "disk filling")]
    #[test_case(DISK_SPACE_THRESHOLDS, 99.0, HealthStatus::Critical; "disk full")]
    #[test_case(PROCESS_HEALTH_THRESHOLDS, process_health_score(10.0, 5.0), HealthStatus::Healthy; "process idle")]
    #[test_case(PROCESS_HEALTH_THRESHOLDS, process_health_score(99.0, 5.0), HealthStatus::Warning; "process cpu bound")]
    #[test_case(PROCESS_HEALTH_THRESHOLDS, process_health_score(99.0, 70.0), HealthStatus::Critical; "process saturated")]
    fn test_host_metric_classification(thresholds: Thresholds, value: f64, expected: HealthStatus) {
        assert_eq!(thresholds.classify(value), expected);
    }

    #[test]
    fn test_usage_percent() {
        assert!((usage_percent(25, 100) - 25.0).abs() < f64::EPSILON);
        assert!(usage_percent(10, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mount_for_picks_longest_prefix() {
        let mounts = [Path::new("/"), Path::new("/var"), Path::new("/var/log/archive")];
        assert_eq!(mount_for(Path::new("/var/log/app"), mounts), Some(Path::new("/var")));
        assert_eq!(mount_for(Path::new("/home/user"), mounts), Some(Path::new("/")));
        assert_eq!(mount_for(Path::new("/var/log/app"), [Path::new("/srv")]), None);
    }

    #[tokio::test]
    async fn test_memory_probe_reports_percentage() {
        let reading = MemoryUsageProbe::new(SystemSampler::new()).probe().await.expect("reading");
        assert_eq!(reading.unit, "%");
        assert!((0.0..=100.0).contains(&reading.value));
        assert!(reading.details["total"].as_u64().is_some_and(|total| total > 0));
    }

    #[tokio::test]
    async fn test_process_probe_scores_current_process() {
        let probe = ProcessHealthProbe::current(SystemSampler::new()).expect("pid");
        let reading = probe.probe().await.expect("reading");
        assert_eq!(reading.unit, "score");
        assert!([40.0, 70.0, 100.0].contains(&reading.value));
        assert_eq!(reading.details["pid"], std::process::id());
    }
}
