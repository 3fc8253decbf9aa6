use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::FleetConfig;
use crate::db::{InstanceRegistry, RegistryError};
use crate::instance::{Instance, InstanceId, InstanceStatus, launch};
use crate::kind::{KindRegistry, Liveness, ProbeTarget};
use crate::process::{ManagedProcess, RunError};

// ── Typed lifecycle errors ─────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("no instance with id {0}")]
    NotFound(InstanceId),
    #[error("no log file at {}", .0.display())]
    LogFileMissing(PathBuf),
    #[error("another running instance already uses this token")]
    DuplicateToken,
    #[error("workspace {} no longer exists; deploy again", .0.display())]
    WorkspaceMissing(PathBuf),
    #[error("launch failed: {0}")]
    Launch(RunError),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl From<RegistryError> for LifecycleError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(id) => Self::NotFound(id),
            RegistryError::DuplicateToken => Self::DuplicateToken,
            RegistryError::Storage(e) => Self::Storage(e),
        }
    }
}

/// Result of a live status check.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub instance: Instance,
    pub liveness: Liveness,
    pub checked_at: DateTime<Utc>,
}

// ── Per-instance locks ─────────────────────────────────────────

/// Serializes stop/restart/relaunch of the same instance within this process.
#[derive(Default)]
struct InstanceLocks {
    locks: Mutex<HashMap<InstanceId, Arc<AsyncMutex<()>>>>,
}

impl InstanceLocks {
    fn slot(&self, id: InstanceId) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(id).or_default().clone()
    }

    async fn acquire(&self, id: InstanceId) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    fn try_acquire(&self, id: InstanceId) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }
}

// ── Lifecycle ──────────────────────────────────────────────────

/// Operator-facing operations on existing instances. Cheap to clone.
#[derive(Clone)]
pub struct Lifecycle {
    registry: Arc<dyn InstanceRegistry>,
    kinds: Arc<KindRegistry>,
    config: Arc<FleetConfig>,
    locks: Arc<InstanceLocks>,
}

impl Lifecycle {
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        kinds: Arc<KindRegistry>,
        config: Arc<FleetConfig>,
    ) -> Self {
        Self {
            registry,
            kinds,
            config,
            locks: Arc::new(InstanceLocks::default()),
        }
    }

    /// Start-up reconciliation: nothing this supervisor launched before it
    /// started is considered managed, so every running row becomes stopped.
    pub fn startup_sweep(&self) -> Result<usize, LifecycleError> {
        let running = self.registry.list_by_status(InstanceStatus::Running)?;
        for instance in &running {
            if let Some(pid) = instance.pid() {
                if crate::process::is_pid_alive(pid) {
                    tracing::warn!(
                        "startup sweep: '{}' had PID {pid}, which still exists; it is no longer managed",
                        instance.name
                    );
                }
            }
        }
        let swept = self.registry.stop_all_running()?;
        tracing::info!("startup sweep: marked {swept} instance(s) stopped");
        Ok(swept)
    }

    /// Stop an instance. Idempotent: stopping a stopped instance succeeds.
    pub async fn stop(&self, id: InstanceId) -> Result<Instance, LifecycleError> {
        let _guard = self.locks.acquire(id).await;
        let instance = self.registry.get(id)?;
        self.stop_process(&instance).await;
        let stopped = self.registry.mark_stopped(id)?;
        tracing::info!(instance = %stopped.name, id, "stopped");
        Ok(stopped)
    }

    /// Stop, then relaunch from the stored recipe in the existing workspace.
    /// Source is not fetched again.
    pub async fn restart(&self, id: InstanceId) -> Result<Instance, LifecycleError> {
        let _guard = self.locks.acquire(id).await;
        let instance = self.registry.get(id)?;

        if let Some(token) = instance.external_token.as_deref() {
            if self.registry.token_in_use(token, Some(id))? {
                return Err(LifecycleError::DuplicateToken);
            }
        }

        match self.relaunch_locked(&instance).await {
            Ok(restarted) => Ok(restarted),
            Err(e) => {
                if let Err(mark) = self.registry.mark_stopped(id) {
                    tracing::warn!(
                        "failed to mark '{}' stopped after failed restart: {mark}",
                        instance.name
                    );
                }
                Err(e)
            }
        }
    }

    /// Probe an instance now.
    pub async fn status(&self, id: InstanceId) -> Result<StatusReport, LifecycleError> {
        let instance = self.registry.get(id)?;
        let liveness = self.probe(&instance).await;
        Ok(StatusReport {
            instance,
            liveness,
            checked_at: Utc::now(),
        })
    }

    /// All instances, newest first.
    pub fn list(&self) -> Result<Vec<Instance>, LifecycleError> {
        Ok(self.registry.list()?)
    }

    /// Last `lines` lines of the instance log.
    pub async fn logs(&self, id: InstanceId, lines: usize) -> Result<String, LifecycleError> {
        let instance = self.registry.get(id)?;
        let path = instance.log_file_path;
        match read_tail(&path, lines).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(LifecycleError::LogFileMissing(path))
            }
            Err(e) => Err(LifecycleError::Storage(
                anyhow::Error::new(e).context(format!("failed to read {}", path.display())),
            )),
        }
    }

    // ── Supervision hooks ──────────────────────────────────────

    pub fn running_instances(&self) -> Result<Vec<Instance>, LifecycleError> {
        Ok(self.registry.list_by_status(InstanceStatus::Running)?)
    }

    /// Type-appropriate liveness probe.
    pub async fn probe(&self, instance: &Instance) -> Liveness {
        let Some(kind) = self.kinds.get(&instance.kind) else {
            return Liveness::down(format!("unknown instance type '{}'", instance.kind));
        };
        let target = ProbeTarget {
            pid: instance.pid(),
            token: instance.external_token.as_deref(),
        };
        kind.probe_liveness(target).await
    }

    /// Relaunch an instance the supervisor found down while it was running
    /// as `probed_pid`. Returns `Ok(None)` when another operation holds the
    /// instance, or the row has moved on since the probe (stopped, or
    /// restarted onto a new pid).
    pub async fn repair(
        &self,
        id: InstanceId,
        probed_pid: Option<u32>,
    ) -> Result<Option<Instance>, LifecycleError> {
        let Some(_guard) = self.locks.try_acquire(id) else {
            tracing::debug!("instance {id} busy, skipping repair");
            return Ok(None);
        };
        // Re-read under the lock: a concurrent stop or restart wins.
        let instance = self.registry.get(id)?;
        if !instance.is_running() || instance.pid() != probed_pid {
            return Ok(None);
        }
        self.relaunch_locked(&instance).await.map(Some)
    }

    // ── Internal (caller holds the instance lock) ──────────────

    /// Terminate the recorded process, but only if it is still the one
    /// launched for this instance.
    async fn stop_process(&self, instance: &Instance) {
        let Some(pid) = instance.pid() else {
            return;
        };
        let process = ManagedProcess::from_pid(pid);
        if !process.is_alive() {
            return;
        }
        if !launch::belongs_to(&process, &instance.name) {
            tracing::warn!(
                "PID {pid} recorded for '{}' is alive but was not launched for it; leaving it alone",
                instance.name
            );
            return;
        }
        process.terminate(self.config.stop_grace()).await;
    }

    async fn relaunch_locked(&self, instance: &Instance) -> Result<Instance, LifecycleError> {
        self.stop_process(instance).await;

        if !instance.workspace_path.is_dir() {
            return Err(LifecycleError::WorkspaceMissing(
                instance.workspace_path.clone(),
            ));
        }

        let managed = launch::start_recipe(
            &self.config.env,
            &instance.name,
            &instance.workspace_path,
            &instance.log_file_path,
            &instance.recipe,
            instance.external_token.as_deref(),
        )
        .map_err(LifecycleError::Launch)?;

        match self
            .registry
            .record_restart(instance.id, managed.pid(), Utc::now())
        {
            Ok(updated) => {
                tracing::info!(
                    instance = %updated.name,
                    pid = managed.pid(),
                    restarts = updated.restart_count,
                    "relaunched"
                );
                Ok(updated)
            }
            Err(e) => {
                managed.terminate(self.config.stop_grace()).await;
                Err(e.into())
            }
        }
    }
}

const TAIL_CHUNK: u64 = 64 * 1024;

/// Last `lines` lines of the file at `path`, read backwards from the end a
/// chunk at a time so long-lived logs are never loaded whole.
async fn read_tail(path: &Path, lines: usize) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    if lines == 0 {
        return Ok(String::new());
    }
    let mut start = file.metadata().await?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut newlines = 0;

    // One more break than requested guarantees the first kept line is whole.
    while start > 0 && newlines <= lines {
        let step = start.min(TAIL_CHUNK);
        start -= step;
        file.seek(SeekFrom::Start(start)).await?;
        let mut chunk = vec![0; usize::try_from(step).unwrap_or(0)];
        file.read_exact(&mut chunk).await?;
        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunk.extend_from_slice(&buf);
        buf = chunk;
    }
    Ok(tail(&String::from_utf8_lossy(&buf), lines))
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_last_lines() {
        let text = "one\ntwo\nthree\nfour\n";
        assert_eq!(tail(text, 2), "three\nfour");
        assert_eq!(tail(text, 10), "one\ntwo\nthree\nfour");
        assert_eq!(tail(text, 0), "");
        assert_eq!(tail("", 5), "");
    }

    #[tokio::test]
    async fn read_tail_spans_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.log");
        let text: String = (0..20_000).map(|i| format!("line {i}\n")).collect();
        assert!(text.len() as u64 > 2 * TAIL_CHUNK);
        std::fs::write(&path, &text).unwrap();

        assert_eq!(
            read_tail(&path, 3).await.unwrap(),
            "line 19997\nline 19998\nline 19999"
        );
        let many = read_tail(&path, 12_000).await.unwrap();
        assert_eq!(many.lines().count(), 12_000);
        assert!(many.starts_with("line 8000\n"));
        assert_eq!(read_tail(&path, 0).await.unwrap(), "");
    }

    #[tokio::test]
    async fn read_tail_of_short_file_returns_everything() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("short.log");
        std::fs::write(&path, "one\ntwo").unwrap();
        assert_eq!(read_tail(&path, 10).await.unwrap(), "one\ntwo");
        std::fs::write(&path, "").unwrap();
        assert_eq!(read_tail(&path, 10).await.unwrap(), "");
    }

    #[tokio::test]
    async fn try_acquire_fails_while_held() {
        let locks = InstanceLocks::default();
        let held = locks.acquire(7).await;
        assert!(locks.try_acquire(7).is_none());
        assert!(locks.try_acquire(8).is_some());
        drop(held);
        assert!(locks.try_acquire(7).is_some());
    }

    #[test]
    fn registry_errors_map_to_lifecycle_errors() {
        assert!(matches!(
            LifecycleError::from(RegistryError::NotFound(3)),
            LifecycleError::NotFound(3)
        ));
        assert!(matches!(
            LifecycleError::from(RegistryError::DuplicateToken),
            LifecycleError::DuplicateToken
        ));
    }
}
