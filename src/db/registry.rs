use chrono::{DateTime, Utc};

use crate::instance::{Instance, InstanceId, InstanceStatus, NewInstance};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no instance with id {0}")]
    NotFound(InstanceId),
    #[error("token is already in use by a running instance")]
    DuplicateToken,
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Durable record of every deployed instance.
///
/// Every mutation touches exactly one row and is atomic. Implementations know
/// nothing about processes, files or commands.
pub trait InstanceRegistry: Send + Sync {
    /// Insert a freshly deployed instance as `running`. Fails with
    /// `DuplicateToken` if another running row holds the same token.
    fn insert(&self, new: NewInstance) -> Result<Instance, RegistryError>;

    fn get(&self, id: InstanceId) -> Result<Instance, RegistryError>;

    /// Whether a running row other than `excluding` holds `token`.
    fn token_in_use(&self, token: &str, excluding: Option<InstanceId>)
    -> Result<bool, RegistryError>;

    /// All instances, newest first.
    fn list(&self) -> Result<Vec<Instance>, RegistryError>;

    fn list_by_status(&self, status: InstanceStatus) -> Result<Vec<Instance>, RegistryError>;

    /// Record `stopped` and clear the pid.
    fn mark_stopped(&self, id: InstanceId) -> Result<Instance, RegistryError>;

    /// Record a relaunch: `running` with the new pid, `restart_count + 1`, and
    /// `last_restart_at` set to `at` (bumped if needed so it strictly increases).
    fn record_restart(
        &self,
        id: InstanceId,
        pid: u32,
        at: DateTime<Utc>,
    ) -> Result<Instance, RegistryError>;

    /// Mark every running row stopped and clear its pid. Returns how many
    /// rows changed.
    fn stop_all_running(&self) -> Result<usize, RegistryError>;
}
