use async_trait::async_trait;

use super::{InstanceKind, Liveness, ProbeTarget, ValidatedIdentity, ValidationError};
use crate::process::is_pid_alive;

/// A plain local service: healthy while its process exists.
pub struct LocalProcessKind;

#[async_trait]
impl InstanceKind for LocalProcessKind {
    fn name(&self) -> &str {
        "process"
    }

    fn requires_token(&self) -> bool {
        false
    }

    async fn validate(&self, _token: Option<&str>) -> Result<ValidatedIdentity, ValidationError> {
        Ok(ValidatedIdentity::default())
    }

    async fn probe_liveness(&self, target: ProbeTarget<'_>) -> Liveness {
        match target.pid {
            None => Liveness::down("no process recorded"),
            Some(pid) if is_pid_alive(pid) => Liveness::Alive,
            Some(pid) => Liveness::down(format!("process {pid} is not running")),
        }
    }
}
