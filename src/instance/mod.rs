pub mod env;
pub mod launch;
pub mod naming;
pub mod workspace;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::path::PathBuf;

pub type InstanceId = i64;

/// Recorded status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Stopped,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and process handle as one value: a pid exists exactly when the
/// instance is recorded as running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Running { pid: u32 },
}

impl ProcessState {
    pub fn pid(self) -> Option<u32> {
        match self {
            Self::Running { pid } => Some(pid),
            Self::Stopped => None,
        }
    }

    pub fn status(self) -> InstanceStatus {
        match self {
            Self::Running { .. } => InstanceStatus::Running,
            Self::Stopped => InstanceStatus::Stopped,
        }
    }
}

/// Everything needed to bring an instance up again. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipe {
    pub source_url: String,
    pub branch: String,
    pub start_command: String,
    pub build_command: Option<String>,
    pub extra_env: Vec<(String, String)>,
}

/// A deployed process as recorded in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    pub id: InstanceId,
    pub name: String,
    pub kind: String,
    #[serde(skip)]
    pub external_token: Option<String>,
    pub display_name: Option<String>,
    pub workspace_path: PathBuf,
    pub log_file_path: PathBuf,
    #[serde(flatten)]
    pub process: ProcessState,
    pub recipe: Recipe,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_deployed_at: DateTime<Utc>,
}

impl Instance {
    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn status(&self) -> InstanceStatus {
        self.process.status()
    }

    pub fn is_running(&self) -> bool {
        self.status() == InstanceStatus::Running
    }

    pub fn token_preview(&self) -> Option<String> {
        self.external_token.as_deref().map(token_preview)
    }
}

/// Row to insert once a deployment has launched and passed its liveness check.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub name: String,
    pub kind: String,
    pub external_token: Option<String>,
    pub display_name: Option<String>,
    pub workspace_path: PathBuf,
    pub log_file_path: PathBuf,
    pub pid: u32,
    pub recipe: Recipe,
}

/// Shorten a credential for display: first 10 and last 5 characters.
/// Tokens too short to abbreviate are fully masked.
pub fn token_preview(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 15 {
        return "*".repeat(chars.len().max(3));
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{head}...{tail}")
}

/// Next value for `last_restart_at`: `now`, bumped past `previous` when the
/// clock has not advanced.
pub fn next_restart_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + ChronoDuration::milliseconds(1),
        _ => now,
    }
}
