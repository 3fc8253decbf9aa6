use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File holding the instance environment inside its workspace.
pub const ENV_FILE: &str = ".env";

/// Paths owned by one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub workspace: PathBuf,
    pub log_file: PathBuf,
}

/// Resolve `{workspaces_dir}/{name}` and `{logs_dir}/{name}.log` to absolute paths.
pub fn paths_for(workspaces_dir: &Path, logs_dir: &Path, name: &str) -> Result<WorkspacePaths> {
    let workspaces_dir = std::path::absolute(workspaces_dir)
        .with_context(|| format!("failed to resolve {}", workspaces_dir.display()))?;
    let logs_dir = std::path::absolute(logs_dir)
        .with_context(|| format!("failed to resolve {}", logs_dir.display()))?;
    Ok(WorkspacePaths {
        workspace: workspaces_dir.join(name),
        log_file: logs_dir.join(format!("{name}.log")),
    })
}

/// Create the workspace directory and the log directory.
///
/// The workspace itself must not exist yet: each instance gets a directory
/// nobody else has touched. It is created last, so an error never leaves
/// behind a workspace this call created.
pub fn create(paths: &WorkspacePaths) -> Result<()> {
    if let Some(logs) = paths.log_file.parent() {
        fs::create_dir_all(logs)
            .with_context(|| format!("failed to create log dir: {}", logs.display()))?;
    }
    if let Some(parent) = paths.workspace.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir: {}", parent.display()))?;
    }
    fs::create_dir(&paths.workspace)
        .with_context(|| format!("failed to create workspace: {}", paths.workspace.display()))
}

/// Write `KEY=VALUE` lines to `{workspace}/.env`.
pub fn write_env_file(workspace: &Path, vars: &[(String, String)]) -> Result<PathBuf> {
    let path = workspace.join(ENV_FILE);
    let mut content = String::new();
    for (key, value) in vars {
        content.push_str(key);
        content.push('=');
        content.push_str(value);
        content.push('\n');
    }
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Remove a workspace tree. Failures are logged, never returned: this runs on
/// paths that are already failing.
pub fn remove_best_effort(workspace: &Path) {
    if !workspace.exists() {
        return;
    }
    match fs::remove_dir_all(workspace) {
        Ok(()) => tracing::info!("removed workspace {}", workspace.display()),
        Err(e) => tracing::warn!(
            "failed to remove workspace {} (leaving it behind): {e}",
            workspace.display()
        ),
    }
}
