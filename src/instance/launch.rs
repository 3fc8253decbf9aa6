use std::path::Path;

use super::{Recipe, env};
use crate::config::EnvConfig;
use crate::process::{self, CommandSpec, ManagedProcess, RunError};

/// Set in every service's environment to the instance name, so a recorded
/// pid can be checked before it is signalled.
pub const INSTANCE_VAR: &str = "ZCFLEET_INSTANCE";

/// Start the service described by `recipe` inside `workspace`, appending its
/// output to `log`. Shared by first deployment, manual restarts and
/// supervision relaunches so every incarnation runs with the same
/// environment.
pub fn start_recipe(
    settings: &EnvConfig,
    name: &str,
    workspace: &Path,
    log: &Path,
    recipe: &Recipe,
    token: Option<&str>,
) -> Result<ManagedProcess, RunError> {
    let mut vars = env::compose(settings, token, &recipe.extra_env);
    vars.push((INSTANCE_VAR.to_string(), name.to_string()));
    let spec = CommandSpec::shell(&recipe.start_command, workspace).with_env(vars);
    process::launch(&spec, log)
}

/// Whether `process` is the service launched for instance `name`. A pid
/// recorded before a crash may since have been reused by something else.
pub fn belongs_to(process: &ManagedProcess, name: &str) -> bool {
    process.has_env(INSTANCE_VAR, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn service_sees_token_and_extras() {
        let tmp = tempfile::TempDir::new().unwrap();
        let log = tmp.path().join("svc.log");
        let recipe = Recipe {
            source_url: "https://example.com/repo.git".into(),
            branch: "main".into(),
            start_command: "echo \"token=$BOT_TOKEN env=$NODE_ENV port=$PORT\"; exec sleep 30"
                .into(),
            build_command: None,
            extra_env: vec![("PORT".into(), "8080".into())],
        };

        let process =
            start_recipe(&EnvConfig::default(), "svc-1", tmp.path(), &log, &recipe, Some("1:abc"))
                .unwrap();

        let mut text = String::new();
        for _ in 0..50 {
            text = std::fs::read_to_string(&log).unwrap_or_default();
            if text.contains("token=") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let owned = belongs_to(&process, "svc-1");
        let foreign = belongs_to(&process, "svc-2");
        process.terminate(Duration::from_secs(2)).await;

        assert!(text.contains("token=1:abc env=production port=8080"), "log was: {text}");
        if cfg!(target_os = "linux") {
            assert!(owned);
            assert!(!foreign);
        }
    }
}
