//! Deployment orchestration: takes a request from validation to a committed,
//! running instance, or to a failure with its workspace cleaned up.

pub mod progress;

pub use progress::{ProgressReporter, StdoutProgress, TracingProgress};

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::FleetConfig;
use crate::db::{InstanceRegistry, RegistryError};
use crate::instance::workspace::{self, WorkspacePaths};
use crate::instance::{Instance, NewInstance, Recipe, env, launch, naming};
use crate::kind::{
    InstanceKind, KindRegistry, Liveness, ProbeTarget, ValidatedIdentity, ValidationError,
};
use crate::process::{self, CommandSpec, ManagedProcess, RunError};

/// Parameters for a new deployment, as entered by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub kind: String,
    pub token: Option<String>,
    pub source_url: String,
    pub branch: String,
    pub start_command: String,
    pub build_command: Option<String>,
    /// Raw `KEY=VALUE,KEY=VALUE` list.
    pub env_vars: Option<String>,
}

impl DeployRequest {
    /// Trim every field and turn blank optionals into `None`.
    fn normalized(self) -> Self {
        fn opt(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            kind: self.kind.trim().to_string(),
            token: opt(self.token),
            source_url: self.source_url.trim().to_string(),
            branch: self.branch.trim().to_string(),
            start_command: self.start_command.trim().to_string(),
            build_command: opt(self.build_command),
            env_vars: opt(self.env_vars),
        }
    }

    fn check_fields(&self) -> Result<(), DeployError> {
        let required = [
            ("instance type", &self.kind),
            ("source URL", &self.source_url),
            ("branch", &self.branch),
            ("start command", &self.start_command),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(DeployError::InvalidConfig(format!("{field} is required")));
            }
        }
        // Both end up as arguments to the fetch tool.
        if self.source_url.starts_with('-') || self.branch.starts_with('-') {
            return Err(DeployError::InvalidConfig(
                "source URL and branch must not start with '-'".into(),
            ));
        }
        Ok(())
    }
}

/// Stages of a deployment, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Requested,
    Validating,
    FetchingSource,
    ConfiguringEnv,
    Building,
    Launching,
    ConfirmingLiveness,
    Committed,
}

impl std::fmt::Display for DeployState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Requested => "Request received",
            Self::Validating => "Validating configuration",
            Self::FetchingSource => "Fetching source",
            Self::ConfiguringEnv => "Writing environment",
            Self::Building => "Installing dependencies",
            Self::Launching => "Launching",
            Self::ConfirmingLiveness => "Confirming the instance is up",
            Self::Committed => "Deployed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    TokenRejected(String),
    #[error("this token is already used by a running deployment")]
    DuplicateToken,
    #[error("could not prepare workspace: {0:#}")]
    Workspace(anyhow::Error),
    #[error("fetching source failed: {0}")]
    FetchFailed(RunError),
    #[error("installing dependencies failed: {0}")]
    BuildFailed(RunError),
    #[error("launch failed: {0}")]
    SpawnFailed(RunError),
    #[error("liveness check failed: {0}")]
    LivenessCheckFailed(String),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
    #[error("deployment task ended unexpectedly: {0}")]
    Aborted(String),
}

impl From<ValidationError> for DeployError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            ValidationError::TokenRejected(msg) => Self::TokenRejected(msg),
        }
    }
}

impl From<RegistryError> for DeployError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateToken => Self::DuplicateToken,
            RegistryError::Storage(e) => Self::Storage(e),
            RegistryError::NotFound(id) => Self::Storage(anyhow::anyhow!("instance {id} vanished")),
        }
    }
}

/// Handle to a deployment running in the background.
pub struct DeployTicket {
    handle: JoinHandle<Result<Instance, DeployError>>,
}

impl DeployTicket {
    /// Wait for the terminal outcome.
    pub async fn outcome(self) -> Result<Instance, DeployError> {
        self.handle
            .await
            .map_err(|e| DeployError::Aborted(e.to_string()))?
    }
}

/// Drives deployments. Cheap to clone; runs share the registry and config.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn InstanceRegistry>,
    kinds: Arc<KindRegistry>,
    config: Arc<FleetConfig>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        kinds: Arc<KindRegistry>,
        config: Arc<FleetConfig>,
    ) -> Self {
        Self {
            registry,
            kinds,
            config,
        }
    }

    /// Start a deployment in the background and return immediately. The
    /// terminal outcome goes to `progress` and to the returned ticket.
    pub fn deploy(
        &self,
        request: DeployRequest,
        progress: Arc<dyn ProgressReporter>,
    ) -> DeployTicket {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = this.execute(request, progress.as_ref()).await;
            match &outcome {
                Ok(instance) => {
                    progress
                        .update(&format!(
                            "Deployed '{}' as #{} (PID {})",
                            instance.name,
                            instance.id,
                            instance.pid().unwrap_or_default()
                        ))
                        .await;
                }
                Err(e) => progress.update(&format!("Deployment failed: {e}")).await,
            }
            outcome
        });
        DeployTicket { handle }
    }

    /// Run a deployment to completion.
    ///
    /// Stages run strictly in order. Nothing touches the filesystem before
    /// validation passes; a registry row is written only after the process
    /// has launched and passed its liveness probe. On any later failure the
    /// workspace is removed. The log file is kept for diagnosis.
    pub async fn execute(
        &self,
        request: DeployRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<Instance, DeployError> {
        progress.update(&DeployState::Requested.to_string()).await;
        let request = request.normalized();

        // 1. Validate
        progress.update(&DeployState::Validating.to_string()).await;
        let (kind, identity) = self.validate(&request).await?;

        // 2. Reserve a name and its workspace
        let name = naming::generate_name(kind.name());
        let paths = workspace::paths_for(
            &self.config.workspaces_dir(),
            &self.config.logs_dir(),
            &name,
        )
        .map_err(DeployError::Workspace)?;
        workspace::create(&paths).map_err(DeployError::Workspace)?;
        tracing::info!(instance = %name, "deploy: workspace {}", paths.workspace.display());

        match self
            .provision(&request, kind.as_ref(), identity, &name, &paths, progress)
            .await
        {
            Ok(instance) => {
                tracing::info!(instance = %instance.name, id = instance.id, "deploy: committed");
                progress.update(&DeployState::Committed.to_string()).await;
                Ok(instance)
            }
            Err(e) => {
                tracing::warn!(instance = %name, "deploy failed: {e}");
                workspace::remove_best_effort(&paths.workspace);
                Err(e)
            }
        }
    }

    async fn validate(
        &self,
        request: &DeployRequest,
    ) -> Result<(Arc<dyn InstanceKind>, ValidatedIdentity), DeployError> {
        request.check_fields()?;

        let kind = self.kinds.get(&request.kind).ok_or_else(|| {
            let known: Vec<String> = self.kinds.describe().into_iter().map(|(n, _)| n).collect();
            DeployError::InvalidConfig(format!(
                "unknown instance type '{}' (known: {})",
                request.kind,
                known.join(", ")
            ))
        })?;

        let identity = kind.validate(request.token.as_deref()).await?;

        if let Some(token) = request.token.as_deref() {
            if self.registry.token_in_use(token, None)? {
                return Err(DeployError::DuplicateToken);
            }
        }
        Ok((kind, identity))
    }

    async fn provision(
        &self,
        request: &DeployRequest,
        kind: &dyn InstanceKind,
        identity: ValidatedIdentity,
        name: &str,
        paths: &WorkspacePaths,
        progress: &dyn ProgressReporter,
    ) -> Result<Instance, DeployError> {
        // 3. Fetch source
        progress.update(&DeployState::FetchingSource.to_string()).await;
        let fetch = self.fetch_spec(request, &paths.workspace)?;
        process::run(&fetch, &paths.log_file, self.config.fetch_timeout())
            .await
            .map_err(DeployError::FetchFailed)?;

        // 4. Environment
        progress.update(&DeployState::ConfiguringEnv.to_string()).await;
        let extra_env = request
            .env_vars
            .as_deref()
            .map(env::parse_env_list)
            .unwrap_or_default();
        let vars = env::compose(&self.config.env, request.token.as_deref(), &extra_env);
        workspace::write_env_file(&paths.workspace, &vars).map_err(DeployError::Workspace)?;

        // 5. Build (optional)
        if let Some(build) = request.build_command.as_deref() {
            progress.update(&DeployState::Building.to_string()).await;
            let spec = CommandSpec::shell(build, &paths.workspace).with_env(vars.clone());
            process::run(&spec, &paths.log_file, self.config.build_timeout())
                .await
                .map_err(DeployError::BuildFailed)?;
        }

        // 6. Launch
        progress.update(&DeployState::Launching.to_string()).await;
        let recipe = Recipe {
            source_url: request.source_url.clone(),
            branch: request.branch.clone(),
            start_command: request.start_command.clone(),
            build_command: request.build_command.clone(),
            extra_env,
        };
        let managed = launch::start_recipe(
            &self.config.env,
            name,
            &paths.workspace,
            &paths.log_file,
            &recipe,
            request.token.as_deref(),
        )
        .map_err(DeployError::SpawnFailed)?;
        tracing::info!(instance = %name, pid = managed.pid(), "deploy: launched");

        // 7. Confirm liveness
        progress
            .update(&DeployState::ConfirmingLiveness.to_string())
            .await;
        tokio::time::sleep(self.config.liveness_grace()).await;
        let target = ProbeTarget {
            pid: Some(managed.pid()),
            token: request.token.as_deref(),
        };
        if let Liveness::Down { reason } = kind.probe_liveness(target).await {
            self.abandon(managed).await;
            return Err(DeployError::LivenessCheckFailed(reason));
        }

        // 8. Commit
        let new = NewInstance {
            name: name.to_string(),
            kind: kind.name().to_string(),
            external_token: request.token.clone(),
            display_name: identity.display_name,
            workspace_path: paths.workspace.clone(),
            log_file_path: paths.log_file.clone(),
            pid: managed.pid(),
            recipe,
        };
        match self.registry.insert(new) {
            Ok(instance) => Ok(instance),
            Err(e) => {
                self.abandon(managed).await;
                Err(e.into())
            }
        }
    }

    /// Substitute `{url}`, `{branch}` and `{dest}` into the fetch template.
    fn fetch_spec(&self, request: &DeployRequest, dest: &Path) -> Result<CommandSpec, DeployError> {
        let dest_str = dest.to_string_lossy();
        let substitute = |arg: &str| {
            arg.replace("{url}", &request.source_url)
                .replace("{branch}", &request.branch)
                .replace("{dest}", &dest_str)
        };
        let (program, args) = self
            .config
            .fetch
            .command
            .split_first()
            .ok_or_else(|| DeployError::InvalidConfig("fetch command is empty".into()))?;
        Ok(CommandSpec::new(
            substitute(program),
            args.iter().map(|a| substitute(a)).collect(),
            dest,
        ))
    }

    async fn abandon(&self, managed: ManagedProcess) {
        tracing::info!("deploy: stopping PID {} after failure", managed.pid());
        managed.terminate(self.config.stop_grace()).await;
    }
}
