//! Transport-agnostic chat front end: parses commands, drives the deploy
//! wizard per chat and renders every outcome as a text reply.

pub mod commands;
pub mod console;
pub mod wizard;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::deploy::{DeployRequest, ProgressReporter};
use crate::instance::{Instance, InstanceId};
use crate::kind::Liveness;
use crate::lifecycle::StatusReport;
use crate::state::AppState;

use commands::Command;
use wizard::DeploymentBuilder;

/// Text answer to one input, plus whether the operation succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub success: bool,
    pub message: String,
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub struct Frontend {
    state: AppState,
    /// Open `/deploy` wizards keyed by chat.
    sessions: Mutex<HashMap<String, DeploymentBuilder>>,
}

impl Frontend {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, DeploymentBuilder>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn has_session(&self, chat: &str) -> bool {
        self.sessions().contains_key(chat)
    }

    /// Handle one line from `chat`. Deployment progress and the final
    /// outcome go to `progress`; everything else is in the reply.
    pub async fn handle(
        &self,
        chat: &str,
        input: &str,
        progress: Arc<dyn ProgressReporter>,
    ) -> Reply {
        let in_wizard = self.has_session(chat);
        match commands::parse(input) {
            Ok(Some(command)) => self.dispatch(chat, command, progress).await,
            Ok(None) if in_wizard => self.answer_wizard(chat, input, progress),
            // Start commands such as `/usr/bin/node bot.js` look like commands.
            Err(_) if in_wizard => self.answer_wizard(chat, input, progress),
            Ok(None) => Reply::err("Send /help to see what I can do."),
            Err(usage) => Reply::err(usage),
        }
    }

    async fn dispatch(
        &self,
        chat: &str,
        command: Command,
        progress: Arc<dyn ProgressReporter>,
    ) -> Reply {
        match command {
            Command::Help => Reply::ok(commands::HELP),
            Command::NewBot { token } => self.new_bot(token, progress),
            Command::Deploy => self.open_wizard(chat),
            Command::Cancel => {
                let removed = self.sessions().remove(chat).is_some();
                if removed {
                    Reply::ok("Deployment setup cancelled.")
                } else {
                    Reply::ok("Nothing to cancel.")
                }
            }
            Command::List => match self.state.lifecycle.list() {
                Ok(instances) => render_list(&instances),
                Err(e) => Reply::err(format!("Could not list deployments: {e}")),
            },
            Command::Stop(id) => match self.state.lifecycle.stop(id).await {
                Ok(instance) => Reply::ok(format!("Stopped {}.", label(&instance))),
                Err(e) => Reply::err(format!("Could not stop #{id}: {e}")),
            },
            Command::Restart(id) => match self.state.lifecycle.restart(id).await {
                Ok(instance) => Reply::ok(format!(
                    "Restarted {} as PID {} (restart #{}).",
                    label(&instance),
                    instance.pid().unwrap_or_default(),
                    instance.restart_count
                )),
                Err(e) => Reply::err(format!("Could not restart #{id}: {e}")),
            },
            Command::Status(id) => match self.state.lifecycle.status(id).await {
                Ok(report) => render_status(&report),
                Err(e) => Reply::err(format!("Could not check #{id}: {e}")),
            },
            Command::Logs { id, lines } => self.logs(id, lines).await,
        }
    }

    /// `/newbot <token>`: telegram deployment from the configured defaults.
    fn new_bot(&self, token: String, progress: Arc<dyn ProgressReporter>) -> Reply {
        let defaults = &self.state.config.defaults;
        let Some(source_url) = defaults.source_url.clone() else {
            return Reply::err(
                "No default repository is configured. Use /deploy to enter one.",
            );
        };
        let request = DeployRequest {
            kind: "telegram".into(),
            token: Some(token),
            source_url,
            branch: defaults.branch.clone(),
            start_command: defaults.start_command.clone(),
            build_command: Some(defaults.build_command.clone()).filter(|c| !c.is_empty()),
            env_vars: None,
        };
        self.start_deploy(request, progress)
    }

    fn open_wizard(&self, chat: &str) -> Reply {
        let builder = DeploymentBuilder::new(
            self.state.kinds.describe(),
            self.state.config.defaults.clone(),
        );
        let prompt = builder.prompt();
        self.sessions().insert(chat.to_string(), builder);
        Reply::ok(format!(
            "New deployment. Answer each question, '-' takes the default, /cancel aborts.\n{prompt}"
        ))
    }

    fn answer_wizard(
        &self,
        chat: &str,
        input: &str,
        progress: Arc<dyn ProgressReporter>,
    ) -> Reply {
        let request = {
            let mut sessions = self.sessions();
            let Some(builder) = sessions.get_mut(chat) else {
                return Reply::err("No deployment in progress. Send /deploy to start one.");
            };
            if let Err(msg) = builder.answer(input) {
                return Reply::err(format!("{msg}\n{}", builder.prompt()));
            }
            if !builder.is_complete() {
                return Reply::ok(builder.prompt());
            }
            let request = builder.build();
            sessions.remove(chat);
            request
        };
        match request {
            Some(request) => self.start_deploy(request, progress),
            None => Reply::err("Deployment setup was incomplete; send /deploy to start over."),
        }
    }

    fn start_deploy(&self, request: DeployRequest, progress: Arc<dyn ProgressReporter>) -> Reply {
        tracing::info!(kind = %request.kind, source = %request.source_url, "deployment requested");
        // The outcome reaches the operator through `progress`.
        let _ticket = self.state.orchestrator.deploy(request, progress);
        Reply::ok("Deployment started. I'll report progress here.")
    }

    async fn logs(&self, id: InstanceId, lines: usize) -> Reply {
        match self.state.lifecycle.logs(id, lines).await {
            Ok(text) if text.trim().is_empty() => Reply::ok(format!("Log for #{id} is empty.")),
            Ok(text) => Reply::ok(format!("Last {lines} lines of #{id}:\n{text}")),
            Err(e) => Reply::err(format!("Could not read logs for #{id}: {e}")),
        }
    }
}

// ── Rendering ──────────────────────────────────────────────────

fn label(instance: &Instance) -> String {
    match &instance.display_name {
        Some(display) => format!("{display} (#{})", instance.id),
        None => format!("'{}' (#{})", instance.name, instance.id),
    }
}

pub fn render_list(instances: &[Instance]) -> Reply {
    if instances.is_empty() {
        return Reply::ok(
            "No deployments yet. Use /newbot <token> or /deploy to create one.",
        );
    }
    let mut out = format!("{} deployment(s):", instances.len());
    for instance in instances {
        let _ = write!(
            out,
            "\n\n#{} {} [{}] {}\n  name: {}",
            instance.id,
            instance.display_name.as_deref().unwrap_or("-"),
            instance.kind,
            instance.status(),
            instance.name
        );
        if let Some(preview) = instance.token_preview() {
            let _ = write!(out, "\n  token: {preview}");
        }
        let _ = write!(
            out,
            "\n  created: {}",
            instance.created_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Reply::ok(out)
}

pub fn render_status(report: &StatusReport) -> Reply {
    let instance = &report.instance;
    let mut out = format!("{} is {}", label(instance), instance.status());
    if let Some(pid) = instance.pid() {
        let _ = write!(out, " (PID {pid})");
    }
    match &report.liveness {
        Liveness::Alive => out.push_str("\nprobe: up"),
        Liveness::Down { reason } => {
            let _ = write!(out, "\nprobe: down, {reason}");
        }
    }
    let _ = write!(out, "\nrestarts: {}", instance.restart_count);
    if let Some(at) = instance.last_restart_at {
        let _ = write!(out, " (last {})", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = write!(
        out,
        "\nchecked: {}",
        report.checked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Reply::ok(out)
}
