//! Shared fixtures: a fleet rooted in a temp dir, `sh` standing in for git
//! and npm, and a Bot API that accepts a fixed set of tokens.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use zcfleet::db::InstanceRegistry;
use zcfleet::deploy::{DeployRequest, ProgressReporter};
use zcfleet::instance::{Instance, InstanceStatus};
use zcfleet::kind::KindRegistry;
use zcfleet::kind::process::LocalProcessKind;
use zcfleet::kind::telegram::{BotApi, BotIdentity, TelegramKind};
use zcfleet::process::{ManagedProcess, is_pid_alive};
use zcfleet::{AppState, FleetConfig};

pub const TOKEN_A: &str = "111111111:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub const TOKEN_B: &str = "222222222:BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
pub const REJECTED_TOKEN: &str = "333333333:CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC";

/// Start command that stays up and prints one marker line per launch.
pub const LONG_RUNNING: &str = "echo started && exec sleep 30";

/// Accepts `TOKEN_A` and `TOKEN_B`, rejects everything else.
pub struct FakeBotApi;

#[async_trait]
impl BotApi for FakeBotApi {
    async fn get_me(&self, token: &str) -> anyhow::Result<Option<BotIdentity>> {
        if token == TOKEN_A || token == TOKEN_B {
            Ok(Some(BotIdentity {
                id: 1,
                first_name: "Test".into(),
                username: Some("test_bot".into()),
            }))
        } else {
            Ok(None)
        }
    }
}

/// Collects progress messages in order.
#[derive(Default)]
pub struct RecordingProgress {
    messages: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressReporter for RecordingProgress {
    async fn update(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

pub fn test_config(root: &Path) -> FleetConfig {
    let mut config = FleetConfig::with_data_dir(root.join("data"));
    config.fetch.command = vec![
        "sh".into(),
        "-c".into(),
        "echo fetching {url}@{branch} && touch app.js".into(),
    ];
    config.timeouts.fetch_secs = 10;
    config.timeouts.build_secs = 10;
    config.launch.grace_ms = 300;
    config.launch.stop_grace_ms = 2_000;
    config
}

/// A fleet in its own temp dir. Kills whatever is still running on drop.
pub struct Fleet {
    pub dir: TempDir,
    pub state: AppState,
}

impl Fleet {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut FleetConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        let state = open_state(config);
        Self { dir, state }
    }

    /// A fresh `AppState` on the same data dir, as after a supervisor restart.
    pub fn reopen(&self) -> AppState {
        open_state((*self.state.config).clone())
    }

    pub fn request(&self, kind: &str, token: Option<&str>, start: &str) -> DeployRequest {
        DeployRequest {
            kind: kind.into(),
            token: token.map(String::from),
            source_url: "https://example.com/bot.git".into(),
            branch: "main".into(),
            start_command: start.into(),
            build_command: None,
            env_vars: None,
        }
    }

    pub async fn deploy(&self, request: DeployRequest) -> Instance {
        let progress = RecordingProgress::default();
        self.state
            .orchestrator
            .execute(request, &progress)
            .await
            .unwrap()
    }

    pub fn workspaces(&self) -> Vec<std::path::PathBuf> {
        match std::fs::read_dir(self.state.config.workspaces_dir()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        if let Ok(running) = self.state.registry.list_by_status(InstanceStatus::Running) {
            for instance in running {
                if let Some(pid) = instance.pid() {
                    ManagedProcess::from_pid(pid).kill();
                }
            }
        }
    }
}

fn open_state(config: FleetConfig) -> AppState {
    let mut kinds = KindRegistry::new();
    kinds.register(Arc::new(TelegramKind::new(Arc::new(FakeBotApi))));
    kinds.register(Arc::new(LocalProcessKind));

    std::fs::create_dir_all(&config.data_dir).unwrap();
    let registry = zcfleet::db::SqliteRegistry::open(&config.database_path()).unwrap();
    AppState::from_parts(config, Arc::new(registry), kinds)
}

/// Poll until `pid` is gone or `timeout` passes.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !is_pid_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !is_pid_alive(pid)
}
