use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct FleetConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides `{data_dir}/fleet.db`.
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub env: EnvConfig,
    #[serde(default)]
    pub defaults: RecipeDefaults,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisionConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LaunchConfig {
    /// How long a freshly launched process gets before its first liveness probe.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// SIGTERM-to-SIGKILL window when stopping a process.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

/// Argv template for fetching source. `{url}`, `{branch}` and `{dest}` are
/// substituted inside each argument.
#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_command")]
    pub command: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnvConfig {
    #[serde(default = "default_token_var")]
    pub token_var: String,
    #[serde(default = "default_production_key")]
    pub production_key: String,
    #[serde(default = "default_production_value")]
    pub production_value: String,
}

/// Recipe values used by `/newbot` and offered by the wizard when the
/// operator answers `-`.
#[derive(Debug, Deserialize, Clone)]
pub struct RecipeDefaults {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub source_url: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_start_command")]
    pub start_command: String,
    /// Empty string disables the build step.
    #[serde(default = "default_build_command")]
    pub build_command: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

// Default functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fetch_secs() -> u64 {
    180
}
fn default_build_secs() -> u64 {
    240
}
fn default_interval_secs() -> u64 {
    300
}
fn default_grace_ms() -> u64 {
    5_000
}
fn default_stop_grace_ms() -> u64 {
    10_000
}
fn default_fetch_command() -> Vec<String> {
    ["git", "clone", "--depth", "1", "--branch", "{branch}", "{url}", "{dest}"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_token_var() -> String {
    "BOT_TOKEN".into()
}
fn default_production_key() -> String {
    "NODE_ENV".into()
}
fn default_production_value() -> String {
    "production".into()
}
fn default_kind() -> String {
    "telegram".into()
}
fn default_branch() -> String {
    "main".into()
}
fn default_start_command() -> String {
    "npm start".into()
}
fn default_build_command() -> String {
    "npm install --production".into()
}
fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}
fn default_probe_timeout_secs() -> u64 {
    10
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            build_secs: default_build_secs(),
        }
    }
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            command: default_fetch_command(),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            token_var: default_token_var(),
            production_key: default_production_key(),
            production_value: default_production_value(),
        }
    }
}

impl Default for RecipeDefaults {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            source_url: None,
            branch: default_branch(),
            start_command: default_start_command(),
            build_command: default_build_command(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self::with_data_dir(default_data_dir())
    }
}

impl FleetConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_path: None,
            timeouts: TimeoutConfig::default(),
            supervision: SupervisionConfig::default(),
            launch: LaunchConfig::default(),
            fetch: FetchConfig::default(),
            env: EnvConfig::default(),
            defaults: RecipeDefaults::default(),
            telegram: TelegramConfig::default(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("fleet.db"))
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.data_dir.join("instances")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.fetch_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.build_secs)
    }

    pub fn supervision_interval(&self) -> Duration {
        Duration::from_secs(self.supervision.interval_secs.max(1))
    }

    pub fn liveness_grace(&self) -> Duration {
        Duration::from_millis(self.launch.grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.launch.stop_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.probe_timeout_secs)
    }
}

/// Load config from TOML file with env var overrides.
pub fn load(path: &Path) -> anyhow::Result<FleetConfig> {
    let content = if path.exists() {
        std::fs::read_to_string(path)?
    } else {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        String::new()
    };

    let mut config: FleetConfig = toml::from_str(&content)?;

    // Env var overrides
    if let Ok(v) = std::env::var("ZCFLEET_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ZCFLEET_DB_PATH") {
        config.database_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("ZCFLEET_TELEGRAM_API") {
        config.telegram.api_base = v;
    }
    if let Ok(v) = std::env::var("ZCFLEET_SUPERVISION_INTERVAL_SECS") {
        config.supervision.interval_secs = v.parse()?;
    }

    if config.fetch.command.is_empty() {
        anyhow::bail!("fetch.command must name a program");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_on_empty_toml() {
        let cfg: FleetConfig = toml::from_str("").expect("empty toml should parse");
        assert_eq!(cfg.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.database_path(), PathBuf::from("data/fleet.db"));
        assert_eq!(cfg.workspaces_dir(), PathBuf::from("data/instances"));
        assert_eq!(cfg.logs_dir(), PathBuf::from("data/logs"));
        assert_eq!(cfg.fetch_timeout(), Duration::from_secs(180));
        assert_eq!(cfg.build_timeout(), Duration::from_secs(240));
        assert_eq!(cfg.supervision_interval(), Duration::from_secs(300));
        assert_eq!(cfg.liveness_grace(), Duration::from_secs(5));
        assert_eq!(cfg.probe_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.env.token_var, "BOT_TOKEN");
        assert_eq!(cfg.defaults.start_command, "npm start");
        assert_eq!(cfg.defaults.build_command, "npm install --production");
        assert_eq!(cfg.fetch.command[0], "git");
        assert!(cfg.defaults.source_url.is_none());
    }

    #[test]
    fn partial_toml_overrides_only_set_fields() {
        let toml_str = r#"
data_dir = "/srv/fleet"

[supervision]
interval_secs = 60

[defaults]
source_url = "https://example.com/bot.git"
build_command = ""
"#;
        let cfg: FleetConfig = toml::from_str(toml_str).expect("valid toml");
        assert_eq!(cfg.database_path(), PathBuf::from("/srv/fleet/fleet.db"));
        assert_eq!(cfg.supervision_interval(), Duration::from_secs(60));
        assert_eq!(
            cfg.defaults.source_url.as_deref(),
            Some("https://example.com/bot.git")
        );
        assert!(cfg.defaults.build_command.is_empty());
        // defaults preserved for unset fields
        assert_eq!(cfg.defaults.branch, "main");
        assert_eq!(cfg.timeouts.fetch_secs, 180);
    }

    #[test]
    fn explicit_database_path_wins() {
        let cfg: FleetConfig =
            toml::from_str("database_path = \"/tmp/other.db\"").expect("valid toml");
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let mut cfg = FleetConfig::default();
        cfg.supervision.interval_secs = 0;
        assert_eq!(cfg.supervision_interval(), Duration::from_secs(1));
    }

    #[test]
    fn example_config_matches_defaults() {
        let cfg: FleetConfig =
            toml::from_str(include_str!("../fleet.example.toml")).expect("example parses");
        let defaults = FleetConfig::default();
        assert_eq!(cfg.fetch.command, defaults.fetch.command);
        assert_eq!(cfg.stop_grace(), defaults.stop_grace());
        assert_eq!(cfg.telegram.api_base, defaults.telegram.api_base);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.defaults.kind, "telegram");
    }
}
