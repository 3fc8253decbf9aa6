use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{InstanceKind, Liveness, ProbeTarget, ValidatedIdentity, ValidationError};
use crate::process::is_pid_alive;

/// Bot account as reported by `getMe`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

impl BotIdentity {
    /// `@username` when the bot has one, otherwise its first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{username}"),
            None => self.first_name.clone(),
        }
    }
}

/// The slice of the Bot API this crate needs.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// `Ok(None)` when the API rejects the token; `Err` when the API could not
    /// be reached or answered with something unexpected.
    async fn get_me(&self, token: &str) -> anyhow::Result<Option<BotIdentity>>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Bot API over HTTPS.
pub struct HttpBotApi {
    client: reqwest::Client,
    api_base: String,
}

impl HttpBotApi {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            api_base: "https://api.telegram.org".into(),
        })
    }

    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{token}/{method}", self.api_base)
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn get_me(&self, token: &str) -> anyhow::Result<Option<BotIdentity>> {
        let resp = self
            .client
            .get(self.api_url(token, "getMe"))
            .send()
            .await
            .context("getMe request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!("getMe returned HTTP {status}");
        }

        let body: ApiResponse<BotIdentity> =
            resp.json().await.context("unexpected getMe response")?;
        if !body.ok {
            tracing::debug!(
                "getMe refused token: {}",
                body.description.as_deref().unwrap_or("no description")
            );
            return Ok(None);
        }
        body.result
            .map(Some)
            .context("getMe response has no result")
    }
}

/// Bot tokens look like `<bot id>:<secret>`.
pub fn looks_like_token(token: &str) -> bool {
    let Some((id, secret)) = token.split_once(':') else {
        return false;
    };
    !id.is_empty()
        && id.chars().all(|c| c.is_ascii_digit())
        && secret.len() >= 20
        && secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A chat bot whose health is confirmed through the Bot API.
pub struct TelegramKind {
    api: Arc<dyn BotApi>,
}

impl TelegramKind {
    pub fn new(api: Arc<dyn BotApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl InstanceKind for TelegramKind {
    fn name(&self) -> &str {
        "telegram"
    }

    fn requires_token(&self) -> bool {
        true
    }

    async fn validate(&self, token: Option<&str>) -> Result<ValidatedIdentity, ValidationError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::InvalidConfig("a bot token is required".into()))?;
        if !looks_like_token(token) {
            return Err(ValidationError::InvalidConfig(
                "malformed bot token: expected <bot id>:<secret>".into(),
            ));
        }

        match self.api.get_me(token).await {
            Ok(Some(identity)) => Ok(ValidatedIdentity {
                display_name: Some(identity.display_name()),
            }),
            Ok(None) => Err(ValidationError::TokenRejected(
                "invalid token: the Bot API rejected these credentials".into(),
            )),
            Err(e) => Err(ValidationError::TokenRejected(format!(
                "could not verify token with the Bot API: {e:#}"
            ))),
        }
    }

    /// Alive when the process exists and the Bot API still accepts the token.
    /// An unreachable API does not count against a running process.
    async fn probe_liveness(&self, target: ProbeTarget<'_>) -> Liveness {
        let Some(pid) = target.pid else {
            return Liveness::down("no process recorded");
        };
        if !is_pid_alive(pid) {
            return Liveness::down(format!("process {pid} is not running"));
        }
        let Some(token) = target.token else {
            return Liveness::Alive;
        };

        match self.api.get_me(token).await {
            Ok(Some(_)) => Liveness::Alive,
            Ok(None) => Liveness::down("the Bot API no longer accepts this token"),
            Err(e) => {
                tracing::warn!("telegram probe for PID {pid} inconclusive, keeping it: {e:#}");
                Liveness::Alive
            }
        }
    }
}
