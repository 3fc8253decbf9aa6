//! Instance types. Each type knows how to check a deployment request's
//! credentials and how to decide whether a running instance is healthy.

pub mod process;
pub mod telegram;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::FleetConfig;

/// Identity confirmed during validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedIdentity {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    InvalidConfig(String),
    #[error("{0}")]
    TokenRejected(String),
}

/// What a liveness probe gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
    pub pid: Option<u32>,
    pub token: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Down { reason: String },
}

impl Liveness {
    pub fn down(reason: impl Into<String>) -> Self {
        Self::Down {
            reason: reason.into(),
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alive => f.write_str("alive"),
            Self::Down { reason } => write!(f, "down ({reason})"),
        }
    }
}

#[async_trait]
pub trait InstanceKind: Send + Sync {
    fn name(&self) -> &str;

    /// Whether deployments of this type must carry an external token.
    fn requires_token(&self) -> bool;

    /// Check the request's credentials. No side effects.
    async fn validate(&self, token: Option<&str>) -> Result<ValidatedIdentity, ValidationError>;

    async fn probe_liveness(&self, target: ProbeTarget<'_>) -> Liveness;
}

/// Instance types by name.
#[derive(Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn InstanceKind>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `telegram` (backed by the Bot API at the configured base URL) and
    /// `process`.
    pub fn with_defaults(config: &FleetConfig) -> anyhow::Result<Self> {
        let api = telegram::HttpBotApi::new(config.probe_timeout())?
            .with_api_base(config.telegram.api_base.clone());
        let mut kinds = Self::new();
        kinds.register(Arc::new(telegram::TelegramKind::new(Arc::new(api))));
        kinds.register(Arc::new(process::LocalProcessKind));
        Ok(kinds)
    }

    pub fn register(&mut self, kind: Arc<dyn InstanceKind>) {
        self.kinds.insert(kind.name().to_string(), kind);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InstanceKind>> {
        self.kinds.get(name).cloned()
    }

    /// `(name, requires_token)` for every registered type, sorted by name.
    pub fn describe(&self) -> Vec<(String, bool)> {
        let mut kinds: Vec<(String, bool)> = self
            .kinds
            .values()
            .map(|k| (k.name().to_string(), k.requires_token()))
            .collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_register_both_types() {
        let kinds = KindRegistry::with_defaults(&FleetConfig::default()).unwrap();
        assert_eq!(
            kinds.describe(),
            vec![("process".to_string(), false), ("telegram".to_string(), true)]
        );
        assert!(kinds.get("telegram").is_some());
        assert!(kinds.get("docker").is_none());
    }

    #[test]
    fn liveness_display() {
        assert_eq!(Liveness::Alive.to_string(), "alive");
        assert_eq!(Liveness::down("process exited").to_string(), "down (process exited)");
    }
}
