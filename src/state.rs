use std::sync::Arc;

use anyhow::Context;

use crate::background::supervisor::Supervisor;
use crate::config::FleetConfig;
use crate::db::{InstanceRegistry, SqliteRegistry};
use crate::deploy::Orchestrator;
use crate::kind::KindRegistry;
use crate::lifecycle::Lifecycle;

/// Every long-lived component, wired to one registry.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FleetConfig>,
    pub registry: Arc<dyn InstanceRegistry>,
    pub kinds: Arc<KindRegistry>,
    pub orchestrator: Orchestrator,
    pub lifecycle: Lifecycle,
}

impl AppState {
    /// Open the SQLite registry under the configured data dir and register the
    /// default instance types.
    pub fn open(config: FleetConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;
        let registry = SqliteRegistry::open(&config.database_path())?;
        let kinds = KindRegistry::with_defaults(&config)?;
        Ok(Self::from_parts(config, Arc::new(registry), kinds))
    }

    pub fn from_parts(
        config: FleetConfig,
        registry: Arc<dyn InstanceRegistry>,
        kinds: KindRegistry,
    ) -> Self {
        let config = Arc::new(config);
        let kinds = Arc::new(kinds);
        let orchestrator = Orchestrator::new(registry.clone(), kinds.clone(), config.clone());
        let lifecycle = Lifecycle::new(registry.clone(), kinds.clone(), config.clone());
        Self {
            config,
            registry,
            kinds,
            orchestrator,
            lifecycle,
        }
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.lifecycle.clone(), self.config.supervision_interval())
    }
}
