use std::sync::Arc;
use convertly_core::{
    AdmissionFilter, AuthError, BackendInvoker, Config, GatewayAdmission, Orchestrator,
    SanitizedConfig, TempStore, ToolRegistry,
};

/// Shared application state
pub struct AppState {
    config: Config,
    orchestrator: Orchestrator,
    admission: Arc<dyn AdmissionFilter>,
}

impl AppState {
    pub fn new(
        config: Config,
        orchestrator: Orchestrator,
        admission: Arc<dyn AdmissionFilter>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            admission,
        }
    }

    /// Wires the default backends, the store and admission from `config`.
    /// Tool discovery happens here; the store is not initialized.
    pub fn from_config(config: Config) -> Result<Self, AuthError> {
        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let invoker = Arc::new(BackendInvoker::with_default_backends(tools, &config));
        let store = TempStore::new(config.storage.clone());
        let orchestrator = Orchestrator::new(&config, store, invoker);
        let admission = Arc::new(GatewayAdmission::from_config(&config)?);
        Ok(Self::new(config, orchestrator, admission))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn admission(&self) -> &dyn AdmissionFilter {
        self.admission.as_ref()
    }
}
