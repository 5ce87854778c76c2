//! The script host: engine, resource lookup and dialect gateway shared by
//! every deployment it creates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::cache::ModuleNames;
use crate::config::HostConfig;
use crate::deployment::Deployment;
use crate::engine::Engine;
use crate::errors::{ModuleError, Result};
use crate::resource::{DirectoryLookup, ResourceLookup};
use crate::transpiler::TranspilerGateway;

pub(crate) struct HostShared {
    pub(crate) config: HostConfig,
    pub(crate) engine: Engine,
    pub(crate) resources: Arc<dyn ResourceLookup>,
    pub(crate) transpiler: Option<Arc<TranspilerGateway>>,
    pub(crate) names: ModuleNames,
    next_deployment: AtomicU64,
}

/// Creates deployments against one engine and one resource namespace
#[derive(Clone)]
pub struct ScriptHost {
    shared: Arc<HostShared>,
}

impl ScriptHost {
    /// Look scripts up in the configured roots; bring up a dialect compiler
    /// when one is configured
    pub fn new(config: HostConfig) -> Result<Self> {
        let resources: Arc<dyn ResourceLookup> =
            Arc::new(DirectoryLookup::new(&config.modules.roots));
        let transpiler = config
            .dialect
            .clone()
            .map(|dialect| Arc::new(TranspilerGateway::new(dialect, Arc::clone(&resources))));
        Self::with_dependencies(config, resources, transpiler)
    }

    /// Use an explicit resource lookup and, optionally, a gateway shared
    /// with other hosts
    pub fn with_dependencies(
        config: HostConfig,
        resources: Arc<dyn ResourceLookup>,
        transpiler: Option<Arc<TranspilerGateway>>,
    ) -> Result<Self> {
        let engine = Engine::new()?;
        let dialect_extension = transpiler.as_ref().map(|t| t.settings().extension.clone());
        let names = ModuleNames::new(config.modules.default_extension.clone(), dialect_extension);
        debug!(
            default_extension = %names.default_extension(),
            dialect = transpiler.is_some(),
            "script host ready"
        );
        Ok(Self {
            shared: Arc::new(HostShared {
                config,
                engine,
                resources,
                transpiler,
                names,
                next_deployment: AtomicU64::new(1),
            }),
        })
    }

    /// Create a deployment of `main` with the configured deployment config
    pub fn deploy(&self, main: &str) -> Deployment {
        let config = self.shared.config.deployment.config.clone();
        self.deploy_with_config(main, config)
    }

    pub fn deploy_with_config(&self, main: &str, config: serde_json::Value) -> Deployment {
        let sequence = self.shared.next_deployment.fetch_add(1, Ordering::Relaxed);
        let id = format!("deployment-{}", sequence);
        Deployment::new(Arc::clone(&self.shared), id, main.to_string(), config)
    }

    /// Log `err` with its structured fields
    pub fn report_exception(&self, err: &ModuleError) {
        match err {
            ModuleError::ScriptExecution(failure) => error!(
                script = %failure.script,
                line = ?failure.line,
                column = ?failure.column,
                traceback = failure.traceback.as_deref().unwrap_or_default(),
                "{}",
                failure.message
            ),
            ModuleError::Transpilation { name, diagnostic } => {
                error!(script = %name, diagnostic = %diagnostic, "transpilation failed")
            }
            ModuleError::ResourceNotFound { name } => error!(script = %name, "script not found"),
            other => error!("{}", other),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    pub fn names(&self) -> &ModuleNames {
        &self.shared.names
    }

    pub fn resources(&self) -> &Arc<dyn ResourceLookup> {
        &self.shared.resources
    }

    pub fn transpiler(&self) -> Option<&Arc<TranspilerGateway>> {
        self.shared.transpiler.as_ref()
    }
}
