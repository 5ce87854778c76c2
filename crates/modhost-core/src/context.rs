//! Execution contexts: one script, its binding scope, and the `require` /
//! `load` calls it makes back into the host.

use mlua::{AnyUserData, Function, Table, UserData, UserDataMethods, Value};
use modhost_runtime::bindings;
use modhost_runtime::module::{GLOBAL_FUNCTIONS, MODULE_EPILOGUE, MODULE_PROLOGUE};
use std::io::Read;
use std::sync::{Arc, OnceLock, Weak};
use tracing::debug;

use crate::deployment::DeploymentShared;
use crate::errors::{ModuleError, Result};
use crate::handles::{self, ContainerHandle, PlatformHandle};
use crate::pipeline::{self, HostSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Entry script of a deployment, fresh scope, run unwrapped
    Root,
    /// `require`d script, fresh scope, wrapped in module boilerplate
    Module,
    /// `load`ed script, runs in the caller's scope
    Load,
}

/// Holds a module's `module.exports` once the module body has finished
#[derive(Debug, Default)]
pub(crate) struct ExportSlot(OnceLock<Value>);

impl ExportSlot {
    fn set(&self, value: Value) -> mlua::Result<()> {
        self.0
            .set(value)
            .map_err(|_| mlua::Error::RuntimeError("module exports already captured".to_string()))
    }

    fn get(&self) -> Option<Value> {
        self.0.get().cloned()
    }
}

/// `__context` as scripts see it
#[derive(Clone)]
pub(crate) struct ContextHandle {
    deployment: Weak<DeploymentShared>,
    deployment_id: String,
    module_id: String,
    module_uri: String,
    exports: Arc<ExportSlot>,
}

impl ContextHandle {
    fn deployment(&self) -> Result<Arc<DeploymentShared>> {
        match self.deployment.upgrade() {
            Some(deployment) if !deployment.is_torn_down() => Ok(deployment),
            _ => Err(ModuleError::Undeployed {
                deployment: self.deployment_id.clone(),
            }),
        }
    }

    /// Copy the handle out so no borrow is held while nested scripts run
    fn from_userdata(ud: &AnyUserData) -> mlua::Result<Self> {
        Ok(ud.borrow::<ContextHandle>()?.clone())
    }
}

impl UserData for ContextHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("module_id", |_, this, ()| Ok(this.module_id.clone()));
        methods.add_method("module_uri", |_, this, ()| Ok(this.module_uri.clone()));
        methods.add_method("set_exports", |_, this, value: Value| this.exports.set(value));
        methods.add_method("set_stop", |_, this, hook: Function| {
            let deployment = this.deployment().map_err(mlua::Error::external)?;
            deployment.set_stop_hook(hook, &this.module_id);
            Ok(())
        });
        methods.add_function("require", |_, (ud, name): (AnyUserData, String)| {
            let handle = ContextHandle::from_userdata(&ud)?;
            let deployment = handle.deployment().map_err(mlua::Error::external)?;
            require(&deployment, &name).map_err(mlua::Error::external)
        });
        methods.add_function(
            "load",
            |_, (ud, name, scope): (AnyUserData, String, Table)| {
                let handle = ContextHandle::from_userdata(&ud)?;
                let deployment = handle.deployment().map_err(mlua::Error::external)?;
                load(&deployment, &name, scope).map_err(mlua::Error::external)
            },
        );
    }
}

/// One script being executed under a particular scoping mode
pub(crate) struct ExecutionContext {
    deployment: Arc<DeploymentShared>,
    name: String,
    mode: ContextMode,
    scope: Table,
    exports: Option<Arc<ExportSlot>>,
}

impl ExecutionContext {
    /// A context with a brand new scope: host handles, its own `__context`,
    /// and the global `require`/`load` functions.
    fn fresh(
        deployment: &Arc<DeploymentShared>,
        mode: ContextMode,
        name: &str,
        uri: &str,
    ) -> Result<Self> {
        let host = &deployment.host;
        let lua = host.engine.lua();
        let scope = host.engine.new_scope()?;

        handles::install(
            lua,
            &scope,
            PlatformHandle::new(host.config.platform.name.clone()),
            ContainerHandle::new(&deployment.id, &deployment.main, deployment.config.clone()),
        )?;

        let exports = Arc::new(ExportSlot::default());
        let handle = ContextHandle {
            deployment: Arc::downgrade(deployment),
            deployment_id: deployment.id.clone(),
            module_id: name.to_string(),
            module_uri: uri.to_string(),
            exports: Arc::clone(&exports),
        };
        scope.raw_set(bindings::CONTEXT, lua.create_userdata(handle)?)?;
        host.engine.exec_snippet("<globals>", GLOBAL_FUNCTIONS, &scope)?;

        Ok(Self {
            deployment: Arc::clone(deployment),
            name: name.to_string(),
            mode,
            scope,
            exports: Some(exports),
        })
    }

    /// A context sharing `scope` with the script that called `load`
    fn sharing(deployment: &Arc<DeploymentShared>, name: &str, scope: Table) -> Self {
        Self {
            deployment: Arc::clone(deployment),
            name: name.to_string(),
            mode: ContextMode::Load,
            scope,
            exports: None,
        }
    }

    /// Evaluate `source` in this context's scope, attributing failures to
    /// this context's script name
    fn evaluate<R>(&self, source: R) -> Result<Value>
    where
        R: Read + Send + 'static,
    {
        debug!(script = %self.name, mode = ?self.mode, "evaluating");
        self.deployment
            .host
            .engine
            .evaluate(source, &self.scope)
            .map_err(|e| e.into_module_error(&self.name))
    }

    /// The value the module body handed to `__context:set_exports`
    fn exports(&self) -> Value {
        self.exports
            .as_ref()
            .and_then(|slot| slot.get())
            .unwrap_or(Value::Nil)
    }
}

fn prepare(deployment: &DeploymentShared, name: &str) -> Result<HostSource> {
    let host = &deployment.host;
    pipeline::prepare(host.resources.as_ref(), host.transpiler.as_deref(), name)
}

/// Run the deployment's entry script in a fresh root scope and return that
/// scope. An `on_stop` function left in the scope becomes the stop hook.
pub(crate) fn run_root(deployment: &Arc<DeploymentShared>) -> Result<Table> {
    let name = deployment.host.names.normalize(&deployment.main);
    let source = prepare(deployment, &name)?;
    let context = ExecutionContext::fresh(deployment, ContextMode::Root, &name, source.uri())?;
    context.evaluate(source.into_reader())?;

    if let Value::Function(hook) = context.scope.raw_get::<Value>(bindings::STOP_HOOK)? {
        deployment.set_stop_hook(hook, &name);
    }
    Ok(context.scope)
}

/// Resolve `name` through the deployment's module cache, evaluating the
/// module on first use
pub(crate) fn require(deployment: &Arc<DeploymentShared>, name: &str) -> Result<Value> {
    deployment.cache.get_or_compute(name, |name| {
        let source = prepare(deployment, name)?;
        let context =
            ExecutionContext::fresh(deployment, ContextMode::Module, name, source.uri())?;
        context.evaluate(source.wrap(MODULE_PROLOGUE, MODULE_EPILOGUE))?;
        Ok(context.exports())
    })
}

/// Run `name` inside `scope`, marking the scope while the script runs
pub(crate) fn load(deployment: &Arc<DeploymentShared>, name: &str, scope: Table) -> Result<Value> {
    let name = deployment.host.names.normalize(name);
    let source = prepare(deployment, &name)?;
    let context = ExecutionContext::sharing(deployment, &name, scope);

    let previous: Value = context.scope.raw_get(bindings::LOAD_MARKER)?;
    context.scope.raw_set(bindings::LOAD_MARKER, true)?;
    let result = context.evaluate(source.into_reader());
    context.scope.raw_set(bindings::LOAD_MARKER, previous)?;
    result
}
