//! Deployments: one entry script, its context tree, module cache and stop hook.

use mlua::{FromLua, Function, Table, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::ModuleCache;
use crate::context;
use crate::engine::EvalError;
use crate::errors::{ModuleError, Result};
use crate::host::HostShared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Created,
    Started,
    Stopped,
}

/// State reachable from script-side context handles
pub(crate) struct DeploymentShared {
    pub(crate) id: String,
    pub(crate) main: String,
    pub(crate) config: serde_json::Value,
    pub(crate) cache: ModuleCache<Value>,
    stop_hook: Mutex<Option<StopHook>>,
    root_scope: Mutex<Option<Table>>,
    torn_down: AtomicBool,
    // last, so every Lua value above is released while the engine is alive
    pub(crate) host: Arc<HostShared>,
}

/// A registered `on_stop` function and the script that defined it
struct StopHook {
    function: Function,
    script: String,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeploymentShared {
    /// Last writer wins
    pub(crate) fn set_stop_hook(&self, function: Function, script: &str) {
        debug!(deployment = %self.id, script, "stop hook registered");
        *locked(&self.stop_hook) = Some(StopHook {
            function,
            script: script.to_string(),
        });
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.cache.clear();
        locked(&self.stop_hook).take();
    }
}

/// A host-managed run of one entry script.
///
/// Nothing is evaluated until [`Deployment::start`]. Dropping a deployment
/// tears it down without calling its stop hook.
pub struct Deployment {
    shared: Arc<DeploymentShared>,
    state: DeploymentState,
}

impl Deployment {
    pub(crate) fn new(
        host: Arc<HostShared>,
        id: String,
        main: String,
        config: serde_json::Value,
    ) -> Self {
        let cache = ModuleCache::new(host.names.clone());
        Self {
            shared: Arc::new(DeploymentShared {
                id,
                main,
                config,
                cache,
                stop_hook: Mutex::new(None),
                root_scope: Mutex::new(None),
                torn_down: AtomicBool::new(false),
                host,
            }),
            state: DeploymentState::Created,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn main(&self) -> &str {
        &self.shared.main
    }

    pub fn state(&self) -> DeploymentState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DeploymentState::Started
    }

    pub fn has_stop_hook(&self) -> bool {
        locked(&self.shared.stop_hook).is_some()
    }

    /// Run the entry script. On failure the deployment is torn down and the
    /// error returned.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            DeploymentState::Created => {}
            DeploymentState::Started => {
                warn!(deployment = %self.id(), "already started");
                return Ok(());
            }
            DeploymentState::Stopped => {
                return Err(ModuleError::Undeployed {
                    deployment: self.id().to_string(),
                })
            }
        }

        info!(deployment = %self.id(), main = %self.main(), "starting deployment");
        match context::run_root(&self.shared) {
            Ok(scope) => {
                *locked(&self.shared.root_scope) = Some(scope);
                self.state = DeploymentState::Started;
                Ok(())
            }
            Err(err) => {
                self.shared.teardown();
                self.state = DeploymentState::Stopped;
                Err(err)
            }
        }
    }

    /// Call the stop hook, if any, then tear down. Teardown happens even if
    /// the hook fails; the hook's error is returned afterwards. A no-op
    /// unless the deployment is running.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != DeploymentState::Started {
            return Ok(());
        }
        info!(deployment = %self.id(), "stopping deployment");

        let hook = locked(&self.shared.stop_hook).take();
        let result = match hook {
            Some(hook) => hook
                .function
                .call::<()>(())
                .map_err(|e| EvalError::from_lua(e).into_module_error(&hook.script)),
            None => Ok(()),
        };

        self.shared.teardown();
        self.state = DeploymentState::Stopped;
        result
    }

    /// Resolve a module through this deployment's cache, as a script's
    /// `require` would
    pub fn require(&self, name: &str) -> Result<Value> {
        if self.shared.is_torn_down() {
            return Err(ModuleError::Undeployed {
                deployment: self.id().to_string(),
            });
        }
        context::require(&self.shared, name)
    }

    /// Read a binding from the entry script's scope; nil before start
    pub fn global<V: FromLua>(&self, name: &str) -> Result<V> {
        let lua = self.shared.host.engine.lua();
        let value = match locked(&self.shared.root_scope).as_ref() {
            Some(scope) => scope.raw_get::<Value>(name)?,
            None => Value::Nil,
        };
        Ok(V::from_lua(value, lua)?)
    }

    /// Normalized names of the modules evaluated so far
    pub fn cached_modules(&self) -> Vec<String> {
        self.shared.cache.cached_names()
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        if self.state != DeploymentState::Stopped {
            self.shared.teardown();
        }
    }
}

impl std::fmt::Debug for Deployment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployment")
            .field("id", &self.shared.id)
            .field("main", &self.shared.main)
            .field("state", &self.state)
            .finish()
    }
}
