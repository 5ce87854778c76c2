//! Gateway to the optional dialect compiler.
//!
//! The compiler lives in its own Lua state, separate from any deployment.
//! It is bootstrapped on first use and reused for every later compile.

use mlua::{Function, Lua, LuaOptions, StdLib, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::extension_of;
use crate::config::DialectSettings;
use crate::errors::{ModuleError, Result};
use crate::resource::ResourceLookup;

struct CompilerScope {
    // declared first so the function handle is released before its state
    compile: Function,
    _lua: Lua,
}

pub struct TranspilerGateway {
    settings: DialectSettings,
    resources: Arc<dyn ResourceLookup>,
    state: Mutex<Option<CompilerScope>>,
}

impl TranspilerGateway {
    /// `resources` is where the bootstrap program is looked up
    pub fn new(settings: DialectSettings, resources: Arc<dyn ResourceLookup>) -> Self {
        Self {
            settings,
            resources,
            state: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &DialectSettings {
        &self.settings
    }

    /// Whether `name` is written in the dialect
    pub fn handles(&self, name: &str) -> bool {
        extension_of(name) == Some(self.settings.extension.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.state().is_some()
    }

    fn state(&self) -> MutexGuard<'_, Option<CompilerScope>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compile dialect `source` into Lua source.
    ///
    /// The first call bootstraps the compiler. If that fails the gateway stays
    /// uninitialized and the next call tries again.
    pub fn compile(&self, source_name: &str, source: &str) -> Result<String> {
        let mut state = self.state();
        let scope = match state.take() {
            Some(scope) => scope,
            None => self.bootstrap()?,
        };

        debug!(script = source_name, "transpiling");
        let result = scope
            .compile
            .call::<String>(source)
            .map_err(|e| ModuleError::Transpilation {
                name: source_name.to_string(),
                diagnostic: diagnostic(&e),
            });
        *state = Some(scope);
        result
    }

    fn bootstrap(&self) -> Result<CompilerScope> {
        let name = &self.settings.bootstrap;
        let resource = match self.resources.lookup(name)? {
            Some(resource) => resource,
            None => {
                warn!(bootstrap = %name, "dialect compiler not found");
                return Err(ModuleError::ResourceNotFound { name: name.clone() });
            }
        };
        let program = resource.read_to_string()?;

        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .map_err(|e| ModuleError::EngineUnavailable(e.to_string()))?;
        let exported: Value = lua
            .load(program.as_str())
            .set_name(format!("={}", name))
            .eval()
            .map_err(|e| ModuleError::Transpilation {
                name: name.clone(),
                diagnostic: diagnostic(&e),
            })?;
        if let Some(global) = &self.settings.global {
            if !exported.is_nil() {
                lua.globals().set(global.as_str(), exported)?;
            }
        }
        let compile = lua
            .load(self.settings.compile.as_str())
            .set_name("=<transpile>")
            .into_function()?;

        info!(bootstrap = %name, extension = %self.settings.extension, "dialect compiler ready");
        Ok(CompilerScope { compile, _lua: lua })
    }
}

/// First line of the compiler's message, without the stack traceback
fn diagnostic(err: &mlua::Error) -> String {
    let text = match err {
        mlua::Error::CallbackError { cause, .. } => cause.to_string(),
        other => other.to_string(),
    };
    let first = text.lines().next().unwrap_or_default();
    first.strip_prefix("runtime error: ").unwrap_or(first).to_string()
}
