use std::fmt;
use thiserror::Error;

/// A script failure reported by the engine, attributed to a logical script name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    /// Logical module or script name, never the engine's placeholder tag
    pub script: String,

    /// Engine message without its location prefix
    pub message: String,

    pub line: Option<u32>,
    pub column: Option<u32>,

    /// Engine stack traceback, if the engine produced one
    pub traceback: Option<String>,
}

impl fmt::Display for ScriptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.script)?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    #[error("Cannot find script: {name}")]
    ResourceNotFound { name: String },

    #[error("Failed to transpile {name}: {diagnostic}")]
    Transpilation { name: String, diagnostic: String },

    #[error("Script error at {0}")]
    ScriptExecution(ScriptFailure),

    #[error("Script engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Script engine error: {0}")]
    Engine(String),

    #[error("Circular require of {name}")]
    CircularRequire { name: String },

    #[error("Deployment {deployment} is no longer running")]
    Undeployed { deployment: String },

    #[error("IO error reading {name}: {message}")]
    Io { name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ModuleError {
    pub(crate) fn io(name: impl Into<String>, err: &std::io::Error) -> Self {
        ModuleError::Io {
            name: name.into(),
            message: err.to_string(),
        }
    }

    /// The script failure carried by this error, if it is one
    pub fn script_failure(&self) -> Option<&ScriptFailure> {
        match self {
            ModuleError::ScriptExecution(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Engine API failures outside script evaluation. A `ModuleError` that
/// travelled through the engine comes back out unchanged.
impl From<mlua::Error> for ModuleError {
    fn from(err: mlua::Error) -> Self {
        match crate::engine::find_external::<ModuleError>(&err) {
            Some(inner) => inner.clone(),
            None => ModuleError::Engine(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModuleError>;
