//! CommonJS-style modules for embedded Lua.
//!
//! A [`ScriptHost`] creates [`Deployment`]s. Each deployment runs one entry
//! script and owns a module cache, so a module `require`d from anywhere in
//! that deployment is evaluated once and shared. `load` runs a script in the
//! caller's scope instead.

pub mod cache;
pub mod config;
pub mod context;
pub mod deployment;
pub mod engine;
pub mod errors;
pub mod handles;
pub mod host;
pub mod pipeline;
pub mod resource;
pub mod transpiler;
pub mod wrapper;

pub use cache::{ModuleCache, ModuleNames};
pub use config::{CliOverrides, DialectSettings, HostConfig};
pub use context::ContextMode;
pub use deployment::{Deployment, DeploymentState};
pub use engine::{Engine, EngineError, EvalError, PLACEHOLDER_CHUNK};
pub use errors::{ModuleError, Result, ScriptFailure};
pub use host::ScriptHost;
pub use resource::{DirectoryLookup, MemoryLookup, Resource, ResourceLookup};
pub use transpiler::TranspilerGateway;
pub use wrapper::WrappedSource;

pub use mlua;
