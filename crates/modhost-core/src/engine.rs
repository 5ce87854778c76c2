//! Lua engine binding: binding scopes, streaming evaluation, and the
//! structured errors that come back out of the engine.

use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};
use std::io::{self, ErrorKind, Read};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::errors::{ModuleError, Result, ScriptFailure};

/// Chunk name every script is compiled under. Diagnostics replace it with the
/// script's logical name.
pub const PLACEHOLDER_CHUNK: &str = "<eval>";

/// Size of the pieces handed to the Lua parser
const READ_CHUNK: usize = 8 * 1024;

/// A failure reported by Lua, with the location split out of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub traceback: Option<String>,
}

impl EngineError {
    /// Parse a Lua error string such as `<eval>:3: boom\nstack traceback:...`
    pub fn from_message(raw: &str) -> Self {
        let (first, rest) = match raw.split_once('\n') {
            Some((first, rest)) => (first, Some(rest)),
            None => (raw, None),
        };
        let (line, message) = match split_location(first) {
            Some((line, message)) => (Some(line), message.to_string()),
            None => (None, first.to_string()),
        };
        Self {
            message,
            line,
            column: None,
            traceback: rest.filter(|t| !t.trim().is_empty()).map(str::to_string),
        }
    }

    pub fn from_lua(err: &mlua::Error) -> Self {
        match err {
            mlua::Error::RuntimeError(message) => Self::from_message(message),
            mlua::Error::SyntaxError { message, .. } => Self::from_message(message),
            mlua::Error::CallbackError { traceback, cause } => {
                let mut inner = Self::from_lua(cause);
                if inner.line.is_none() {
                    // the failing call site only shows up in the traceback
                    inner.line = traceback
                        .lines()
                        .find_map(|l| split_location(l.trim()).map(|(n, _)| n));
                }
                if inner.traceback.is_none() && !traceback.is_empty() {
                    inner.traceback = Some(traceback.clone());
                }
                inner
            }
            mlua::Error::WithContext { context, cause } => {
                let mut inner = Self::from_lua(cause);
                inner.message = format!("{}: {}", context, inner.message);
                inner
            }
            other => Self::from_message(&other.to_string()),
        }
    }

    /// Attribute this error to `script`, replacing the placeholder chunk name
    pub fn into_failure(self, script: &str) -> ScriptFailure {
        ScriptFailure {
            script: script.to_string(),
            message: self.message.replace(PLACEHOLDER_CHUNK, script),
            line: self.line,
            column: self.column,
            traceback: self.traceback.map(|t| t.replace(PLACEHOLDER_CHUNK, script)),
        }
    }
}

/// `<eval>:12: message` -> (12, "message")
fn split_location(text: &str) -> Option<(u32, &str)> {
    let start = text.find(PLACEHOLDER_CHUNK)?;
    let after = text[start + PLACEHOLDER_CHUNK.len()..].strip_prefix(':')?;
    let digits = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
    let line = after[..digits].parse().ok()?;
    let message = after[digits..].strip_prefix(':').unwrap_or(&after[digits..]);
    Some((line, message.trim_start()))
}

/// Why an evaluation did not produce a value
#[derive(Debug)]
pub enum EvalError {
    /// A host error raised by a nested `require`/`load`, passed through as is
    Host(ModuleError),
    /// Lua rejected or aborted the script
    Script(EngineError),
    /// The source stream failed
    Read(io::Error),
}

impl EvalError {
    pub(crate) fn from_lua(err: mlua::Error) -> Self {
        match find_external::<ModuleError>(&err) {
            Some(inner) => EvalError::Host(inner.clone()),
            None => EvalError::Script(EngineError::from_lua(&err)),
        }
    }

    /// Convert into a host error attributed to `script`
    pub fn into_module_error(self, script: &str) -> ModuleError {
        match self {
            EvalError::Host(err) => err,
            EvalError::Script(err) => ModuleError::ScriptExecution(err.into_failure(script)),
            EvalError::Read(err) => ModuleError::io(script, &err),
        }
    }
}

/// Find a typed error that crossed the engine as `mlua::Error::external`
pub(crate) fn find_external<T: std::error::Error + 'static>(err: &mlua::Error) -> Option<&T> {
    match err {
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<T>(),
        mlua::Error::CallbackError { cause, .. } => find_external(cause),
        mlua::Error::WithContext { cause, .. } => find_external(cause),
        mlua::Error::BadArgument { cause, .. } => find_external(cause),
        _ => None,
    }
}

/// The embedded Lua state plus the primitives captured from it at startup.
pub struct Engine {
    lua: Lua,
    native_load: Function,
    setmetatable: Function,
}

impl Engine {
    pub fn new() -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .map_err(|e| ModuleError::EngineUnavailable(e.to_string()))?;
        let globals = lua.globals();
        let native_load: Function = globals
            .get("load")
            .map_err(|e| ModuleError::EngineUnavailable(e.to_string()))?;
        let setmetatable: Function = globals
            .get("setmetatable")
            .map_err(|e| ModuleError::EngineUnavailable(e.to_string()))?;
        Ok(Self {
            lua,
            native_load,
            setmetatable,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// A fresh, empty binding scope. Reads fall through to the Lua globals,
    /// writes stay in the scope.
    pub fn new_scope(&self) -> Result<Table> {
        let scope = self.lua.create_table()?;
        let meta = self.lua.create_table()?;
        meta.set("__index", self.lua.globals())?;
        self.setmetatable.call::<()>((scope.clone(), meta))?;
        Ok(scope)
    }

    /// Run a host-provided snippet in `scope`
    pub fn exec_snippet(&self, name: &str, code: &str, scope: &Table) -> Result<()> {
        self.lua
            .load(code)
            .set_name(format!("={}", name))
            .set_environment(scope.clone())
            .exec()?;
        Ok(())
    }

    /// Compile `source` as text under the placeholder chunk name, pulling it
    /// piecewise, then run it with `scope` as its environment.
    pub fn evaluate<R>(&self, source: R, scope: &Table) -> std::result::Result<Value, EvalError>
    where
        R: Read + Send + 'static,
    {
        let read_failure: Arc<Mutex<Option<io::Error>>> = Arc::default();
        let reader = self
            .source_reader(source, Arc::clone(&read_failure))
            .map_err(EvalError::from_lua)?;

        let (chunk, message): (Option<Function>, Value) = self
            .native_load
            .call((reader, format!("={}", PLACEHOLDER_CHUNK), "t", scope.clone()))
            .map_err(EvalError::from_lua)?;

        if let Some(err) = read_failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(EvalError::Read(err));
        }

        let chunk = match chunk {
            Some(chunk) => chunk,
            None => {
                let err = match message {
                    Value::String(text) => EngineError::from_message(&text.to_string_lossy()),
                    Value::Error(err) => EngineError::from_lua(&err),
                    other => EngineError::from_message(&format!("{:?}", other)),
                };
                debug!(message = %err.message, line = ?err.line, "chunk rejected");
                return Err(EvalError::Script(err));
            }
        };

        chunk.call::<Value>(()).map_err(EvalError::from_lua)
    }

    /// Lua reader function over `source`. Read errors are parked in
    /// `failure` and end the stream, since the parser would only report them
    /// as a syntax error.
    fn source_reader<R>(
        &self,
        mut source: R,
        failure: Arc<Mutex<Option<io::Error>>>,
    ) -> mlua::Result<Function>
    where
        R: Read + Send + 'static,
    {
        let mut buf = vec![0u8; READ_CHUNK];
        self.lua.create_function_mut(move |lua, ()| {
            let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Ok(Value::Nil);
            }
            loop {
                match source.read(&mut buf) {
                    Ok(0) => return Ok(Value::Nil),
                    Ok(n) => return Ok(Value::String(lua.create_string(&buf[..n])?)),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        *slot = Some(e);
                        return Ok(Value::Nil);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn eval(engine: &Engine, source: &str) -> std::result::Result<Value, EvalError> {
        let scope = engine.new_scope().unwrap();
        engine.evaluate(Cursor::new(source.as_bytes().to_vec()), &scope)
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "disk on fire"))
        }
    }

    #[test]
    fn test_parse_message_with_location() {
        let err = EngineError::from_message(
            "<eval>:12: boom\nstack traceback:\n\t<eval>:12: in main chunk",
        );
        assert_eq!(err.line, Some(12));
        assert_eq!(err.message, "boom");
        assert!(err.traceback.unwrap().contains("main chunk"));
    }

    #[test]
    fn test_parse_message_without_location() {
        let err = EngineError::from_message("plain failure");
        assert_eq!(err.line, None);
        assert_eq!(err.message, "plain failure");
        assert_eq!(err.traceback, None);
    }

    #[test]
    fn test_failure_replaces_placeholder() {
        let err =
            EngineError::from_message("<eval>:2: bad\nstack traceback:\n\t<eval>:2: in main chunk");
        let failure = err.into_failure("lib/util.lua");
        assert_eq!(failure.script, "lib/util.lua");
        assert!(!failure.traceback.unwrap().contains(PLACEHOLDER_CHUNK));
    }

    #[test]
    fn test_evaluate_returns_value() {
        let engine = Engine::new().unwrap();
        let value = eval(&engine, "return 40 + 2").unwrap();
        assert_eq!(value.as_integer(), Some(42));
    }

    #[test]
    fn test_evaluate_large_source_in_pieces() {
        let engine = Engine::new().unwrap();
        let mut source = String::new();
        for i in 0..2000 {
            source.push_str(&format!("v{} = {}\n", i % 150, i));
        }
        source.push_str("return 'done'");
        assert!(source.len() > READ_CHUNK * 2);
        let value = eval(&engine, &source).unwrap();
        assert_eq!(value.as_string().unwrap().to_string_lossy(), "done");
    }

    #[test]
    fn test_scope_writes_stay_local() {
        let engine = Engine::new().unwrap();
        let scope = engine.new_scope().unwrap();
        engine
            .evaluate(Cursor::new(b"answer = 42; return type(print)".to_vec()), &scope)
            .unwrap();
        assert_eq!(scope.raw_get::<i64>("answer").unwrap(), 42);
        assert!(engine.lua().globals().raw_get::<Value>("answer").unwrap().is_nil());
    }

    #[test]
    fn test_syntax_error_has_line() {
        let engine = Engine::new().unwrap();
        match eval(&engine, "local a = 1\nlocal = 2\n") {
            Err(EvalError::Script(err)) => assert_eq!(err.line, Some(2)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_error_has_line() {
        let engine = Engine::new().unwrap();
        match eval(&engine, "\n\nerror('kaput')") {
            Err(EvalError::Script(err)) => {
                assert_eq!(err.line, Some(3));
                assert_eq!(err.message, "kaput");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_binary_chunks_refused() {
        let engine = Engine::new().unwrap();
        let result = eval(&engine, "\x1bLua");
        assert!(matches!(result, Err(EvalError::Script(_))));
    }

    #[test]
    fn test_read_failure_is_reported() {
        let engine = Engine::new().unwrap();
        let scope = engine.new_scope().unwrap();
        let result = engine.evaluate(Broken, &scope);
        assert!(matches!(result, Err(EvalError::Read(_))));
    }

    #[test]
    fn test_host_error_passes_through() {
        let engine = Engine::new().unwrap();
        let scope = engine.new_scope().unwrap();
        let fail = engine
            .lua()
            .create_function(|_, name: String| -> mlua::Result<()> {
                Err(mlua::Error::external(ModuleError::ResourceNotFound { name }))
            })
            .unwrap();
        scope.set("fail", fail).unwrap();
        let result = engine.evaluate(Cursor::new(b"fail('x.lua')".to_vec()), &scope);
        match result {
            Err(EvalError::Host(ModuleError::ResourceNotFound { name })) => {
                assert_eq!(name, "x.lua")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
