//! Module system runtime: the boilerplate around every `require`d script.
//!
//! A module body ends up as
//!
//! ```text
//! <MODULE_PROLOGUE><body bytes><MODULE_EPILOGUE>
//! ```
//!
//! The prologue stays on one line so that line N of the body is still
//! reported as line N.

pub const MODULE_PROLOGUE: &str = concat!(
    "local module = { id = __context:module_id(), exports = {}, ",
    "uri = __context:module_uri() }; ",
    "local __returned = (function(module, ...) ",
);

pub const MODULE_EPILOGUE: &str = r#"
end)(module, ...)
if __returned ~= nil then module.exports = __returned end
__context:set_exports(module.exports)
local __stop = rawget(_ENV, "on_stop")
if type(__stop) == "function" then __context:set_stop(__stop) end
"#;

/// Installed once into each fresh scope; `load` hands over the caller's
/// environment so the loaded script runs in it.
pub const GLOBAL_FUNCTIONS: &str = r#"function require(name) return __context:require(name) end
function load(name) return __context:load(name, _ENV) end
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings;

    #[test]
    fn test_prologue_keeps_line_numbers() {
        assert!(!MODULE_PROLOGUE.contains('\n'));
        assert!(MODULE_PROLOGUE.ends_with(' '));
    }

    #[test]
    fn test_epilogue_starts_on_new_line() {
        // a trailing `-- comment` in the body must not swallow the epilogue
        assert!(MODULE_EPILOGUE.starts_with('\n'));
    }

    #[test]
    fn test_snippets_use_reserved_names() {
        assert!(MODULE_PROLOGUE.contains(bindings::CONTEXT));
        assert!(MODULE_EPILOGUE.contains(bindings::CONTEXT));
        assert!(MODULE_EPILOGUE.contains(bindings::STOP_HOOK));
        assert!(GLOBAL_FUNCTIONS.contains(&format!("function {}(", bindings::REQUIRE)));
        assert!(GLOBAL_FUNCTIONS.contains(&format!("function {}(", bindings::LOAD)));
    }
}
