//! Test fixtures - script snippets and a toy dialect

use modhost_core::DialectSettings;

/// Module that counts its own evaluations in `_G.counter_runs`
pub fn counter_module() -> &'static str {
    r#"_G.counter_runs = (_G.counter_runs or 0) + 1
module.exports.value = _G.counter_runs
"#
}

/// Lua-style module returning its table
pub fn returning_module() -> &'static str {
    r#"local M = {}
function M.greet(name) return "hello " .. name end
return M
"#
}

/// Module that registers a stop hook; its exports count the hook's calls
pub fn stopping_module() -> &'static str {
    r#"local state = { calls = 0 }
function on_stop()
  state.calls = state.calls + 1
end
module.exports = state
"#
}

/// Syntax error on line 3
pub fn syntax_error_module() -> &'static str {
    "local a = 1\nlocal b = 2\nlocal = 3\n"
}

/// Runtime error on line 2
pub fn runtime_error_module() -> &'static str {
    "local t = nil\nreturn t.field\n"
}

/// Toy dialect: `let` declares a local, `!!` is a syntax error
pub fn dialect_compiler() -> &'static str {
    r#"local Dialect = {}
function Dialect.compile(source)
  local at = source:find("!!", 1, true)
  if at then
    local before = source:sub(1, at - 1)
    local _, breaks = before:gsub("\n", "")
    local column = at - (before:match(".*\n()") or 1) + 1
    error(string.format("%d:%d: unexpected '!!'", breaks + 1, column), 0)
  end
  return (source:gsub("let ", "local "))
end
return Dialect
"#
}

pub fn dialect_settings() -> DialectSettings {
    DialectSettings {
        extension: "dl".to_string(),
        bootstrap: "dialect.lua".to_string(),
        global: Some("Dialect".to_string()),
        compile: "local source = ...\nreturn (Dialect.compile(source))".to_string(),
    }
}
