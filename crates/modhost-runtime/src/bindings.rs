//! Names reserved in every binding scope.

/// Handle to the execution context that owns the scope.
pub const CONTEXT: &str = "__context";

/// Host platform handle.
pub const PLATFORM: &str = "__platform";

/// Deployment container handle.
pub const CONTAINER: &str = "__container";

/// Set to `true` in a scope while a script is being `load`ed into it.
pub const LOAD_MARKER: &str = "__loading";

/// A global function with this name is called once when the deployment stops.
///
/// Only a global definition in the script's own scope counts: the module
/// epilogue runs outside the module body, so `local function on_stop()` is
/// never seen, and an `on_stop` reachable only through the shared globals
/// is ignored.
pub const STOP_HOOK: &str = "on_stop";

/// Global functions scripts call to pull in other scripts.
pub const REQUIRE: &str = "require";
pub const LOAD: &str = "load";
