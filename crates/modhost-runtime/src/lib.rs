//! Runtime support code for modhost.
//! Provides the Lua text wrapped around module bodies and installed into
//! every fresh binding scope.

pub mod bindings;
pub mod module;
