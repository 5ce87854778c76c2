//! Source preparation: resolve -> transpile -> wrap.
//!
//! Each step consumes the previous state, so a source cannot be wrapped
//! before it has been through the dialect check. Evaluation and export
//! capture happen in [`crate::context`].

use std::io::Read;
use tracing::debug;

use crate::errors::{ModuleError, Result};
use crate::resource::{Resource, ResourceLookup};
use crate::transpiler::TranspilerGateway;
use crate::wrapper::WrappedSource;

/// Bytes found for a module name, not yet checked for the dialect
#[derive(Debug)]
pub struct RawSource {
    resource: Resource,
}

impl RawSource {
    pub fn resolve(lookup: &dyn ResourceLookup, name: &str) -> Result<Self> {
        match lookup.lookup(name)? {
            Some(resource) => {
                debug!(script = name, uri = resource.uri(), bytes = resource.len(), "resolved");
                Ok(Self { resource })
            }
            None => Err(ModuleError::ResourceNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Run dialect sources through `gateway`; everything else passes
    /// through unread.
    pub fn transpile(self, gateway: Option<&TranspilerGateway>) -> Result<HostSource> {
        let gateway = match gateway {
            Some(gateway) if gateway.handles(self.resource.name()) => gateway,
            _ => return Ok(HostSource::from_resource(self.resource)),
        };
        let name = self.resource.name().to_string();
        let uri = self.resource.uri().to_string();
        let dialect = self.resource.read_to_string()?;
        let lua = gateway.compile(&name, &dialect)?;
        debug!(script = %name, bytes = lua.len(), "transpiled");
        Ok(HostSource::from_resource(Resource::from_bytes(name, uri, lua.into_bytes())))
    }
}

/// Lua source ready to be wrapped or evaluated as is
pub struct HostSource {
    name: String,
    uri: String,
    length: u64,
    reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for HostSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSource")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

impl HostSource {
    fn from_resource(resource: Resource) -> Self {
        let name = resource.name().to_string();
        let uri = resource.uri().to_string();
        let length = resource.len();
        Self {
            name,
            uri,
            length,
            reader: resource.into_reader(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Surround the source with module boilerplate
    pub fn wrap(
        self,
        prologue: &'static str,
        epilogue: &'static str,
    ) -> WrappedSource<Box<dyn Read + Send>> {
        let wrapped = WrappedSource::new(
            prologue.as_bytes(),
            self.reader,
            self.length,
            epilogue.as_bytes(),
        );
        debug!(script = %self.name, bytes = wrapped.len(), "wrapped");
        wrapped
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

/// Resolve `name` and bring it to Lua source
pub fn prepare(
    lookup: &dyn ResourceLookup,
    gateway: Option<&TranspilerGateway>,
    name: &str,
) -> Result<HostSource> {
    RawSource::resolve(lookup, name)?.transpile(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectSettings;
    use crate::resource::MemoryLookup;
    use std::sync::Arc;

    fn gateway(lookup: MemoryLookup) -> TranspilerGateway {
        let settings = DialectSettings {
            extension: "rev".to_string(),
            bootstrap: "rev.lua".to_string(),
            global: None,
            compile: "return (string.reverse((...)))".to_string(),
        };
        TranspilerGateway::new(settings, Arc::new(lookup))
    }

    #[test]
    fn test_missing_name() {
        let lookup = MemoryLookup::new();
        let err = prepare(&lookup, None, "nope.lua").unwrap_err();
        assert!(matches!(err, ModuleError::ResourceNotFound { name } if name == "nope.lua"));
    }

    #[test]
    fn test_plain_source_wrapped() {
        let lookup = MemoryLookup::new().with_file("a.lua", "body");
        let source = prepare(&lookup, None, "a.lua").unwrap();
        assert_eq!(source.uri(), "mem:a.lua");
        let mut wrapped = source.wrap("<", ">");
        assert_eq!(wrapped.len(), 6);
        let mut out = String::new();
        wrapped.read_to_string(&mut out).unwrap();
        assert_eq!(out, "<body>");
    }

    #[test]
    fn test_dialect_source_transpiled() {
        let lookup = MemoryLookup::new()
            .with_file("rev.lua", "return true")
            .with_file("m.rev", ")1(nruter");
        let gateway = gateway(lookup.clone());
        let source = prepare(&lookup, Some(&gateway), "m.rev").unwrap();
        assert_eq!(source.len(), 9);
        assert_eq!(source.uri(), "mem:m.rev");
        let mut out = String::new();
        source.into_reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "return(1)");
    }

    #[test]
    fn test_non_dialect_source_skips_gateway() {
        let lookup = MemoryLookup::new().with_file("a.lua", "x");
        let gateway = gateway(MemoryLookup::new());
        prepare(&lookup, Some(&gateway), "a.lua").unwrap();
        assert!(!gateway.is_initialized());
    }
}
