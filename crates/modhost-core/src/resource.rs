//! Mapping logical module names to byte streams.

use indexmap::IndexMap;
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};

use crate::errors::{ModuleError, Result};

/// An opened script: its name, where it came from, its exact length and the
/// stream of its bytes.
pub struct Resource {
    name: String,
    uri: String,
    length: u64,
    reader: Box<dyn Read + Send>,
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        length: u64,
        reader: Box<dyn Read + Send>,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            length,
            reader,
        }
    }

    pub fn from_bytes(name: impl Into<String>, uri: impl Into<String>, bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self::new(name, uri, length, Box::new(Cursor::new(bytes)))
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

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    /// Drain the whole stream into memory
    pub fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(usize::try_from(self.length).unwrap_or(0));
        self.reader
            .read_to_end(&mut bytes)
            .map_err(|e| ModuleError::io(&self.name, &e))?;
        Ok(bytes)
    }

    pub fn read_to_string(self) -> Result<String> {
        let name = self.name.clone();
        let bytes = self.read_to_end()?;
        String::from_utf8(bytes).map_err(|e| ModuleError::Io {
            name,
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Source of script bytes keyed by normalized module name.
///
/// `Ok(None)` means the name does not exist; errors are reserved for names
/// that exist but could not be opened.
pub trait ResourceLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Result<Option<Resource>>;
}

/// Looks names up relative to an ordered list of directories
#[derive(Debug, Clone)]
pub struct DirectoryLookup {
    roots: Vec<PathBuf>,
}

impl DirectoryLookup {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Names may only descend into a root
    fn is_contained(name: &str) -> bool {
        let path = Path::new(name);
        !name.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

impl ResourceLookup for DirectoryLookup {
    fn lookup(&self, name: &str) -> Result<Option<Resource>> {
        if !Self::is_contained(name) {
            return Ok(None);
        }
        for root in &self.roots {
            let path = root.join(name);
            if !path.is_file() {
                continue;
            }
            let file = File::open(&path).map_err(|e| ModuleError::io(name, &e))?;
            let length = file.metadata().map_err(|e| ModuleError::io(name, &e))?.len();
            let canonical = path.canonicalize().unwrap_or(path);
            let uri = format!("file://{}", canonical.display());
            return Ok(Some(Resource::new(name, uri, length, Box::new(file))));
        }
        Ok(None)
    }
}

/// In-memory scripts, addressed as `mem:<name>`
#[derive(Debug, Clone, Default)]
pub struct MemoryLookup {
    files: IndexMap<String, Vec<u8>>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: impl Into<String>, source: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), source.into());
    }

    pub fn with_file(mut self, name: impl Into<String>, source: impl Into<Vec<u8>>) -> Self {
        self.add_file(name, source);
        self
    }
}

impl ResourceLookup for MemoryLookup {
    fn lookup(&self, name: &str) -> Result<Option<Resource>> {
        Ok(self
            .files
            .get(name)
            .map(|bytes| Resource::from_bytes(name, format!("mem:{}", name), bytes.clone())))
    }
}
