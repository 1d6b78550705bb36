use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{core::error::LoadError, ports::loader::{LoadedLibrary, Loader}};

/// What a declared library is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryRole {
    /// Supplies the handler capability table
    Primary,
    /// Loaded only so other libraries can resolve their symbols
    Dependency,
}

/// One declared library: its path, its role and, once loaded, its handle.
pub struct LibraryDescriptor {
    path: String,
    role: LibraryRole,
    handle: Option<Box<dyn LoadedLibrary>>,
}

impl LibraryDescriptor {
    pub fn new(path: impl Into<String>, role: LibraryRole) -> Self {
        Self {
            path: path.into(),
            role,
            handle: None,
        }
    }

    /// A fresh, unloaded descriptor for the same path and role.
    pub fn unloaded_copy(&self) -> Self {
        Self::new(self.path.clone(), self.role)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn role(&self) -> LibraryRole {
        self.role
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&dyn LoadedLibrary> {
        self.handle.as_deref()
    }

    /// Open the library unless it is already open.
    pub fn load(&mut self, loader: &dyn Loader) -> Result<(), LoadError> {
        if self.handle.is_none() {
            self.handle = Some(loader.open(&self.path)?);
        }
        Ok(())
    }

    /// Close the handle. The handle is cleared even when closing fails.
    pub fn unload(&mut self) -> Result<(), LoadError> {
        match self.handle.take() {
            Some(handle) => handle.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for LibraryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryDescriptor")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
