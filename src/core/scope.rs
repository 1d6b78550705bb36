//! Configuration scopes and the once-per-scope loading of their libraries.
//!
//! Each server, virtual host and location owns a [`ConfigurationScope`].
//! Requests share the scope: the first one to arrive loads the registry while
//! holding the scope's lock, then publishes the captured handler so later
//! requests read it without locking.
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwapOption;

use crate::{
    core::{
        error::LoadError,
        interface::HandlerInterface,
        library::LibraryRole,
        registry::{LibraryRegistry, merge_registries},
    },
    ports::loader::Loader,
};

/// Where a scope was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeType {
    Server,
    Directory,
    /// The result of merging a directory scope onto its parent
    Both,
}

/// The capability table of a loaded scope, plus where it came from.
#[derive(Debug)]
pub struct LoadedHandler {
    pub interface: Arc<HandlerInterface>,
    /// Path of the primary library, used to locate the descriptor document
    pub primary_path: String,
}

pub struct ConfigurationScope {
    scope_type: ScopeType,
    registry: Mutex<LibraryRegistry>,
    loaded: ArcSwapOption<LoadedHandler>,
}

impl ConfigurationScope {
    pub fn new(scope_type: ScopeType) -> Self {
        Self::with_registry(scope_type, LibraryRegistry::new())
    }

    pub fn with_registry(scope_type: ScopeType, registry: LibraryRegistry) -> Self {
        Self {
            scope_type,
            registry: Mutex::new(registry),
            loaded: ArcSwapOption::empty(),
        }
    }

    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    fn registry(&self) -> MutexGuard<'_, LibraryRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declare a library in this scope. Returns `false` if it was already
    /// declared.
    pub fn add_library(&mut self, path: &str, role: LibraryRole) -> bool {
        self.loaded.store(None);
        self.registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .add(path, role)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.registry().contains(path)
    }

    pub fn library_paths(&self) -> Vec<String> {
        self.registry().paths()
    }

    pub fn has_libraries(&self) -> bool {
        !self.registry().is_empty()
    }

    /// Merge a directory scope onto its parent. The result is unloaded.
    pub fn merge(parent: &ConfigurationScope, child: &ConfigurationScope) -> ConfigurationScope {
        Self::merged(ScopeType::Both, parent, child)
    }

    /// Merge a virtual host's server scope onto the main server scope.
    pub fn merge_server(
        base: &ConfigurationScope,
        virtual_host: &ConfigurationScope,
    ) -> ConfigurationScope {
        Self::merged(ScopeType::Server, base, virtual_host)
    }

    fn merged(
        scope_type: ScopeType,
        parent: &ConfigurationScope,
        child: &ConfigurationScope,
    ) -> ConfigurationScope {
        let registry = if std::ptr::eq(parent, child) {
            merge_registries(&parent.registry(), &LibraryRegistry::new())
        } else {
            merge_registries(&parent.registry(), &child.registry())
        };
        Self::with_registry(scope_type, registry)
    }

    /// The published handler, if this scope has been loaded.
    pub fn loaded(&self) -> Option<Arc<LoadedHandler>> {
        self.loaded.load_full()
    }

    /// Load the scope's libraries unless that already happened.
    ///
    /// Concurrent callers are serialized; whoever comes second finds the
    /// handler published and returns it without touching the loader.
    pub fn ensure_loaded(&self, loader: &dyn Loader) -> Result<Arc<LoadedHandler>, LoadError> {
        if let Some(handler) = self.loaded.load_full() {
            return Ok(handler);
        }

        let mut registry = self.registry();
        if let Some(handler) = self.loaded.load_full() {
            return Ok(handler);
        }

        let interface = registry.load_all(loader)?;
        let primary_path = registry
            .primary()
            .map(|lib| lib.path().to_string())
            .ok_or(LoadError::NoPrimaryLibrary)?;
        let handler = Arc::new(LoadedHandler {
            interface,
            primary_path,
        });
        self.loaded.store(Some(handler.clone()));
        tracing::info!("Loaded handler from {}", handler.primary_path);
        Ok(handler)
    }

    /// Unload every library of the scope, best effort.
    pub fn unload(&self) -> Result<(), LoadError> {
        let mut registry = self.registry();
        self.loaded.store(None);
        registry.unload_all()
    }
}

impl fmt::Debug for ConfigurationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationScope")
            .field("scope_type", &self.scope_type)
            .field("loaded", &self.loaded.load().is_some())
            .finish()
    }
}
