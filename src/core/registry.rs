//! Ordered set of library descriptors for one configuration scope.
//!
//! Descriptors are only ever appended while the configuration is parsed. At
//! request time [`LibraryRegistry::load_all`] opens everything in rounds: a
//! library that fails because something it needs is not open yet gets another
//! chance once any other library has loaded, independent of declaration order.
use std::sync::Arc;

use crate::{
    core::{
        error::LoadError,
        interface::HandlerInterface,
        library::{LibraryDescriptor, LibraryRole},
    },
    ports::loader::{ENTRY_POINT, Loader},
};

/// Maximum number of outer load rounds before giving up until the next request.
pub const MAX_LOAD_ROUNDS: usize = 5;

#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libraries: Vec<LibraryDescriptor>,
    primary: Option<usize>,
    fully_loaded: bool,
    interface: Option<Arc<HandlerInterface>>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unloaded descriptor. Returns `false` when `path` is already
    /// present (or empty) and nothing was added.
    pub fn add(&mut self, path: &str, role: LibraryRole) -> bool {
        self.fully_loaded = false;

        if path.is_empty() {
            tracing::warn!("Ignoring library declaration with an empty path");
            return false;
        }
        if self.contains(path) {
            tracing::debug!("Library {} already present, not added", path);
            return false;
        }

        if role == LibraryRole::Primary {
            if let Some(previous) = self.primary.map(|i| self.libraries[i].path()) {
                tracing::warn!(
                    "Primary library {} replaces previously declared primary {}",
                    path,
                    previous
                );
            }
            self.primary = Some(self.libraries.len());
            self.interface = None;
        }
        self.libraries.push(LibraryDescriptor::new(path, role));
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.libraries.iter().any(|lib| lib.path() == path)
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LibraryDescriptor> {
        self.libraries.iter()
    }

    pub fn paths(&self) -> Vec<String> {
        self.libraries.iter().map(|lib| lib.path().to_string()).collect()
    }

    pub fn primary(&self) -> Option<&LibraryDescriptor> {
        self.primary.map(|index| &self.libraries[index])
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    /// The captured capability table; only available once fully loaded.
    pub fn handler_interface(&self) -> Option<Arc<HandlerInterface>> {
        if self.fully_loaded {
            self.interface.clone()
        } else {
            None
        }
    }

    /// Open every declared library and capture the primary's capability table.
    ///
    /// Returns immediately when the registry is already fully loaded. A
    /// primary library without the entry point aborts the whole operation.
    pub fn load_all(&mut self, loader: &dyn Loader) -> Result<Arc<HandlerInterface>, LoadError> {
        if let Some(interface) = self.handler_interface() {
            return Ok(interface);
        }

        let primary = self.primary.ok_or(LoadError::NoPrimaryLibrary)?;
        let mut last_error = None;

        for round in 1..=MAX_LOAD_ROUNDS {
            let mut all_loaded;
            loop {
                let mut progressed = false;
                all_loaded = true;

                for index in 0..self.libraries.len() {
                    let descriptor = &mut self.libraries[index];
                    if descriptor.is_loaded() {
                        continue;
                    }
                    match descriptor.load(loader) {
                        Ok(()) => {
                            tracing::debug!("Loaded library {}", self.libraries[index].path());
                            progressed = true;
                            if index == primary {
                                self.capture_interface(index)?;
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Load attempt failed in round {}: {}", round, e);
                            all_loaded = false;
                            last_error = Some(e);
                        }
                    }
                }

                if !progressed {
                    break;
                }
            }

            if all_loaded {
                break;
            }
        }

        if let Some(missing) = self.libraries.iter().find(|lib| !lib.is_loaded()) {
            let error = last_error.unwrap_or_else(|| LoadError::Open {
                path: missing.path().to_string(),
                reason: "not loaded".to_string(),
            });
            tracing::warn!("Not all libraries could be loaded: {}", error);
            return Err(error);
        }

        // The primary may have been opened by an earlier, failed attempt.
        if self.interface.is_none() {
            self.capture_interface(primary)?;
        }

        self.fully_loaded = true;
        tracing::info!("All {} libraries loaded", self.libraries.len());
        self.interface.clone().ok_or(LoadError::NoPrimaryLibrary)
    }

    fn capture_interface(&mut self, index: usize) -> Result<(), LoadError> {
        let descriptor = &self.libraries[index];
        match descriptor.handle().and_then(|handle| handle.handler_interface()) {
            Some(interface) => {
                self.interface = Some(Arc::new(interface));
                Ok(())
            }
            None => {
                let error = LoadError::MissingEntryPoint {
                    path: descriptor.path().to_string(),
                    symbol: ENTRY_POINT.to_string(),
                };
                tracing::error!("{}", error);
                Err(error)
            }
        }
    }

    /// Close every open library, newest first. Keeps going after failures
    /// and reports the first one.
    pub fn unload_all(&mut self) -> Result<(), LoadError> {
        self.fully_loaded = false;
        self.interface = None;

        let mut first_error = None;
        for descriptor in self.libraries.iter_mut().rev() {
            if !descriptor.is_loaded() {
                continue;
            }
            if let Err(e) = descriptor.unload() {
                tracing::warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Add fresh, unloaded copies of every descriptor of `other` whose path
    /// is not present yet.
    pub fn merge_from(&mut self, other: &LibraryRegistry) {
        self.fully_loaded = false;
        for descriptor in other.iter() {
            if !self.contains(descriptor.path()) {
                let copy = descriptor.unloaded_copy();
                self.add(copy.path(), copy.role());
            }
        }
    }
}

/// Path-union of two registries into a new, unloaded one. Entries of `parent`
/// come first. Neither input is modified.
pub fn merge_registries(parent: &LibraryRegistry, child: &LibraryRegistry) -> LibraryRegistry {
    let mut merged = LibraryRegistry::new();
    merged.merge_from(parent);
    merged.merge_from(child);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::InProcessLoader,
        core::interface::{HandlerInterface, Outcome},
    };

    fn handler() -> HandlerInterface {
        HandlerInterface::new().with_serve(|_, _| Outcome::Ok)
    }

    #[test]
    fn test_add_same_path_twice() {
        let mut registry = LibraryRegistry::new();
        assert!(registry.add("/srv/calc.so", LibraryRole::Primary));
        assert!(!registry.add("/srv/calc.so", LibraryRole::Dependency));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("/srv/calc.so"));
        assert!(!registry.contains("/srv/calc"));
        assert_eq!(registry.primary().unwrap().role(), LibraryRole::Primary);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let mut registry = LibraryRegistry::new();
        assert!(!registry.add("", LibraryRole::Dependency));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_later_primary_wins() {
        let mut registry = LibraryRegistry::new();
        registry.add("/a.so", LibraryRole::Primary);
        registry.add("/b.so", LibraryRole::Primary);
        assert_eq!(registry.primary().unwrap().path(), "/b.so");
    }

    #[test]
    fn test_load_all_success_caches_interface() {
        let loader = InProcessLoader::new();
        loader.register_library("/srv/libdep.so");
        loader.register_handler("/srv/calc.so", handler());

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/libdep.so", LibraryRole::Dependency);
        registry.add("/srv/calc.so", LibraryRole::Primary);

        let interface = registry.load_all(&loader).unwrap();
        assert!(interface.serve.is_some());
        assert!(registry.is_fully_loaded());
        assert!(registry.iter().all(|lib| lib.is_loaded()));

        let before = loader.total_attempts();
        registry.load_all(&loader).unwrap();
        assert_eq!(loader.total_attempts(), before);
    }

    #[test]
    fn test_dependency_declared_after_dependant() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", handler());
        loader.register_library("/srv/libsoap.so");
        loader.require("/srv/calc.so", "/srv/libsoap.so");

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/calc.so", LibraryRole::Primary);
        registry.add("/srv/libsoap.so", LibraryRole::Dependency);

        registry.load_all(&loader).unwrap();
        assert_eq!(loader.attempts("/srv/calc.so"), 2);
        assert_eq!(loader.attempts("/srv/libsoap.so"), 1);
    }

    #[test]
    fn test_unresolvable_path_gives_up_after_rounds() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", handler());

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/calc.so", LibraryRole::Primary);
        registry.add("/srv/missing.so", LibraryRole::Dependency);

        let err = registry.load_all(&loader).unwrap_err();
        match err {
            LoadError::Open { path, .. } => assert_eq!(path, "/srv/missing.so"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!registry.is_fully_loaded());
        assert!(registry.handler_interface().is_none());
        // Round one scans twice (the primary loaded on the first pass), the
        // remaining rounds once each.
        assert_eq!(loader.attempts("/srv/missing.so"), MAX_LOAD_ROUNDS + 1);
        assert_eq!(loader.attempts("/srv/calc.so"), 1);
    }

    #[test]
    fn test_missing_entry_point_aborts() {
        let loader = InProcessLoader::new();
        loader.register_library("/srv/calc.so");
        loader.register_library("/srv/libdep.so");

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/calc.so", LibraryRole::Primary);
        registry.add("/srv/libdep.so", LibraryRole::Dependency);

        let err = registry.load_all(&loader).unwrap_err();
        assert_eq!(
            err,
            LoadError::MissingEntryPoint {
                path: "/srv/calc.so".to_string(),
                symbol: ENTRY_POINT.to_string(),
            }
        );
        assert_eq!(loader.attempts("/srv/libdep.so"), 0);
        assert!(!registry.is_fully_loaded());
    }

    #[test]
    fn test_no_primary_library() {
        let loader = InProcessLoader::new();
        loader.register_library("/srv/libdep.so");

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/libdep.so", LibraryRole::Dependency);
        assert_eq!(
            registry.load_all(&loader).unwrap_err(),
            LoadError::NoPrimaryLibrary
        );
    }

    #[test]
    fn test_unload_all_continues_past_failures() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", handler());
        loader.register_library("/srv/a.so");
        loader.register_library("/srv/b.so");
        loader.fail_close("/srv/b.so", "busy");

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/a.so", LibraryRole::Dependency);
        registry.add("/srv/b.so", LibraryRole::Dependency);
        registry.add("/srv/calc.so", LibraryRole::Primary);
        registry.load_all(&loader).unwrap();

        let err = registry.unload_all().unwrap_err();
        assert!(matches!(err, LoadError::Close { ref path, .. } if path == "/srv/b.so"));
        assert!(!registry.is_fully_loaded());
        assert!(registry.iter().all(|lib| !lib.is_loaded()));
        assert!(!loader.is_open("/srv/a.so"));
    }

    #[test]
    fn test_add_invalidates_fully_loaded() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", handler());
        loader.register_library("/srv/late.so");

        let mut registry = LibraryRegistry::new();
        registry.add("/srv/calc.so", LibraryRole::Primary);
        registry.load_all(&loader).unwrap();

        registry.add("/srv/late.so", LibraryRole::Dependency);
        assert!(!registry.is_fully_loaded());
        registry.load_all(&loader).unwrap();
        assert_eq!(loader.attempts("/srv/calc.so"), 1);
        assert_eq!(loader.attempts("/srv/late.so"), 1);
    }

    #[test]
    fn test_merge_is_unloaded_path_union() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", handler());
        loader.register_library("/srv/common.so");

        let mut parent = LibraryRegistry::new();
        parent.add("/srv/common.so", LibraryRole::Dependency);
        parent.add("/srv/calc.so", LibraryRole::Primary);
        parent.load_all(&loader).unwrap();

        let mut child = LibraryRegistry::new();
        child.add("/srv/common.so", LibraryRole::Dependency);
        child.add("/srv/extra.so", LibraryRole::Dependency);

        let merged = merge_registries(&parent, &child);
        assert_eq!(
            merged.paths(),
            vec!["/srv/common.so", "/srv/calc.so", "/srv/extra.so"]
        );
        assert!(merged.iter().all(|lib| !lib.is_loaded()));
        assert!(!merged.is_fully_loaded());
        assert_eq!(merged.primary().unwrap().path(), "/srv/calc.so");

        // Inputs untouched
        assert!(parent.is_fully_loaded());
        assert_eq!(child.len(), 2);
    }
}
