//! A [`Loader`] whose "libraries" are handler tables registered in-process.
//!
//! Used to embed Rust handlers without building a shared object, and as the
//! deterministic loader in tests: opens can be made to fail, to depend on
//! other libraries being open first, and every attempt is counted.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    core::{error::LoadError, interface::HandlerInterface},
    ports::loader::{LoadedLibrary, Loader},
};

#[derive(Clone, Default)]
struct ModuleSpec {
    interface: Option<HandlerInterface>,
    requires: Vec<String>,
    open_failure: Option<String>,
    close_failure: Option<String>,
}

#[derive(Default)]
pub struct InProcessLoader {
    modules: Mutex<HashMap<String, ModuleSpec>>,
    attempts: Mutex<HashMap<String, usize>>,
    open: Arc<Mutex<HashSet<String>>>,
}

impl InProcessLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_module(&self, path: &str, f: impl FnOnce(&mut ModuleSpec)) -> &Self {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        f(modules.entry(path.to_string()).or_default());
        self
    }

    /// Register a library that exports the handler entry point.
    pub fn register_handler(&self, path: &str, interface: HandlerInterface) -> &Self {
        self.with_module(path, |spec| spec.interface = Some(interface))
    }

    /// Register a library without an entry point.
    pub fn register_library(&self, path: &str) -> &Self {
        self.with_module(path, |_| {})
    }

    /// Every open of `path` fails with `reason`.
    pub fn register_failing(&self, path: &str, reason: &str) -> &Self {
        self.with_module(path, |spec| spec.open_failure = Some(reason.to_string()))
    }

    /// Opening `path` fails until `dependency` is open.
    pub fn require(&self, path: &str, dependency: &str) -> &Self {
        self.with_module(path, |spec| spec.requires.push(dependency.to_string()))
    }

    /// Closing `path` reports `reason`.
    pub fn fail_close(&self, path: &str, reason: &str) -> &Self {
        self.with_module(path, |spec| spec.close_failure = Some(reason.to_string()))
    }

    /// Number of open attempts made for `path`.
    pub fn attempts(&self, path: &str) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }
}

impl Loader for InProcessLoader {
    fn open(&self, path: &str) -> Result<Box<dyn LoadedLibrary>, LoadError> {
        *self
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_string())
            .or_default() += 1;

        let spec = self
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| LoadError::Open {
                path: path.to_string(),
                reason: "cannot open shared object file: No such file or directory".to_string(),
            })?;

        if let Some(reason) = spec.open_failure {
            return Err(LoadError::Open {
                path: path.to_string(),
                reason,
            });
        }

        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(missing) = spec.requires.iter().find(|dep| !open.contains(*dep)) {
            return Err(LoadError::Open {
                path: path.to_string(),
                reason: format!("undefined symbol provided by {missing}"),
            });
        }
        open.insert(path.to_string());

        Ok(Box::new(InProcessLibrary {
            path: path.to_string(),
            interface: spec.interface,
            close_failure: spec.close_failure,
            open: self.open.clone(),
        }))
    }
}

struct InProcessLibrary {
    path: String,
    interface: Option<HandlerInterface>,
    close_failure: Option<String>,
    open: Arc<Mutex<HashSet<String>>>,
}

impl LoadedLibrary for InProcessLibrary {
    fn handler_interface(&self) -> Option<HandlerInterface> {
        self.interface.clone()
    }

    fn close(self: Box<Self>) -> Result<(), LoadError> {
        let this = *self;
        this.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&this.path);
        match this.close_failure {
            Some(reason) => Err(LoadError::Close {
                path: this.path,
                reason,
            }),
            None => Ok(()),
        }
    }
}
