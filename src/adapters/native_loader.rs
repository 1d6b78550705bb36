//! [`Loader`] backed by the platform's dynamic linker.
//!
//! Libraries are opened with immediate binding and global symbol visibility,
//! so a library whose dependencies are not open yet fails to load and is
//! retried by the registry once they are.
use std::{any::Any, sync::Arc};

use once_cell::sync::Lazy;

use crate::{
    adapters::ffi::{EntryPointFn, RawHandlerTable, interface_from_table},
    core::{error::LoadError, interface::HandlerInterface},
    ports::loader::{ENTRY_POINT, LoadedLibrary, Loader},
};

static GLOBAL: Lazy<Arc<NativeLoader>> = Lazy::new(|| {
    tracing::debug!("Initialising native library loader");
    Arc::new(NativeLoader)
});

/// The process-wide native loader. Created on first use and never torn down.
#[derive(Debug, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn global() -> Arc<NativeLoader> {
        GLOBAL.clone()
    }
}

#[cfg(unix)]
fn open_library(path: &str) -> Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: running a handler library's initialisers is what loading it means
    unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Into::into)
}

#[cfg(not(unix))]
fn open_library(path: &str) -> Result<libloading::Library, libloading::Error> {
    // SAFETY: as above
    unsafe { libloading::Library::new(path) }
}

impl Loader for NativeLoader {
    fn open(&self, path: &str) -> Result<Box<dyn LoadedLibrary>, LoadError> {
        let library = open_library(path).map_err(|e| LoadError::Open {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Opened native library {}", path);
        Ok(Box::new(NativeLibrary {
            path: path.to_string(),
            library: Arc::new(library),
        }))
    }
}

struct NativeLibrary {
    path: String,
    /// Shared with every operation of the captured interface
    library: Arc<libloading::Library>,
}

impl LoadedLibrary for NativeLibrary {
    fn handler_interface(&self) -> Option<HandlerInterface> {
        // SAFETY: the entry point is declared with the `EntryPointFn` signature
        let entry = unsafe { self.library.get::<EntryPointFn>(ENTRY_POINT.as_bytes()) }.ok()?;

        let mut table = RawHandlerTable::default();
        // SAFETY: the table outlives the call and starts out empty
        let status = unsafe { entry(&mut table) };
        if status != 0 {
            tracing::error!(
                "{} in {} returned {}, ignoring its capability table",
                ENTRY_POINT,
                self.path,
                status
            );
            return None;
        }

        let keep_alive: Arc<dyn Any + Send + Sync> = self.library.clone();
        // SAFETY: the table points into the library, which `keep_alive` holds open
        Some(unsafe { interface_from_table(&table, keep_alive) })
    }

    fn close(self: Box<Self>) -> Result<(), LoadError> {
        let NativeLibrary { path, library } = *self;
        match Arc::try_unwrap(library) {
            Ok(library) => library.close().map_err(|e| LoadError::Close {
                path,
                reason: e.to_string(),
            }),
            Err(_) => {
                tracing::debug!(
                    "Library {} is still in use; it closes when the last request finishes",
                    path
                );
                Ok(())
            }
        }
    }
}
