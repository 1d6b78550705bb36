use crate::core::{error::LoadError, interface::HandlerInterface};

/// Name of the symbol every primary handler library must export.
pub const ENTRY_POINT: &str = "modbridge_handler_interface";

/// Loader defines the port (interface) for bringing handler libraries into the process
///
/// The registry only ever talks to this trait, so tests and embedders can
/// substitute their own implementation for the native dynamic loader.
pub trait Loader: Send + Sync + 'static {
    /// Open the library at `path`
    ///
    /// # Arguments
    /// * `path` - The path the library was declared with
    ///
    /// # Returns
    /// An owned handle, or the reason the library could not be opened
    fn open(&self, path: &str) -> Result<Box<dyn LoadedLibrary>, LoadError>;
}

/// An open library handle, exclusively owned by one descriptor.
pub trait LoadedLibrary: Send {
    /// Resolve [`ENTRY_POINT`] and let it fill in a capability table.
    ///
    /// Returns `None` when the library does not export the entry point.
    fn handler_interface(&self) -> Option<HandlerInterface>;

    /// Release the handle.
    fn close(self: Box<Self>) -> Result<(), LoadError>;
}
