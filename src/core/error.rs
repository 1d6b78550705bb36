//! Error types shared by the registry, the transport bridge and the dispatcher.
use thiserror::Error;

/// Failures while bringing handler libraries in or out of the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LoadError {
    /// The loader could not open the library (missing file, unresolved symbols, ...)
    #[error("failed to load library {path}: {reason}")]
    Open { path: String, reason: String },

    /// The primary library loaded but does not export the handler entry point
    #[error("library {path} loaded, but the `{symbol}` entry point was not found")]
    MissingEntryPoint { path: String, symbol: String },

    /// The scope declares libraries but none of them is a primary handler library
    #[error("no primary handler library is configured for this scope")]
    NoPrimaryLibrary,

    /// Closing a library handle failed (the handle is dropped regardless)
    #[error("failed to unload library {path}: {reason}")]
    Close { path: String, reason: String },
}

/// Failures of the per-request transport bridge.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("partial write: {written} of {requested} bytes accepted")]
    PartialWrite { written: usize, requested: usize },

    #[error("response body is {actual} bytes but Content-Length declared {declared}")]
    BodySizeMismatch { declared: u64, actual: u64 },
}

/// Failures while serving the descriptor document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DescriptorError {
    #[error("descriptor {path} does not exist")]
    NotFound { path: String },

    #[error("descriptor {path} is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("error reading descriptor {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A request that could not be completed at all.
///
/// Load and configuration problems never surface here: they are rendered as
/// diagnostic pages. Only transport failures abort the response.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("dispatch worker failed: {0}")]
    Worker(String),
}
