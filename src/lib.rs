//! modbridge - an HTTP server that hands requests to handler libraries loaded
//! at runtime.
//!
//! A handler library exposes a capability table: per-request `init`, a
//! `serve` operation for POST, optional GET/PUT/PATCH/DELETE operations, and
//! teardown hooks. Libraries are declared per server, virtual host, or
//! location; nested declarations merge, and a scope's libraries are loaded
//! lazily on its first request. Supporting libraries that only provide
//! symbols are loaded alongside the primary one, in whatever order the
//! dynamic linker accepts.
//!
//! # Features
//! - Lazy, retrying library loading with a bounded number of rounds
//! - Location and virtual-host scoping with merge of library declarations
//! - A transport bridge giving handlers body reads, response writes and
//!   header posting, with a response-size ceiling
//! - A descriptor document served next to the primary library for `?wsdl`
//! - HTML diagnostic pages for load and configuration failures
//! - Declined requests fall back to a document root
//! - A C ABI so handlers can be written in any language that produces a
//!   shared library
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use modbridge::{
//!     FileSystemAdapter, HttpHandler, NativeLoader, build_router,
//!     core::{Dispatcher, ScopeTree},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = modbridge::config::loader::load_config("modbridge.yaml").await?;
//! let tree = Arc::new(ScopeTree::from_config(&cfg));
//! let dispatcher = Arc::new(Dispatcher::new(
//!     NativeLoader::global(),
//!     cfg.limits.max_response_bytes,
//! ));
//! let handler = HttpHandler::new(tree, dispatcher, Arc::new(FileSystemAdapter::new()));
//! let _app = build_router(Arc::new(handler));
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping scoping, loading and dispatch inside `core`. `core` is
//! synchronous; the HTTP adapter runs each dispatch on a blocking thread.
//!
//! # Error Handling
//! Library and transport failures use domain error types from
//! [`core::error`]. Binary and configuration paths return `eyre::Result<T>`
//! with context attached through `WrapErr`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{FileSystemAdapter, HttpHandler, InProcessLoader, NativeLoader, build_router},
    core::{Dispatcher, ScopeTree},
    utils::{GracefulShutdown, ShutdownReason},
};
