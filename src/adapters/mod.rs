pub mod ffi;
pub mod file_system;
pub mod http_handler;
pub mod in_process_loader;
pub mod middleware;
pub mod native_loader;
pub mod router;

/// Re-export commonly used types from adapters
pub use file_system::FileSystemAdapter;
pub use http_handler::HttpHandler;
pub use in_process_loader::InProcessLoader;
pub use native_loader::NativeLoader;
pub use router::build_router;
