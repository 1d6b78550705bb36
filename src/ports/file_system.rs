use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Error type for serving declined requests from disk
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when the request path cannot be mapped under the document root
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// FileSystem defines the port (interface) for serving requests the handler
/// libraries declined from a location's document root
pub trait FileSystem: Send + Sync + 'static {
    /// Serve `path` from `root`
    ///
    /// # Arguments
    /// * `root` - The document root of the matched location or server
    /// * `path` - The request path, relative to the root
    /// * `req` - The declined request, with its body already consumed
    ///
    /// # Returns
    /// A future that resolves to the file response or an error
    fn serve_file(
        &self,
        root: &str,
        path: &str,
        req: Request<AxumBody>,
    ) -> impl std::future::Future<Output = FileSystemResult<Response<AxumBody>>> + Send;
}
