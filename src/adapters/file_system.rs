use std::convert::TryFrom;

use axum::body::Body as AxumBody;
use eyre::WrapErr;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::ports::file_system::{FileSystem, FileSystemError};

/// Serves declined requests from a document root using tower-http ServeDir
#[derive(Debug, Default, Clone)]
pub struct FileSystemAdapter;

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        root: &str,
        path: &str,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, FileSystemError> {
        // ServeDir resolves the URI path against the root and rejects `..`
        let uri_string = format!("/{path}", path = path.trim_start_matches('/'));
        let uri = hyper::Uri::try_from(uri_string)
            .wrap_err("Failed to parse URI for file serving")
            .map_err(|e| FileSystemError::InvalidPath(e.to_string()))?;

        let (parts, body) = req.into_parts();
        let mut new_req = Request::from_parts(parts, body);
        *new_req.uri_mut() = uri;

        let serve_dir = ServeDir::new(root).append_index_html_on_directories(true);

        let response = serve_dir
            .oneshot(new_req)
            .await
            .wrap_err("ServeDir failed to serve file")
            .map_err(|e| {
                FileSystemError::IoError(std::io::Error::other(format!("ServeDir error: {e}")))
            })?;

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }
}
