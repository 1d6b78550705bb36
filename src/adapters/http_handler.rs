use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    http::{StatusCode, header},
};
use eyre::{Result, WrapErr};
use futures_util::TryStreamExt;
use http::HeaderValue;
use hyper::{Request, Response};
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::{
    adapters::FileSystemAdapter,
    core::{
        DeclineReason, DispatchOutcome, Dispatcher, HostRequest, HostResponse, ResolvedLocation,
        ScopeTree, dispatcher::is_module_handler, error::DispatchError, request::host_name,
    },
    ports::file_system::FileSystem,
    tracing_setup::create_dispatch_span,
};

/// HTTP front end: resolves the location, hands the request to the
/// dispatcher and turns declined requests back into host behaviour.
pub struct HttpHandler {
    tree: Arc<ScopeTree>,
    dispatcher: Arc<Dispatcher>,
    file_system: Arc<FileSystemAdapter>,
}

impl HttpHandler {
    pub fn new(
        tree: Arc<ScopeTree>,
        dispatcher: Arc<Dispatcher>,
        file_system: Arc<FileSystemAdapter>,
    ) -> Self {
        Self {
            tree,
            dispatcher,
            file_system,
        }
    }

    pub fn scope_tree(&self) -> &Arc<ScopeTree> {
        &self.tree
    }

    /// Main request handler
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let (parts, body) = req.into_parts();
        let host = host_name(&parts.headers);
        let location = self.tree.find_location(host.as_deref(), parts.uri.path());

        tracing::debug!(
            "{} {} matched location '{}' (handler {:?})",
            parts.method,
            parts.uri,
            location.prefix,
            location.handler
        );

        let request = HostRequest::from_parts(
            &parts,
            location.handler.clone(),
            &location.prefix,
            client_addr.map(|addr| addr.ip().to_canonical().to_string()),
        );

        let outcome = if is_module_handler(request.handler.as_deref()) {
            self.dispatch(request, body, &location).await
        } else {
            Ok(DispatchOutcome::Declined(DeclineReason::NotModuleHandler))
        };

        match outcome {
            Ok(DispatchOutcome::Handled(response)) => {
                into_http_response(response, parts.method == http::Method::HEAD)
            }
            Ok(DispatchOutcome::Declined(reason)) => {
                let req = Request::from_parts(parts, AxumBody::empty());
                self.handle_declined(req, reason, &location).await
            }
            Err(e) => {
                tracing::error!("Failed to dispatch {} {}: {}", parts.method, parts.uri, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Run the dispatcher on a blocking thread, with the request body bridged
    /// into a synchronous reader.
    async fn dispatch(
        &self,
        request: HostRequest,
        body: AxumBody,
        location: &ResolvedLocation,
    ) -> Result<DispatchOutcome, DispatchError> {
        let stream = body.into_data_stream().map_err(io::Error::other);
        // Must be created on the runtime; reads block on it from the worker thread
        let reader = SyncIoBridge::new(StreamReader::new(stream));

        let dispatcher = self.dispatcher.clone();
        let scope = location.scope.clone();
        let span = create_dispatch_span(
            request.method.as_str(),
            &request.unparsed_uri,
            request.handler.as_deref().unwrap_or_default(),
        );

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let result = dispatcher.dispatch(&request, Box::new(reader), &scope);
            match &result {
                Ok(DispatchOutcome::Handled(response)) => {
                    span.record("http.status_code", response.status.as_u16());
                    span.record("outcome", "handled");
                }
                Ok(DispatchOutcome::Declined(_)) => {
                    span.record("outcome", "declined");
                }
                Err(_) => {
                    span.record("outcome", "failed");
                }
            }
            result
        })
        .await
        .map_err(|e| DispatchError::Worker(e.to_string()))?
    }

    /// What the host does with a request nobody served: the document root if
    /// there is one, otherwise an error status.
    async fn handle_declined(
        &self,
        req: Request<AxumBody>,
        reason: DeclineReason,
        location: &ResolvedLocation,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        if let Some(root) = &location.document_root {
            let path = req.uri().path().to_string();
            if path.split('/').any(|segment| segment == "..") {
                return status_response(StatusCode::BAD_REQUEST);
            }
            return match self.file_system.serve_file(root, &path, req).await {
                Ok(response) => Ok(response),
                Err(e) => {
                    tracing::warn!("Failed to serve {} from {}: {}", path, root, e);
                    status_response(StatusCode::NOT_FOUND)
                }
            };
        }

        let status = match reason {
            DeclineReason::UnsupportedMethod => StatusCode::METHOD_NOT_ALLOWED,
            DeclineReason::NotModuleHandler | DeclineReason::NotHandled => StatusCode::NOT_FOUND,
        };
        tracing::debug!("Declined {} ({:?}), answering {}", req.uri(), reason, status);
        status_response(status)
    }
}

impl Clone for HttpHandler {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            dispatcher: self.dispatcher.clone(),
            file_system: self.file_system.clone(),
        }
    }
}

fn status_response(status: StatusCode) -> Result<Response<AxumBody>, eyre::Error> {
    Response::builder()
        .status(status)
        .body(AxumBody::empty())
        .wrap_err("Failed to build error response")
}

fn into_http_response(
    response: HostResponse,
    header_only: bool,
) -> Result<Response<AxumBody>, eyre::Error> {
    let HostResponse {
        status,
        content_type,
        content_length,
        headers,
        body,
    } = response;

    let mut builder = Response::builder().status(status);
    if let Some(map) = builder.headers_mut() {
        map.extend(headers);
        if let Some(content_type) = content_type.as_deref() {
            match HeaderValue::from_str(content_type) {
                Ok(value) => {
                    map.insert(header::CONTENT_TYPE, value);
                }
                Err(_) => tracing::warn!("Dropping invalid content type {:?}", content_type),
            }
        }
        let length = content_length.unwrap_or(body.len() as u64);
        map.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    let body = if header_only {
        AxumBody::empty()
    } else {
        AxumBody::from(body)
    };
    builder.body(body).wrap_err("Failed to build handler response")
}
