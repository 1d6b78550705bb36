use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request},
    middleware,
    response::Response,
    routing::{MethodRouter, any},
};
use tower_http::trace::TraceLayer;

use crate::adapters::{
    HttpHandler,
    middleware::{request_id_middleware, request_timing_middleware},
};

fn request_route(handler: Arc<HttpHandler>) -> MethodRouter {
    any(move |req: Request| {
        let handler = handler.clone();
        async move {
            // Absent when the router is driven without a connection, as in tests
            let client_addr = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr);
            match handler.handle_request(req, client_addr).await {
                Ok(response) => Ok::<Response<Body>, Infallible>(response),
                Err(e) => {
                    tracing::error!("Request handling error: {:?}", e);
                    let error_response = Response::builder()
                        .status(500)
                        .body(Body::from("Internal Server Error"))
                        .unwrap_or_else(|_| Response::new(Body::from("Internal Server Error")));
                    Ok(error_response)
                }
            }
        }
    })
}

/// Every path and method goes to the handler; location matching happens there.
pub fn build_router(handler: Arc<HttpHandler>) -> Router {
    Router::new()
        .route("/{*path}", request_route(handler.clone()))
        .route("/", request_route(handler))
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
