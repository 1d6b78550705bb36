//! Axum middleware attached to every route.
//!
//! Handler libraries produce their own responses; these layers only add
//! request correlation and access logging around them.
use std::time::Instant;

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;

use crate::tracing_setup::create_request_span;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log start/end of a request including latency.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::debug!("Started processing {} {} {:?}", method, uri, version);

    let response = next.run(req).await;
    let duration = start.elapsed();

    tracing::info!(
        "Completed {} {} {:?} - {} in {:?}",
        method,
        uri,
        version,
        response.status(),
        duration
    );

    response
}

/// Run the request inside a span carrying a request ID, and echo that ID in
/// `X-Request-ID`. A client-supplied ID is kept.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = create_request_span(req.method().as_str(), req.uri().path(), &request_id);
    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    span.record("http.status_code", response.status().as_u16());
    span.record("duration_ms", start.elapsed().as_millis() as u64);

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, StatusCode},
        middleware,
        routing::get,
    };
    use tower::ServiceExt; // for oneshot

    use super::*;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|| async {
                    axum::response::Response::builder()
                        .status(StatusCode::OK)
                        .body(Body::empty())
                        .unwrap()
                }),
            )
            .layer(middleware::from_fn(request_timing_middleware))
            .layer(middleware::from_fn(request_id_middleware))
    }

    #[tokio::test]
    async fn test_request_id_middleware() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();

        assert!(headers.contains_key("X-Request-ID"));

        // Verify it's a valid UUID
        let request_id = headers.get("X-Request-ID").unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());
    }

    #[tokio::test]
    async fn test_client_request_id_is_kept() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("X-Request-ID", "trace-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("X-Request-ID").unwrap(),
            HeaderValue::from_static("trace-42")
        );
    }
}
