use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// The filter logging starts with: a non-empty `RUST_LOG` directive when one
/// is given, otherwise the configured `level`.
pub fn build_env_filter(rust_log: Option<&str>, level: &str) -> Result<EnvFilter> {
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directive) => EnvFilter::try_new(directive)
            .wrap_err_with(|| format!("Invalid RUST_LOG directive: {directive}")),
        None => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize tracing with custom configuration
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = build_env_filter(rust_log.as_deref(), level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .init();
    }

    tracing::info!(
        "modbridge logging initialized (level: {}, RUST_LOG: {:?}, json: {}, spans: {})",
        level,
        rust_log,
        json_format,
        include_spans
    );
    Ok(())
}

/// Shutdown tracing gracefully
pub fn shutdown_tracing() {
    // tracing-subscriber has no explicit shutdown; the fmt layer writes synchronously
    tracing::info!("modbridge tracing shutdown complete");
}

/// Configure tracing for specific service components
pub fn configure_component_tracing(component: &str) -> tracing::Span {
    tracing::info_span!("component", name = component)
}

/// Create a request-scoped tracing span
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create the span a handler invocation runs under
pub fn create_dispatch_span(method: &str, path: &str, handler: &str) -> tracing::Span {
    tracing::info_span!(
        "dispatch",
        http.method = method,
        http.path = path,
        handler.name = handler,
        http.status_code = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_with_config() {
        let result = init_tracing_with_config("debug", true, true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_rust_log_takes_precedence_over_level() {
        let filter = build_env_filter(Some("modbridge=trace"), "info").unwrap();
        assert_eq!(filter.to_string(), "modbridge=trace");

        let filter = build_env_filter(None, "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");

        // Blank RUST_LOG counts as unset
        let filter = build_env_filter(Some("  "), "warn").unwrap();
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_invalid_rust_log_is_an_error() {
        assert!(build_env_filter(Some("modbridge=notalevel"), "info").is_err());
    }

    #[test]
    fn test_create_request_span() {
        tracing::subscriber::with_default(Registry::default(), || {
            let span = create_request_span("GET", "/soap/calc", "req-123");
            assert_eq!(span.metadata().map(|m| m.name()), Some("request"));
        });
    }

    #[test]
    fn test_configure_component_tracing() {
        tracing::subscriber::with_default(Registry::default(), || {
            let span = configure_component_tracing("scope_tree");
            assert_eq!(span.metadata().map(|m| m.name()), Some("component"));
        });
    }

    #[test]
    fn test_create_dispatch_span() {
        tracing::subscriber::with_default(Registry::default(), || {
            let span = create_dispatch_span("POST", "/soap/calc", "soap-handler");
            assert_eq!(span.metadata().map(|m| m.name()), Some("dispatch"));
        });
    }
}
