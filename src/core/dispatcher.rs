//! Per-request orchestration: decline or load, build the context, invoke the
//! handler operation for the method, tear down, and map the result.
//!
//! Everything here is blocking. Callers on an async runtime run
//! [`Dispatcher::dispatch`] on a blocking thread.
use std::{io::Read, sync::Arc};

use http::Method;
use hyper::StatusCode;

use crate::{
    core::{
        context::RequestContext,
        descriptor::{DESCRIPTOR_CONTENT_TYPE, DESCRIPTOR_QUERY, descriptor_path, read_descriptor},
        diagnostics::diagnostic_response,
        error::{DescriptorError, DispatchError},
        interface::{HandlerInterface, MethodFn, Outcome},
        request::{HostRequest, HostResponse},
        scope::ConfigurationScope,
    },
    ports::loader::Loader,
};

/// Token the handler name assigned to a location must contain.
pub const HANDLER_MARKER: &str = "soap";

/// Whether a location's handler name assigns it to this module.
pub fn is_module_handler(handler: Option<&str>) -> bool {
    handler.is_some_and(|handler| handler.contains(HANDLER_MARKER))
}

/// Why a request was left to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    /// The location is not assigned to this module
    NotModuleHandler,
    /// The method is not served, or the handler has no operation for it
    UnsupportedMethod,
    /// The handler operation answered "not my method"
    NotHandled,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Declined(DeclineReason),
    Handled(HostResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HandlerMethod {
    fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET | Method::HEAD => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }

    fn expects_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// What routing decided, before teardown runs.
enum Step {
    Respond(Outcome),
    Decline(DeclineReason),
    Descriptor,
    Fail(StatusCode, String),
}

pub struct Dispatcher {
    loader: Arc<dyn Loader>,
    max_response_bytes: u64,
}

impl Dispatcher {
    pub fn new(loader: Arc<dyn Loader>, max_response_bytes: u64) -> Self {
        Self {
            loader,
            max_response_bytes,
        }
    }

    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// Serve `request` with the handler of `scope`.
    ///
    /// Load and configuration problems come back as diagnostic responses.
    /// Only a transport failure is an error.
    pub fn dispatch<'r>(
        &self,
        request: &'r HostRequest,
        body: Box<dyn Read + 'r>,
        scope: &ConfigurationScope,
    ) -> Result<DispatchOutcome, DispatchError> {
        if !is_module_handler(request.handler.as_deref()) {
            return Ok(DispatchOutcome::Declined(DeclineReason::NotModuleHandler));
        }
        let Some(method) = HandlerMethod::from_method(&request.method) else {
            tracing::debug!("Declining {} request", request.method);
            return Ok(DispatchOutcome::Declined(DeclineReason::UnsupportedMethod));
        };

        let handler = match scope.ensure_loaded(self.loader.as_ref()) {
            Ok(handler) => handler,
            Err(e) => return Ok(diagnostic(request, StatusCode::OK, &e.to_string())),
        };

        if request.header_only {
            return Ok(DispatchOutcome::Handled(HostResponse::default()));
        }

        if method.expects_body() && !request.has_body() {
            return Ok(diagnostic(
                request,
                StatusCode::OK,
                &format!("{} request without a request body", method.name()),
            ));
        }

        let interface = handler.interface.clone();
        let Some(init) = interface.init.clone() else {
            return Ok(diagnostic(
                request,
                StatusCode::OK,
                &format!(
                    "handler library {} does not provide an init operation",
                    handler.primary_path
                ),
            ));
        };

        let mut ctx =
            RequestContext::new(request, body, interface.clone(), self.max_response_bytes);
        init(&mut ctx, request);
        ctx.copy_namespaces();
        ctx.populate_transport();
        let forwarded = ctx.forward_request_headers();
        tracing::debug!(
            "Dispatching {} {} ({} headers forwarded)",
            method.name(),
            ctx.transport().path,
            forwarded
        );

        let step = route(method, &mut ctx, &interface, request);
        teardown(&mut ctx, request, &interface);

        match step {
            Step::Respond(outcome) => {
                if let Some(status) = outcome.status_override() {
                    ctx.set_status(status);
                }
                Ok(DispatchOutcome::Handled(ctx.finish()?))
            }
            Step::Decline(reason) => Ok(DispatchOutcome::Declined(reason)),
            Step::Descriptor => Ok(serve_descriptor(request, &handler.primary_path)),
            Step::Fail(status, message) => Ok(diagnostic(request, status, &message)),
        }
    }
}

fn diagnostic(request: &HostRequest, status: StatusCode, message: &str) -> DispatchOutcome {
    DispatchOutcome::Handled(diagnostic_response(request, status, message))
}

fn route(
    method: HandlerMethod,
    ctx: &mut RequestContext<'_>,
    interface: &HandlerInterface,
    request: &HostRequest,
) -> Step {
    let optional_op = |op: &Option<MethodFn>, ctx: &mut RequestContext<'_>| -> Step {
        let Some(op) = op else {
            return Step::Decline(DeclineReason::UnsupportedMethod);
        };
        match op(ctx) {
            Outcome::NotHandled => Step::Decline(DeclineReason::NotHandled),
            outcome if outcome.is_internal_failure() => Step::Fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to serve {} request", method.name()),
            ),
            outcome => Step::Respond(outcome),
        }
    };

    match method {
        HandlerMethod::Get => {
            let outcome = interface.get.as_ref().map_or(Outcome::NotHandled, |get| get(ctx));
            match outcome {
                Outcome::NotHandled => Step::Descriptor,
                outcome if outcome.is_internal_failure() => Step::Fail(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to serve GET request".to_string(),
                ),
                outcome => Step::Respond(outcome),
            }
        }
        HandlerMethod::Put => optional_op(&interface.put, ctx),
        HandlerMethod::Patch => optional_op(&interface.patch, ctx),
        HandlerMethod::Delete => optional_op(&interface.delete, ctx),
        HandlerMethod::Post => {
            let Some(serve) = &interface.serve else {
                return Step::Fail(
                    StatusCode::OK,
                    "handler library does not provide a serve operation".to_string(),
                );
            };
            let outcome = serve(ctx, request);
            if outcome == Outcome::NotHandled {
                tracing::warn!("Handler declined a POST request; POST is always served");
            }
            Step::Respond(outcome)
        }
    }
}

/// destroy, end, done: in that order, whichever exist.
fn teardown(ctx: &mut RequestContext<'_>, request: &HostRequest, interface: &HandlerInterface) {
    if let Some(destroy) = &interface.destroy {
        destroy(ctx, request);
    }
    match &interface.end {
        Some(end) => end(ctx, request),
        None => tracing::warn!("Handler library has no end operation"),
    }
    match &interface.done {
        Some(done) => done(ctx, request),
        None => tracing::warn!("Handler library has no done operation"),
    }
}

fn serve_descriptor(request: &HostRequest, primary_path: &str) -> DispatchOutcome {
    if request.query() != Some(DESCRIPTOR_QUERY) {
        return diagnostic(
            request,
            StatusCode::NOT_FOUND,
            "GET is only served for descriptor requests",
        );
    }

    let path = descriptor_path(primary_path);
    match read_descriptor(&path) {
        Ok(body) => {
            tracing::debug!("Serving descriptor {}", path.display());
            DispatchOutcome::Handled(HostResponse {
                content_type: Some(DESCRIPTOR_CONTENT_TYPE.to_string()),
                body,
                ..HostResponse::default()
            })
        }
        Err(e @ DescriptorError::NotFound { .. }) => {
            diagnostic(request, StatusCode::NOT_FOUND, &e.to_string())
        }
        Err(e) => diagnostic(request, StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor},
        sync::Mutex,
    };

    use super::*;
    use crate::{adapters::InProcessLoader, core::scope::ScopeType, core::library::LibraryRole};

    const PRIMARY: &str = "/srv/calc.so";

    fn setup(interface: HandlerInterface) -> (Dispatcher, ConfigurationScope) {
        setup_at(PRIMARY, interface)
    }

    fn setup_at(primary: &str, interface: HandlerInterface) -> (Dispatcher, ConfigurationScope) {
        let loader = InProcessLoader::new();
        loader.register_handler(primary, interface);
        let mut scope = ConfigurationScope::new(ScopeType::Directory);
        scope.add_library(primary, LibraryRole::Primary);
        (Dispatcher::new(Arc::new(loader), 1024 * 1024), scope)
    }

    fn base() -> HandlerInterface {
        HandlerInterface::new()
            .with_init(|_, _| {})
            .with_end(|_, _| {})
            .with_done(|_, _| {})
    }

    fn post(body: &str) -> HostRequest {
        HostRequest::new(Method::POST, "/soap/calc")
            .with_handler("soap")
            .with_body_length(body.len() as u64)
    }

    fn handled(outcome: DispatchOutcome) -> HostResponse {
        match outcome {
            DispatchOutcome::Handled(response) => response,
            DispatchOutcome::Declined(reason) => panic!("unexpectedly declined: {reason:?}"),
        }
    }

    fn run(
        dispatcher: &Dispatcher,
        scope: &ConfigurationScope,
        request: &HostRequest,
        body: &'static str,
    ) -> DispatchOutcome {
        dispatcher
            .dispatch(request, Box::new(Cursor::new(body.as_bytes())), scope)
            .unwrap()
    }

    #[test]
    fn test_declines_foreign_handler() {
        let (dispatcher, scope) = setup(base());
        let request = HostRequest::new(Method::GET, "/").with_handler("default-handler");
        assert!(matches!(
            run(&dispatcher, &scope, &request, ""),
            DispatchOutcome::Declined(DeclineReason::NotModuleHandler)
        ));

        let request = HostRequest::new(Method::GET, "/");
        assert!(matches!(
            run(&dispatcher, &scope, &request, ""),
            DispatchOutcome::Declined(DeclineReason::NotModuleHandler)
        ));
    }

    #[test]
    fn test_declines_unsupported_method() {
        let (dispatcher, scope) = setup(base());
        let request = HostRequest::new(Method::OPTIONS, "/soap").with_handler("soap");
        assert!(matches!(
            run(&dispatcher, &scope, &request, ""),
            DispatchOutcome::Declined(DeclineReason::UnsupportedMethod)
        ));
        // Nothing was loaded for a declined request
        assert!(scope.loaded().is_none());
    }

    #[test]
    fn test_load_failure_renders_diagnostic() {
        let dispatcher = Dispatcher::new(Arc::new(InProcessLoader::new()), 1024);
        let mut scope = ConfigurationScope::new(ScopeType::Directory);
        scope.add_library("/srv/missing.so", LibraryRole::Primary);

        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(response.status, StatusCode::OK);
        let page = String::from_utf8(response.body).unwrap();
        assert!(page.contains("/srv/missing.so"));
    }

    #[test]
    fn test_header_only_request_is_empty() {
        let (dispatcher, scope) = setup(base().with_get(|ctx| {
            ctx.write(b"body").unwrap();
            Outcome::Ok
        }));
        let request = HostRequest::new(Method::HEAD, "/soap").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.status, StatusCode::OK);
        assert!(response.body.is_empty());
        assert!(scope.loaded().is_some());
    }

    #[test]
    fn test_post_without_body() {
        let (dispatcher, scope) = setup(base().with_serve(|_, _| Outcome::Ok));
        let request = HostRequest::new(Method::POST, "/soap").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("without a request body")
        );
    }

    #[test]
    fn test_missing_init_is_a_configuration_error() {
        let (dispatcher, scope) = setup(HandlerInterface::new().with_serve(|_, _| Outcome::Ok));
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("does not provide an init operation")
        );
    }

    #[test]
    fn test_post_reads_body_and_writes_response() {
        let (dispatcher, scope) = setup(base().with_serve(|ctx, _| {
            let mut buf = [0u8; 150];
            let n = ctx.read(&mut buf).unwrap();
            let mut reply = b"echo:".to_vec();
            reply.extend_from_slice(&buf[..n]);
            ctx.post_header("Content-Type", Some("text/xml"));
            ctx.write(&reply).unwrap();
            Outcome::Ok
        }));

        let response = handled(run(&dispatcher, &scope, &post("<a/>"), "<a/>trailing"));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"echo:<a/>");
        assert_eq!(response.content_type.as_deref(), Some("text/xml"));
    }

    #[test]
    fn test_serve_result_maps_to_status() {
        let (dispatcher, scope) = setup(base().with_serve(|_, _| Outcome::Code(404)));
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let (dispatcher, scope) = setup(base().with_serve(|_, _| Outcome::Ok));
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(response.status, StatusCode::OK);
    }

    #[test]
    fn test_post_never_declines() {
        let (dispatcher, scope) = setup(base().with_serve(|_, _| Outcome::NotHandled));
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(response.status, StatusCode::OK);
    }

    #[test]
    fn test_missing_serve_is_a_configuration_error() {
        let (dispatcher, scope) = setup(base());
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("does not provide a serve operation")
        );
    }

    #[test]
    fn test_optional_method_ops() {
        let (dispatcher, scope) = setup(base().with_delete(|_| Outcome::NotHandled));

        let put = HostRequest::new(Method::PUT, "/soap")
            .with_handler("soap")
            .with_body_length(1);
        assert!(matches!(
            run(&dispatcher, &scope, &put, "x"),
            DispatchOutcome::Declined(DeclineReason::UnsupportedMethod)
        ));

        let delete = HostRequest::new(Method::DELETE, "/soap").with_handler("soap");
        assert!(matches!(
            run(&dispatcher, &scope, &delete, ""),
            DispatchOutcome::Declined(DeclineReason::NotHandled)
        ));
    }

    #[test]
    fn test_internal_failure_renders_diagnostic() {
        let (dispatcher, scope) = setup(base().with_patch(|_| Outcome::Code(3)));
        let patch = HostRequest::new(Method::PATCH, "/soap")
            .with_handler("soap")
            .with_chunked_body();
        let response = handled(run(&dispatcher, &scope, &patch, "x"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("failed to serve PATCH request")
        );
    }

    #[test]
    fn test_teardown_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let calls = calls.clone();
            move |_: &mut RequestContext<'_>, _: &HostRequest| calls.lock().unwrap().push(name)
        };
        let interface = HandlerInterface::new()
            .with_init(record("init"))
            .with_serve({
                let calls = calls.clone();
                move |_, _| {
                    calls.lock().unwrap().push("serve");
                    Outcome::Ok
                }
            })
            .with_destroy(record("destroy"))
            .with_end(record("end"))
            .with_done(record("done"));
        let (dispatcher, scope) = setup(interface);

        handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["init", "serve", "destroy", "end", "done"]
        );
    }

    #[test]
    fn test_missing_end_and_done_do_not_alter_response() {
        let (dispatcher, scope) = setup(
            HandlerInterface::new()
                .with_init(|_, _| {})
                .with_serve(|ctx, _| {
                    ctx.write(b"ok").unwrap();
                    Outcome::Ok
                }),
        );
        let response = handled(run(&dispatcher, &scope, &post("x"), "x"));
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn test_get_falls_back_to_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("lib.so");
        std::fs::write(dir.path().join("lib.wsdl"), "<definitions/>").unwrap();

        let (dispatcher, scope) = setup_at(primary.to_str().unwrap(), base());
        let request = HostRequest::new(Method::GET, "/soap?wsdl").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type.as_deref(), Some("text/xml"));
        assert_eq!(response.body, b"<definitions/>");
    }

    #[test]
    fn test_get_not_handled_falls_back_to_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("lib.so");
        std::fs::write(dir.path().join("lib.wsdl"), "<definitions/>").unwrap();

        let (dispatcher, scope) =
            setup_at(primary.to_str().unwrap(), base().with_get(|_| Outcome::NotHandled));
        let request = HostRequest::new(Method::GET, "/soap?wsdl").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.body, b"<definitions/>");
    }

    #[test]
    fn test_oversized_descriptor_fails_request() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("lib.so");
        let descriptor = std::fs::File::create(dir.path().join("lib.wsdl")).unwrap();
        descriptor.set_len(17 * 1024 * 1024).unwrap();

        let (dispatcher, scope) = setup_at(primary.to_str().unwrap(), base());
        let request = HostRequest::new(Method::GET, "/soap?wsdl").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("exceeding the")
        );
    }

    #[test]
    fn test_descriptor_missing_or_not_requested() {
        let (dispatcher, scope) = setup(base());

        let request = HostRequest::new(Method::GET, "/soap?wsdl").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let request = HostRequest::new(Method::GET, "/soap").with_handler("soap");
        let response = handled(run(&dispatcher, &scope, &request, ""));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_transport_failure_aborts() {
        let (dispatcher, scope) = setup(base().with_serve(|ctx, _| {
            ctx.post_header("Content-Length", Some("100"));
            let _ = ctx.write(b"short");
            Outcome::Ok
        }));
        let result = dispatcher.dispatch(&post("x"), Box::new(io::repeat(b'x')), &scope);
        assert!(matches!(result, Err(DispatchError::Transport(_))));
    }
}
