// End-to-end dispatch through the public API, without an HTTP server
#[cfg(test)]
mod test {
    use std::{
        io::{self, Cursor},
        sync::{Arc, Mutex},
    };

    use http::{Method, StatusCode};
    use modbridge::{
        InProcessLoader,
        core::{
            ConfigurationScope, DeclineReason, DispatchOutcome, Dispatcher, HandlerInterface,
            HostRequest, HostResponse, LibraryRole, Outcome, ScopeType,
            descriptor::DESCRIPTOR_CONTENT_TYPE, error::DispatchError,
        },
    };
    use tempfile::TempDir;

    fn scope_for(primary: &str) -> ConfigurationScope {
        let mut scope = ConfigurationScope::new(ScopeType::Directory);
        scope.add_library(primary, LibraryRole::Primary);
        scope
    }

    fn dispatcher(loader: InProcessLoader) -> Dispatcher {
        Dispatcher::new(Arc::new(loader), 4096)
    }

    fn complete(interface: HandlerInterface) -> HandlerInterface {
        interface
            .with_init(|_, _| {})
            .with_end(|_, _| {})
            .with_done(|_, _| {})
    }

    fn handled(result: Result<DispatchOutcome, DispatchError>) -> HostResponse {
        match result.unwrap() {
            DispatchOutcome::Handled(response) => response,
            DispatchOutcome::Declined(reason) => panic!("declined: {reason:?}"),
        }
    }

    #[test]
    fn test_post_round_trip_with_headers_and_status() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_handler = seen.clone();

        let loader = InProcessLoader::new();
        loader.register_handler(
            "/srv/calc.so",
            complete(
                HandlerInterface::new()
                    .with_parse_header(move |_, name, value| {
                        seen_by_handler
                            .lock()
                            .unwrap()
                            .push(format!("{name}={value}"));
                    })
                    .with_serve(|ctx, _| {
                        let mut request = Vec::new();
                        let mut buf = [0u8; 4];
                        while let Ok(n @ 1..) = ctx.read(&mut buf) {
                            request.extend_from_slice(&buf[..n]);
                        }
                        let reply = format!("<sum>{}</sum>", request.len());
                        ctx.post_header("Status: 201 Created", None);
                        ctx.post_header("Content-Type", Some("text/xml; charset=utf-8"));
                        ctx.post_header("SOAPAction", Some("\"addResponse\""));
                        ctx.post_header("X-Calc", Some("dropped"));
                        ctx.write(reply.as_bytes()).unwrap();
                        // Too late: the body has started
                        ctx.post_header("WWW-Authenticate", Some("Basic"));
                        Outcome::Ok
                    }),
            ),
        );

        let body = "<add><a>1</a><b>2</b></add>";
        let request = HostRequest::new(Method::POST, "/soap/calc")
            .with_handler("soap-handler")
            .with_header("SOAPAction", "\"add\"")
            .with_header("Cookie", "secret")
            .with_body_length(body.len() as u64);

        let response = handled(dispatcher(loader).dispatch(
            &request,
            Box::new(Cursor::new(body.as_bytes())),
            &scope_for("/srv/calc.so"),
        ));

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.content_type.as_deref(), Some("text/xml; charset=utf-8"));
        assert_eq!(response.headers["soapaction"], "\"addResponse\"");
        assert!(!response.headers.contains_key("x-calc"));
        assert!(!response.headers.contains_key("www-authenticate"));
        assert_eq!(response.body, format!("<sum>{}</sum>", body.len()).as_bytes());
        assert_eq!(*seen.lock().unwrap(), vec!["SOAPAction=\"add\"".to_string()]);
    }

    #[test]
    fn test_descriptor_is_served_next_to_the_primary_library() {
        let temp_dir = TempDir::new().unwrap();
        let primary = temp_dir.path().join("calc.so");
        std::fs::write(temp_dir.path().join("calc.wsdl"), "<definitions/>").unwrap();
        let primary = primary.to_str().unwrap();

        let loader = InProcessLoader::new();
        loader.register_handler(primary, complete(HandlerInterface::new()));
        let dispatcher = dispatcher(loader);
        let scope = scope_for(primary);

        let request = HostRequest::new(Method::GET, "/soap/calc?wsdl").with_handler("soap");
        let response = handled(dispatcher.dispatch(&request, Box::new(io::empty()), &scope));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type.as_deref(), Some(DESCRIPTOR_CONTENT_TYPE));
        assert_eq!(response.body, b"<definitions/>");

        let request = HostRequest::new(Method::GET, "/soap/calc?xsd").with_handler("soap");
        let response = handled(dispatcher.dispatch(&request, Box::new(io::empty()), &scope));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_missing_library_renders_a_diagnostic_page() {
        let request = HostRequest::new(Method::POST, "/soap/calc")
            .with_handler("soap")
            .with_header("User-Agent", "<script>")
            .with_body_length(3);

        let response = handled(dispatcher(InProcessLoader::new()).dispatch(
            &request,
            Box::new(Cursor::new(b"abc".to_vec())),
            &scope_for("/srv/missing.so"),
        ));

        assert_eq!(response.status, StatusCode::OK);
        let page = String::from_utf8(response.body).unwrap();
        assert!(page.contains("/srv/missing.so"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_handler_state_survives_into_teardown() {
        let loader = InProcessLoader::new();
        loader.register_handler(
            "/srv/state.so",
            HandlerInterface::new()
                .with_init(|ctx, _| ctx.set_handler_state(Box::new(String::from("opened"))))
                .with_put(|ctx| {
                    if let Some(mut state) = ctx.take_handler_state::<String>() {
                        state.push_str(",put");
                        ctx.set_handler_state(state);
                    }
                    Outcome::Ok
                })
                .with_destroy(|ctx, _| {
                    let state = ctx.take_handler_state::<String>().unwrap_or_default();
                    ctx.write(state.as_bytes()).unwrap();
                })
                .with_end(|_, _| {})
                .with_done(|_, _| {}),
        );

        let request = HostRequest::new(Method::PUT, "/soap/item")
            .with_handler("soap")
            .with_chunked_body();
        let response = handled(dispatcher(loader).dispatch(
            &request,
            Box::new(Cursor::new(b"x".to_vec())),
            &scope_for("/srv/state.so"),
        ));
        assert_eq!(response.body, b"opened,put");
    }

    #[test]
    fn test_method_without_operation_is_declined() {
        let loader = InProcessLoader::new();
        loader.register_handler("/srv/calc.so", complete(HandlerInterface::new()));

        let request = HostRequest::new(Method::PATCH, "/soap/item")
            .with_handler("soap")
            .with_body_length(1);
        let outcome = dispatcher(loader)
            .dispatch(
                &request,
                Box::new(Cursor::new(b"x".to_vec())),
                &scope_for("/srv/calc.so"),
            )
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Declined(DeclineReason::UnsupportedMethod)
        ));
    }
}
