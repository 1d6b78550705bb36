//! The host's view of a request and of the response being produced for it.
use http::{HeaderMap, HeaderName, HeaderValue, Method, header, request::Parts};
use hyper::StatusCode;

/// Request metadata as the host sees it. The body is handed to the
/// dispatcher separately as a blocking reader.
#[derive(Debug, Clone)]
pub struct HostRequest {
    /// Request method; HEAD arrives as GET with `header_only` set
    pub method: Method,
    pub header_only: bool,
    /// Handler name assigned to the matched location
    pub handler: Option<String>,
    /// Request path below the matched location prefix
    pub path_info: String,
    /// Raw query string
    pub args: Option<String>,
    /// Original request target (path and query)
    pub unparsed_uri: String,
    pub hostname: Option<String>,
    pub client_ip: Option<String>,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

impl HostRequest {
    pub fn new(method: Method, unparsed_uri: impl Into<String>) -> Self {
        let unparsed_uri = unparsed_uri.into();
        let (path, args) = match unparsed_uri.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (unparsed_uri.clone(), None),
        };
        let header_only = method == Method::HEAD;
        Self {
            method: if header_only { Method::GET } else { method },
            header_only,
            handler: None,
            path_info: path,
            args,
            unparsed_uri,
            hostname: None,
            client_ip: None,
            headers: HeaderMap::new(),
            content_length: None,
            chunked: false,
        }
    }

    /// Build from the head of an HTTP request.
    ///
    /// `location_prefix` is stripped from the path to form `path_info`.
    pub fn from_parts(
        parts: &Parts,
        handler: Option<String>,
        location_prefix: &str,
        client_ip: Option<String>,
    ) -> Self {
        let unparsed_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        let mut request = Self::new(parts.method.clone(), unparsed_uri);
        let remainder = parts
            .uri
            .path()
            .strip_prefix(location_prefix)
            .unwrap_or(parts.uri.path());
        request.path_info = if remainder.is_empty() || remainder.starts_with('/') {
            remainder.to_string()
        } else {
            // A prefix ending in '/' took the separator with it
            format!("/{remainder}")
        };
        request.handler = handler;
        request.client_ip = client_ip;
        request.hostname = host_name(&parts.headers)
            .or_else(|| parts.uri.host().map(str::to_string));
        request.content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        request.chunked = parts
            .headers
            .get_all(header::TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.to_ascii_lowercase().contains("chunked"));
        request.headers = parts.headers.clone();
        request
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_chunked_body(mut self) -> Self {
        self.chunked = true;
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_hostname(mut self, host: impl Into<String>) -> Self {
        self.hostname = Some(host.into());
        self
    }

    /// Whether the client announced a request body.
    pub fn has_body(&self) -> bool {
        self.chunked || self.content_length.is_some_and(|len| len > 0)
    }

    pub fn query(&self) -> Option<&str> {
        self.args.as_deref()
    }
}

/// Host name from the `Host` header with any port removed.
pub fn host_name(headers: &HeaderMap) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let name = if host.starts_with('[') {
        // [v6]:port
        host.split_once(']').map(|(addr, _)| format!("{addr}]"))?
    } else {
        host.split(':').next().unwrap_or(host).to_string()
    };
    (!name.is_empty()).then_some(name)
}

/// The response the host will send once the handler is done.
#[derive(Debug, Clone)]
pub struct HostResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    /// Length declared through the handler's Content-Length header
    pub content_length: Option<u64>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Default for HostResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: None,
            content_length: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}
