//! Per-request state handed to handler operations.
//!
//! A [`RequestContext`] is exclusively owned by one in-flight request. It
//! bridges the host's blocking body stream, the response being built and the
//! header tables to the callbacks a handler uses: read, write and post-header.
use std::{
    any::Any,
    io::{self, Read},
    sync::Arc,
};

use hyper::StatusCode;

use crate::core::{
    error::TransportError,
    interface::{HandlerInterface, Namespace},
    request::{HostRequest, HostResponse},
    transport::{
        MAX_FIELD_LEN, ResponseHeader, bounded, classify_response_header, effective_read_len,
        forwarded_to_handler, parse_client_address, split_header_line, status_from_header,
        synthesize_endpoint,
    },
};

/// Request metadata in the shape a handler sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportInfo {
    /// Path below the location prefix, with `?query` when present
    pub path: String,
    pub host: String,
    /// Packed IPv4 client address
    pub ip: u32,
    /// IPv6 client address as four network-order words
    pub ip6: [u32; 4],
    pub endpoint: String,
}

pub struct RequestContext<'r> {
    request: &'r HostRequest,
    body: Box<dyn Read + 'r>,
    /// Declared request bytes not yet read
    remaining: Option<u64>,
    response: HostResponse,
    headers_sent: bool,
    headers_received: bool,
    interface: Arc<HandlerInterface>,
    transport: TransportInfo,
    namespaces: Vec<Namespace>,
    handler_state: Option<Box<dyn Any>>,
    max_response_bytes: u64,
    transport_error: Option<TransportError>,
}

impl<'r> RequestContext<'r> {
    pub fn new(
        request: &'r HostRequest,
        body: Box<dyn Read + 'r>,
        interface: Arc<HandlerInterface>,
        max_response_bytes: u64,
    ) -> Self {
        Self {
            request,
            body,
            remaining: request.content_length,
            response: HostResponse::default(),
            headers_sent: false,
            headers_received: false,
            interface,
            transport: TransportInfo::default(),
            namespaces: Vec::new(),
            handler_state: None,
            max_response_bytes,
            transport_error: None,
        }
    }

    pub fn request(&self) -> &'r HostRequest {
        self.request
    }

    pub fn interface(&self) -> Arc<HandlerInterface> {
        self.interface.clone()
    }

    pub fn transport(&self) -> &TransportInfo {
        &self.transport
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn headers_received(&self) -> bool {
        self.headers_received
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = status;
    }

    pub fn response(&self) -> &HostResponse {
        &self.response
    }

    /// Take the adapter's per-request state out of the context.
    pub fn take_handler_state<T: Any>(&mut self) -> Option<Box<T>> {
        self.handler_state.take()?.downcast().ok()
    }

    pub fn set_handler_state(&mut self, state: Box<dyn Any>) {
        self.handler_state = Some(state);
    }

    /// Read request body bytes into `buf`. `Ok(0)` is end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = effective_read_len(buf.len(), self.remaining, self.request.chunked);
        if len == 0 {
            return Ok(0);
        }
        let read = self.body.read(&mut buf[..len])?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(read as u64);
        }
        Ok(read)
    }

    /// Append `data` to the response body. Fails unless every byte fits.
    ///
    /// The room left is bounded by the declared Content-Length, if any, and
    /// by the response ceiling. The first write marks the headers as sent.
    pub fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.headers_sent = true;

        let used = self.response.body.len() as u64;
        let mut room = self.max_response_bytes.saturating_sub(used);
        if let Some(declared) = self.response.content_length {
            room = room.min(declared.saturating_sub(used));
        }
        let written = usize::try_from(room).map_or(data.len(), |room| data.len().min(room));
        self.response.body.extend_from_slice(&data[..written]);

        if written < data.len() {
            let error = TransportError::PartialWrite {
                written,
                requested: data.len(),
            };
            tracing::warn!("Response write truncated: {}", error);
            self.transport_error.get_or_insert(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Apply a header posted by the handler to the response.
    ///
    /// With `value` absent, `key` is taken to be a whole `Name: value` line.
    pub fn post_header(&mut self, key: &str, value: Option<&str>) {
        let (name, value) = match value {
            Some(value) => (key.trim(), value.trim()),
            None => split_header_line(key),
        };

        if self.headers_sent {
            tracing::warn!("Ignoring header {} posted after the response body started", name);
            return;
        }
        self.headers_received = true;

        match classify_response_header(name) {
            ResponseHeader::Propagate(header_name) => match value.parse() {
                Ok(header_value) => {
                    self.response.headers.append(header_name, header_value);
                }
                Err(_) => tracing::warn!("Dropping invalid value for header {}", name),
            },
            ResponseHeader::ContentType => {
                self.response.content_type = Some(value.to_string());
            }
            ResponseHeader::ContentLength => match value.parse() {
                Ok(length) => self.response.content_length = Some(length),
                Err(_) => tracing::warn!("Dropping invalid Content-Length {:?}", value),
            },
            ResponseHeader::Status => {
                if let Some(status) =
                    status_from_header(value).and_then(|code| StatusCode::from_u16(code).ok())
                {
                    self.response.status = status;
                }
            }
            ResponseHeader::Ignored => {
                tracing::debug!("Handler posted unrecognized header {}", name);
            }
        }
    }

    /// Copy the handler's namespace table into the context.
    pub fn copy_namespaces(&mut self) {
        self.namespaces = self.interface.namespaces.clone();
    }

    /// Fill in path, host, client address and endpoint from the request.
    pub fn populate_transport(&mut self) {
        let request = self.request;

        let path = match request.args.as_deref() {
            Some(args) => format!("{}?{}", request.path_info, args),
            None => request.path_info.clone(),
        };
        let host = request.hostname.as_deref().unwrap_or_default();
        let (ip, ip6) = request
            .client_ip
            .as_deref()
            .map(parse_client_address)
            .unwrap_or_default();

        let host = bounded(host, MAX_FIELD_LEN).to_string();
        self.transport = TransportInfo {
            path: bounded(&path, MAX_FIELD_LEN).to_string(),
            endpoint: synthesize_endpoint(&host, &request.unparsed_uri),
            host,
            ip,
            ip6,
        };
    }

    /// Feed the allowed inbound headers to the handler's header parser.
    ///
    /// Returns the number of headers forwarded.
    pub fn forward_request_headers(&mut self) -> usize {
        let Some(parse_header) = self.interface.parse_header.clone() else {
            return 0;
        };

        let request = self.request;
        let mut forwarded = 0;
        for (name, value) in request.headers.iter() {
            if !forwarded_to_handler(name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                tracing::debug!("Skipping non-text header {}", name);
                continue;
            };
            parse_header(self, canonical_name(name.as_str()), value);
            forwarded += 1;
        }
        forwarded
    }

    /// The finished response, or the transport failure that aborted it.
    pub fn finish(self) -> Result<HostResponse, TransportError> {
        if let Some(error) = self.transport_error {
            return Err(error);
        }
        if let Some(declared) = self.response.content_length {
            let actual = self.response.body.len() as u64;
            if declared != actual {
                return Err(TransportError::BodySizeMismatch { declared, actual });
            }
        }
        Ok(self.response)
    }
}

/// Header names as handlers expect to see them.
fn canonical_name(name: &str) -> &str {
    crate::core::transport::FORWARDED_HEADERS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
        .copied()
        .unwrap_or(name)
}
