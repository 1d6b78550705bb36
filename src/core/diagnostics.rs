//! Operator-facing diagnostic pages.
//!
//! Every problem the dispatcher can hit short of a transport failure ends up
//! here: the message is logged and rendered as a small HTML page that echoes
//! the inbound request headers.
use std::fmt::Write;

use hyper::StatusCode;

use crate::core::request::{HostRequest, HostResponse};

pub const DIAGNOSTIC_CONTENT_TYPE: &str = "text/html; charset=utf-8";

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Render the diagnostic page for `request`.
pub fn render_diagnostic(request: &HostRequest, message: &str) -> String {
    let mut page = String::new();
    let _ = write!(
        page,
        "<html><head><title>Handler error</title></head><body>\
         <h1>Handler error</h1><p>{}</p>\
         <h2>Request</h2><p>{} {}</p>\
         <h2>Request headers</h2><table>",
        escape_html(message),
        escape_html(request.method.as_str()),
        escape_html(&request.unparsed_uri),
    );
    for (name, value) in request.headers.iter() {
        let _ = write!(
            page,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(name.as_str()),
            escape_html(&String::from_utf8_lossy(value.as_bytes())),
        );
    }
    page.push_str("</table></body></html>");
    page
}

/// Log `message` and build a diagnostic response with `status`.
pub fn diagnostic_response(
    request: &HostRequest,
    status: StatusCode,
    message: &str,
) -> HostResponse {
    tracing::error!("{} {}: {}", request.method, request.unparsed_uri, message);

    let body = if request.header_only {
        Vec::new()
    } else {
        render_diagnostic(request, message).into_bytes()
    };
    HostResponse {
        status,
        content_type: Some(DIAGNOSTIC_CONTENT_TYPE.to_string()),
        body,
        ..HostResponse::default()
    }
}
