//! Pure helpers behind the per-request transport bridge.
//!
//! These translate between what the host knows about a connection and the
//! fixed-size, C-friendly view a handler receives: packed client addresses,
//! the synthesized endpoint URL, bounded metadata strings and the header
//! allow-lists in both directions.
use std::net::Ipv6Addr;

use http::{HeaderName, header};

/// Longest path, host or endpoint string handed to a handler.
pub const MAX_FIELD_LEN: usize = 1024;

/// Inbound headers a handler's header parser is allowed to see.
pub const FORWARDED_HEADERS: [&str; 4] =
    ["SOAPAction", "Content-Type", "Content-Length", "Authorization"];

/// Whether an inbound header is passed on to the handler.
pub fn forwarded_to_handler(name: &str) -> bool {
    FORWARDED_HEADERS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

/// How a header posted by a handler affects the outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHeader {
    /// Copied verbatim into the outgoing header table
    Propagate(HeaderName),
    ContentType,
    ContentLength,
    /// The `Status` pseudo-header
    Status,
    Ignored,
}

/// Classify a header name posted by a handler, case-insensitively.
pub fn classify_response_header(name: &str) -> ResponseHeader {
    let name = name.trim();
    if name.eq_ignore_ascii_case("SOAPAction") {
        ResponseHeader::Propagate(HeaderName::from_static("soapaction"))
    } else if name.eq_ignore_ascii_case("WWW-Authenticate") {
        ResponseHeader::Propagate(header::WWW_AUTHENTICATE)
    } else if name.eq_ignore_ascii_case("Content-Type") {
        ResponseHeader::ContentType
    } else if name.eq_ignore_ascii_case("Content-Length") {
        ResponseHeader::ContentLength
    } else if name.eq_ignore_ascii_case("Status") {
        ResponseHeader::Status
    } else {
        ResponseHeader::Ignored
    }
}

/// Split a header posted as one line (`"Status: 404 Not Found"`) into name
/// and value. A line without a colon is all name.
pub fn split_header_line(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (line.trim(), ""),
    }
}

/// C `atoi` semantics: optional leading whitespace and sign, then digits up
/// to the first non-digit. Anything unparseable is 0.
pub fn atoi(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value.saturating_mul(10).saturating_add(i64::from(byte - b'0'));
    }
    if negative { -value } else { value }
}

/// The status a `Status` pseudo-header asks for, if it may override the
/// response status (only values above 200 do).
pub fn status_from_header(value: &str) -> Option<u16> {
    let code = atoi(value);
    if code > 200 {
        u16::try_from(code).ok()
    } else {
        None
    }
}

/// Pack a textual client address.
///
/// Dotted input is read as up to four decimal fields, each shifted into the
/// IPv4 field, so `"10.1"` packs to `0x0A01`. A field that does not start
/// with a digit contributes zero and stops the scan from advancing. Anything
/// else is parsed as IPv6 into four network-order words. Unparseable input
/// leaves both fields zero.
pub fn parse_client_address(address: &str) -> (u32, [u32; 4]) {
    let mut ip = 0u32;
    let mut ip6 = [0u32; 4];

    if address.contains('.') {
        let mut rest = address;
        for _ in 0..4 {
            if rest.is_empty() {
                break;
            }
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            let field = rest[..digits].bytes().fold(0u32, |acc, b| {
                acc.wrapping_mul(10).wrapping_add(u32::from(b - b'0'))
            });
            ip = (ip << 8).wrapping_add(field);
            rest = &rest[digits..];
            if let Some(after) = rest.strip_prefix('.') {
                rest = after;
            }
        }
    } else if let Ok(addr) = address.parse::<Ipv6Addr>() {
        for (word, chunk) in ip6.iter_mut().zip(addr.octets().chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
    }

    (ip, ip6)
}

/// Truncate `value` to at most `limit` bytes on a character boundary.
pub fn bounded(value: &str, limit: usize) -> &str {
    if value.len() <= limit {
        return value;
    }
    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// `http://<host><target>` for the handler's notion of its own endpoint.
pub fn synthesize_endpoint(host: &str, target: &str) -> String {
    let mut endpoint = String::with_capacity(8 + host.len() + target.len());
    endpoint.push_str("http://");
    endpoint.push_str(host);
    endpoint.push_str(target);
    endpoint
}

/// How many bytes a read may ask the body for.
///
/// A declared, non-chunked length caps the read at what is left of it so a
/// handler asking for more never blocks past the end of the body. Chunked
/// bodies pass the request through. Without either there is no body.
pub fn effective_read_len(requested: usize, remaining: Option<u64>, chunked: bool) -> usize {
    if chunked {
        return requested;
    }
    match remaining {
        Some(left) => usize::try_from(left).map_or(requested, |left| requested.min(left)),
        None => 0,
    }
}
