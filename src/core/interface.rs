//! The capability table a primary library hands back from its entry point.
//!
//! Every capability is optional. `None` means the library does not provide
//! the operation at all, which is different from a provided operation that
//! answers [`Outcome::NotHandled`] for a particular request.
use std::{fmt, sync::Arc};

use hyper::StatusCode;

use crate::core::{context::RequestContext, request::HostRequest};

/// Result code the native ABI uses for success.
pub const RESULT_OK: i32 = 0;
/// Result code the native ABI uses for "not my method".
pub const RESULT_NOT_HANDLED: i32 = -1;

/// What a handler operation reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    /// The operation exists but does not handle this request
    NotHandled,
    /// Any other result code: an application error or an HTTP status
    Code(i32),
}

impl Outcome {
    pub fn from_code(code: i32) -> Self {
        match code {
            RESULT_OK => Outcome::Ok,
            RESULT_NOT_HANDLED => Outcome::NotHandled,
            other => Outcome::Code(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Outcome::Ok => RESULT_OK,
            Outcome::NotHandled => RESULT_NOT_HANDLED,
            Outcome::Code(code) => code,
        }
    }

    /// The HTTP status this result forces onto the response, if any.
    ///
    /// Only codes in the application error band (203..1000) override the
    /// host's status; everything else leaves the default success in place.
    pub fn status_override(self) -> Option<StatusCode> {
        match self {
            Outcome::Code(code) if code > 202 && code < 1000 => {
                u16::try_from(code).ok().and_then(|c| StatusCode::from_u16(c).ok())
            }
            _ => None,
        }
    }

    /// Handler-internal failure codes (below the HTTP range).
    pub fn is_internal_failure(self) -> bool {
        matches!(self, Outcome::Code(code) if (1..100).contains(&code))
    }
}

/// One entry of the handler's protocol namespace table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
    /// Alternative URI pattern accepted when parsing
    pub pattern: Option<String>,
}

pub type InitFn = Arc<dyn Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync>;
pub type ServeFn = Arc<dyn Fn(&mut RequestContext<'_>, &HostRequest) -> Outcome + Send + Sync>;
pub type MethodFn = Arc<dyn Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync>;
pub type HeaderFn = Arc<dyn Fn(&mut RequestContext<'_>, &str, &str) + Send + Sync>;
pub type TeardownFn = Arc<dyn Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync>;

/// Immutable capability table, shared by all requests once a scope is loaded.
#[derive(Clone, Default)]
pub struct HandlerInterface {
    pub init: Option<InitFn>,
    pub serve: Option<ServeFn>,
    pub get: Option<MethodFn>,
    pub put: Option<MethodFn>,
    pub patch: Option<MethodFn>,
    pub delete: Option<MethodFn>,
    pub parse_header: Option<HeaderFn>,
    pub destroy: Option<TeardownFn>,
    pub end: Option<TeardownFn>,
    pub done: Option<TeardownFn>,
    pub namespaces: Vec<Namespace>,
}

impl HandlerInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(f));
        self
    }

    pub fn with_serve<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &HostRequest) -> Outcome + Send + Sync + 'static,
    {
        self.serve = Some(Arc::new(f));
        self
    }

    pub fn with_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(f));
        self
    }

    pub fn with_put<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.put = Some(Arc::new(f));
        self
    }

    pub fn with_patch<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.patch = Some(Arc::new(f));
        self
    }

    pub fn with_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync + 'static,
    {
        self.delete = Some(Arc::new(f));
        self
    }

    pub fn with_parse_header<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &str, &str) + Send + Sync + 'static,
    {
        self.parse_header = Some(Arc::new(f));
        self
    }

    pub fn with_destroy<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(f));
        self
    }

    pub fn with_end<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync + 'static,
    {
        self.end = Some(Arc::new(f));
        self
    }

    pub fn with_done<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync + 'static,
    {
        self.done = Some(Arc::new(f));
        self
    }

    pub fn with_namespace(
        mut self,
        prefix: impl Into<String>,
        uri: impl Into<String>,
        pattern: Option<String>,
    ) -> Self {
        self.namespaces.push(Namespace {
            prefix: prefix.into(),
            uri: uri.into(),
            pattern,
        });
        self
    }
}

impl fmt::Debug for HandlerInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInterface")
            .field("init", &self.init.is_some())
            .field("serve", &self.serve.is_some())
            .field("get", &self.get.is_some())
            .field("put", &self.put.is_some())
            .field("patch", &self.patch.is_some())
            .field("delete", &self.delete.is_some())
            .field("parse_header", &self.parse_header.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("end", &self.end.is_some())
            .field("done", &self.done.is_some())
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::from_code(0), Outcome::Ok);
        assert_eq!(Outcome::from_code(-1), Outcome::NotHandled);
        assert_eq!(Outcome::from_code(404), Outcome::Code(404));
        assert_eq!(Outcome::Code(500).code(), 500);
    }

    #[test]
    fn test_status_override_band() {
        assert_eq!(Outcome::Code(404).status_override(), Some(StatusCode::NOT_FOUND));
        assert_eq!(Outcome::Code(202).status_override(), None);
        assert_eq!(Outcome::Code(1000).status_override(), None);
        assert_eq!(Outcome::Code(3).status_override(), None);
        assert_eq!(Outcome::Ok.status_override(), None);
        assert!(Outcome::Code(3).is_internal_failure());
        assert!(!Outcome::Code(404).is_internal_failure());
    }

    #[test]
    fn test_builder_marks_capabilities() {
        let intf = HandlerInterface::new()
            .with_serve(|_, _| Outcome::Ok)
            .with_namespace("SOAP-ENV", "http://schemas.xmlsoap.org/soap/envelope/", None);
        assert!(intf.serve.is_some());
        assert!(intf.get.is_none());
        assert_eq!(intf.namespaces.len(), 1);
        assert!(format!("{intf:?}").contains("serve: true"));
    }
}
