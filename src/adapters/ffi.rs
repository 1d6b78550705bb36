//! C ABI spoken with native handler libraries.
//!
//! A primary library exports `modbridge_handler_interface`, which fills in a
//! [`RawHandlerTable`] and returns 0. Every operation receives a
//! [`RawContext`] carrying request metadata and three callbacks into the
//! host: `recv` for the request body, `send` for the response body and
//! `post_header` for response headers.
//!
//! The functions here turn such a table into a [`HandlerInterface`]. Each
//! call moves the per-request native state out of the [`RequestContext`],
//! points it at the context for the duration of the call and puts it back.
use std::{
    any::Any,
    ffi::{CStr, CString, c_char, c_int, c_void},
    ptr,
    sync::Arc,
};

use crate::core::{
    context::RequestContext,
    interface::{HandlerInterface, Namespace, Outcome},
    request::HostRequest,
};

/// Namespace table entry. The table ends with an entry whose `prefix` is null.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawNamespace {
    pub prefix: *const c_char,
    pub uri: *const c_char,
    /// May be null
    pub pattern: *const c_char,
}

/// Request metadata passed to init, serve and the teardown operations.
#[repr(C)]
#[derive(Debug)]
pub struct RawRequest {
    pub method: *const c_char,
    pub uri: *const c_char,
    /// Null without a query string
    pub query: *const c_char,
    /// -1 when no length was declared
    pub content_length: i64,
    pub chunked: c_int,
    pub header_only: c_int,
}

pub type RecvFn = unsafe extern "C" fn(*mut RawContext, *mut c_char, usize) -> isize;
pub type SendFn = unsafe extern "C" fn(*mut RawContext, *const c_char, usize) -> c_int;
pub type PostHeaderFn = unsafe extern "C" fn(*mut RawContext, *const c_char, *const c_char);

/// Per-request context as a native handler sees it. String fields are only
/// valid for the duration of one call.
#[repr(C)]
#[derive(Debug)]
pub struct RawContext {
    /// Host-side request state; only meaningful during a call
    pub bridge: *mut c_void,
    /// Reads up to `len` body bytes; 0 is end of stream, -1 an error
    pub recv: RecvFn,
    /// Writes exactly `len` bytes; 0 on success, -1 on a partial write
    pub send: SendFn,
    /// Posts a response header; a null value means the key is a full `Name: value` line
    pub post_header: PostHeaderFn,
    pub method: *const c_char,
    /// Path below the location, with `?query`
    pub path: *const c_char,
    pub host: *const c_char,
    pub endpoint: *const c_char,
    pub ip: u32,
    pub ip6: [u32; 4],
    pub namespaces: *const RawNamespace,
    /// Owned by the handler, preserved across the calls of one request
    pub user: *mut c_void,
}

pub type RawInitFn = unsafe extern "C" fn(*mut RawContext, *const RawRequest);
pub type RawServeFn = unsafe extern "C" fn(*mut RawContext, *const RawRequest) -> c_int;
pub type RawMethodFn = unsafe extern "C" fn(*mut RawContext) -> c_int;
pub type RawHeaderFn = unsafe extern "C" fn(*mut RawContext, *const c_char, *const c_char);

/// Signature of the entry point.
pub type EntryPointFn = unsafe extern "C" fn(*mut RawHandlerTable) -> c_int;

/// Capability table filled in by the entry point. Null entries are absent
/// capabilities.
#[repr(C)]
#[derive(Debug)]
pub struct RawHandlerTable {
    pub init: Option<RawInitFn>,
    pub serve: Option<RawServeFn>,
    pub get: Option<RawMethodFn>,
    pub put: Option<RawMethodFn>,
    pub patch: Option<RawMethodFn>,
    pub delete: Option<RawMethodFn>,
    pub parse_header: Option<RawHeaderFn>,
    pub destroy: Option<RawInitFn>,
    pub end: Option<RawInitFn>,
    pub done: Option<RawInitFn>,
    pub namespaces: *const RawNamespace,
}

impl Default for RawHandlerTable {
    fn default() -> Self {
        Self {
            init: None,
            serve: None,
            get: None,
            put: None,
            patch: None,
            delete: None,
            parse_header: None,
            destroy: None,
            end: None,
            done: None,
            namespaces: ptr::null(),
        }
    }
}

/// Guard against tables that are never terminated.
const MAX_NAMESPACES: usize = 256;

/// The library's namespace table. It lives in the library's static data.
#[derive(Debug, Clone, Copy)]
struct NamespaceTable(*const RawNamespace);

// Read-only data owned by a library that outlives every closure holding it
unsafe impl Send for NamespaceTable {}
unsafe impl Sync for NamespaceTable {}

/// # Safety
/// `ptr` must be null or point to a valid NUL-terminated string.
unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Copy a null-terminated namespace table.
///
/// # Safety
/// `table` must be null or point to entries terminated by a null `prefix`.
pub unsafe fn read_namespaces(table: *const RawNamespace) -> Vec<Namespace> {
    let mut namespaces = Vec::new();
    if table.is_null() {
        return namespaces;
    }
    for index in 0..MAX_NAMESPACES {
        let entry = unsafe { &*table.add(index) };
        if entry.prefix.is_null() {
            break;
        }
        namespaces.push(Namespace {
            prefix: unsafe { lossy(entry.prefix) },
            uri: unsafe { lossy(entry.uri) },
            pattern: (!entry.pattern.is_null()).then(|| unsafe { lossy(entry.pattern) }),
        });
    }
    namespaces
}

/// Strings and structs handed to native code for one request.
struct NativeState {
    raw: RawContext,
    request: RawRequest,
    strings: Vec<CString>,
}

impl NativeState {
    fn new() -> Self {
        Self {
            raw: RawContext {
                bridge: ptr::null_mut(),
                recv: recv_trampoline,
                send: send_trampoline,
                post_header: post_header_trampoline,
                method: ptr::null(),
                path: ptr::null(),
                host: ptr::null(),
                endpoint: ptr::null(),
                ip: 0,
                ip6: [0; 4],
                namespaces: ptr::null(),
                user: ptr::null_mut(),
            },
            request: RawRequest {
                method: ptr::null(),
                uri: ptr::null(),
                query: ptr::null(),
                content_length: -1,
                chunked: 0,
                header_only: 0,
            },
            strings: Vec::new(),
        }
    }

    fn keep(&mut self, value: &str) -> *const c_char {
        let value = CString::new(value.replace('\0', "")).unwrap_or_default();
        let ptr = value.as_ptr();
        self.strings.push(value);
        ptr
    }

    /// Rebuild the metadata from the context; transport fields change after init.
    fn refresh(&mut self, ctx: &RequestContext<'_>, namespaces: NamespaceTable) {
        let request = ctx.request();
        let transport = ctx.transport().clone();

        self.strings.clear();
        let method = self.keep(request.method.as_str());
        self.raw.method = method;
        self.raw.path = self.keep(&transport.path);
        self.raw.host = self.keep(&transport.host);
        self.raw.endpoint = self.keep(&transport.endpoint);
        self.raw.ip = transport.ip;
        self.raw.ip6 = transport.ip6;
        self.raw.namespaces = namespaces.0;

        self.request.method = method;
        self.request.uri = self.keep(&request.unparsed_uri);
        self.request.query = match request.query() {
            Some(query) => self.keep(query),
            None => ptr::null(),
        };
        self.request.content_length = request
            .content_length
            .and_then(|len| i64::try_from(len).ok())
            .unwrap_or(-1);
        self.request.chunked = c_int::from(request.chunked);
        self.request.header_only = c_int::from(request.header_only);
    }
}

/// Run one native call with the context bridged in.
fn call_native<R>(
    ctx: &mut RequestContext<'_>,
    namespaces: NamespaceTable,
    call: impl FnOnce(*mut RawContext, *const RawRequest) -> R,
) -> R {
    let mut state = ctx
        .take_handler_state::<NativeState>()
        .unwrap_or_else(|| Box::new(NativeState::new()));
    state.refresh(ctx, namespaces);

    let bridge: *mut RequestContext<'_> = &mut *ctx;
    state.raw.bridge = bridge.cast();
    let raw: *mut RawContext = &mut state.raw;
    let request: *const RawRequest = &state.request;
    let result = call(raw, request);
    state.raw.bridge = ptr::null_mut();

    ctx.set_handler_state(state);
    result
}

/// # Safety
/// `raw` must be null or the context passed to the current native call.
unsafe fn bridged<'a>(raw: *mut RawContext) -> Option<&'a mut RequestContext<'a>> {
    let raw = unsafe { raw.as_ref() }?;
    unsafe { raw.bridge.cast::<RequestContext<'a>>().as_mut() }
}

unsafe extern "C" fn recv_trampoline(raw: *mut RawContext, buf: *mut c_char, len: usize) -> isize {
    let Some(ctx) = (unsafe { bridged(raw) }) else {
        return -1;
    };
    if len == 0 {
        return 0;
    }
    if buf.is_null() {
        return -1;
    }
    let buf = unsafe { std::slice::from_raw_parts_mut(buf.cast::<u8>(), len) };
    match ctx.read(buf) {
        Ok(read) => isize::try_from(read).unwrap_or(-1),
        Err(e) => {
            tracing::warn!("Error reading request body: {}", e);
            -1
        }
    }
}

unsafe extern "C" fn send_trampoline(raw: *mut RawContext, buf: *const c_char, len: usize) -> c_int {
    let Some(ctx) = (unsafe { bridged(raw) }) else {
        return -1;
    };
    if len == 0 {
        return 0;
    }
    if buf.is_null() {
        return -1;
    }
    let data = unsafe { std::slice::from_raw_parts(buf.cast::<u8>(), len) };
    match ctx.write(data) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

unsafe extern "C" fn post_header_trampoline(
    raw: *mut RawContext,
    key: *const c_char,
    value: *const c_char,
) {
    let Some(ctx) = (unsafe { bridged(raw) }) else {
        return;
    };
    if key.is_null() {
        return;
    }
    let key = unsafe { lossy(key) };
    if value.is_null() {
        ctx.post_header(&key, None);
    } else {
        let value = unsafe { lossy(value) };
        ctx.post_header(&key, Some(&value));
    }
}

/// Build the capability table for a native library.
///
/// `keep_alive` is held by every operation so the code they point into
/// stays mapped while any request still uses them.
///
/// # Safety
/// Every function pointer and the namespace table in `table` must stay valid
/// for as long as `keep_alive` is alive.
pub unsafe fn interface_from_table(
    table: &RawHandlerTable,
    keep_alive: Arc<dyn Any + Send + Sync>,
) -> HandlerInterface {
    let namespaces = NamespaceTable(table.namespaces);
    let mut interface = HandlerInterface::new();
    interface.namespaces = unsafe { read_namespaces(table.namespaces) };

    if let Some(init) = table.init {
        interface = interface.with_init(with_request(init, namespaces, keep_alive.clone()));
    }
    if let Some(serve) = table.serve {
        let keep = keep_alive.clone();
        interface = interface.with_serve(move |ctx: &mut RequestContext<'_>, _: &HostRequest| {
            let _keep = &keep;
            call_native(ctx, namespaces, |raw, request| {
                Outcome::from_code(unsafe { serve(raw, request) })
            })
        });
    }
    if let Some(get) = table.get {
        interface = interface.with_get(method_op(get, namespaces, keep_alive.clone()));
    }
    if let Some(put) = table.put {
        interface = interface.with_put(method_op(put, namespaces, keep_alive.clone()));
    }
    if let Some(patch) = table.patch {
        interface = interface.with_patch(method_op(patch, namespaces, keep_alive.clone()));
    }
    if let Some(delete) = table.delete {
        interface = interface.with_delete(method_op(delete, namespaces, keep_alive.clone()));
    }
    if let Some(parse_header) = table.parse_header {
        let keep = keep_alive.clone();
        interface = interface.with_parse_header(
            move |ctx: &mut RequestContext<'_>, name: &str, value: &str| {
                let _keep = &keep;
                let (Ok(name), Ok(value)) = (CString::new(name), CString::new(value)) else {
                    return;
                };
                call_native(ctx, namespaces, |raw, _| unsafe {
                    parse_header(raw, name.as_ptr(), value.as_ptr())
                });
            },
        );
    }
    if let Some(destroy) = table.destroy {
        interface = interface.with_destroy(with_request(destroy, namespaces, keep_alive.clone()));
    }
    if let Some(end) = table.end {
        interface = interface.with_end(with_request(end, namespaces, keep_alive.clone()));
    }
    if let Some(done) = table.done {
        interface = interface.with_done(with_request(done, namespaces, keep_alive));
    }

    interface
}

fn with_request(
    op: RawInitFn,
    namespaces: NamespaceTable,
    keep: Arc<dyn Any + Send + Sync>,
) -> impl Fn(&mut RequestContext<'_>, &HostRequest) + Send + Sync + 'static {
    move |ctx: &mut RequestContext<'_>, _: &HostRequest| {
        let _keep = &keep;
        call_native(ctx, namespaces, |raw, request| unsafe { op(raw, request) });
    }
}

fn method_op(
    op: RawMethodFn,
    namespaces: NamespaceTable,
    keep: Arc<dyn Any + Send + Sync>,
) -> impl Fn(&mut RequestContext<'_>) -> Outcome + Send + Sync + 'static {
    move |ctx: &mut RequestContext<'_>| {
        let _keep = &keep;
        call_native(ctx, namespaces, |raw, _| Outcome::from_code(unsafe { op(raw) }))
    }
}
