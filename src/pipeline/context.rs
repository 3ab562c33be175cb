//! Purpose: Per-call request/response envelope shared by policies and the transport.
//! Exports: `CallContext`, `Header`, `HeaderLookup`, `ServiceMethod`, `Content`,
//! Exports: `CancelSignal`, `BodyStream`, `RequestState`, `ResponseState`.
//! Role: Capability set every transport-specific context implements.
//! Invariants: Only the transport sets status, inbound headers and the body stream.
//! Invariants: Header names and values are raw bytes compared byte-exactly.
use crate::core::buffer::BufferPool;
use crate::core::encode::{encode_setting, encoded_len};
use crate::core::error::Error;
use crate::core::setting::ConfigurationSetting;
use bstr::ByteSlice;
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio_stream::Stream;
use url::Url;

/// Inbound body as a stream of byte chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServiceMethod {
    Get,
    Head,
    Put,
    Post,
    Patch,
    Delete,
}

impl ServiceMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceMethod::Get => "GET",
            ServiceMethod::Head => "HEAD",
            ServiceMethod::Put => "PUT",
            ServiceMethod::Post => "POST",
            ServiceMethod::Patch => "PATCH",
            ServiceMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Eq, PartialEq)]
pub struct Header {
    name: Bytes,
    value: Bytes,
}

impl Header {
    pub const ACCEPT: &'static str = "Accept";
    pub const AUTHORIZATION: &'static str = "Authorization";
    pub const CONTENT_TYPE: &'static str = "Content-Type";
    pub const LINK: &'static str = "Link";
    pub const USER_AGENT: &'static str = "User-Agent";

    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `<component>/<version> (<os>; <arch>)`
    pub fn user_agent(component: &str, version: &str) -> Self {
        let value = format!(
            "{component}/{version} ({}; {})",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        Self::new(Self::USER_AGENT, value)
    }

    pub fn bearer(token: &str) -> Self {
        Self::new(Self::AUTHORIZATION, format!("Bearer {token}"))
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("name", &self.name.as_bstr())
            .field("value", &self.value.as_bstr())
            .finish()
    }
}

/// Lookup of a header value by exact name.
pub trait HeaderLookup {
    fn header(&self, name: &[u8]) -> Option<&[u8]>;
}

impl HeaderLookup for [Header] {
    fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.iter()
            .find(|header| header.name() == name)
            .map(Header::value)
    }
}

impl HeaderLookup for dyn CallContext + '_ {
    fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.response_header(name)
    }
}

/// Outgoing request body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Content {
    body: Bytes,
}

impl Content {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Encodes the setting's writable fields through a buffer rented from `pool`.
    pub fn from_setting(setting: &ConfigurationSetting, pool: &BufferPool) -> Result<Self, Error> {
        let mut buffer = pool.rent();
        buffer.resize(encoded_len(setting)?, 0);
        let written = encode_setting(setting, &mut buffer)?;
        Ok(Self::new(Bytes::copy_from_slice(&buffer[..written])))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Cooperative cancellation shared between a caller and one or more calls.
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Fails with `ErrorKind::Cancelled` once cancellation was requested.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::cancelled());
        }
        Ok(())
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Capability set of a per-call context.
///
/// Policies use the request side; the transport downcasts to its own concrete
/// type through `as_any_mut` to fill in the response side.
pub trait CallContext: Send + fmt::Display {
    fn set_request_line(&mut self, method: ServiceMethod, url: Url);
    fn add_header(&mut self, header: Header);
    fn set_content(&mut self, content: Content);
    fn cancellation(&self) -> &CancelSignal;
    /// `None` until a transport completed the exchange.
    fn status(&self) -> Option<u16>;
    fn response_header(&self, name: &[u8]) -> Option<&[u8]>;
    fn take_response_body(&mut self) -> Option<BodyStream>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Request half of a context, reusable by transport implementations.
#[derive(Debug, Default)]
pub struct RequestState {
    pub method: Option<ServiceMethod>,
    pub url: Option<Url>,
    pub headers: Vec<Header>,
    pub content: Option<Content>,
    pub cancel: CancelSignal,
}

impl RequestState {
    pub fn new(cancel: CancelSignal) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.method, &self.url) {
            (Some(method), Some(url)) => write!(f, "{method} {url}"),
            _ => f.write_str("<request line not set>"),
        }
    }
}

/// Response half of a context, written by the transport only.
#[derive(Default)]
pub struct ResponseState {
    pub status: Option<u16>,
    pub headers: Vec<Header>,
    pub body: Option<BodyStream>,
}

impl fmt::Debug for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseState")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}
