//! Purpose: Deterministic transport that replays scripted responses.
//! Exports: `MockTransport`, `MockResponse`, `RecordedRequest`.
//! Role: Test double for the pipeline and client; never touches the network.
//! Invariants: Responses are served in order and wrap around after the last one.
//! Invariants: Every dispatched request is recorded, in dispatch order.
use super::{
    BodyStream, BoxFuture, CallContext, CancelSignal, Content, Header, HeaderLookup, RequestState,
    ResponseState, ServiceMethod, Transport,
};
use crate::core::error::{Error, ErrorKind};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use url::Url;

#[derive(Clone, Debug)]
pub struct MockResponse {
    status: u16,
    headers: Vec<Header>,
    body: Bytes,
    chunk_size: Option<usize>,
    broken_body: bool,
}

impl MockResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            chunk_size: None,
            broken_body: false,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Delivers the body in chunks of at most `chunk_size` bytes.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// Ends the body stream with an I/O error after the scripted bytes.
    pub fn with_broken_body(mut self) -> Self {
        self.broken_body = true;
        self
    }

    fn body_stream(&self) -> BodyStream {
        let len = self.body.len();
        let chunk_size = self.chunk_size.unwrap_or(len).max(1);
        let mut chunks: Vec<io::Result<Bytes>> = (0..len)
            .step_by(chunk_size)
            .map(|start| Ok(self.body.slice(start..(start + chunk_size).min(len))))
            .collect();
        if self.broken_body {
            chunks.push(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by mock",
            )));
        }
        Box::pin(tokio_stream::iter(chunks))
    }
}

/// Request as the transport saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Option<ServiceMethod>,
    pub url: Option<Url>,
    pub headers: Vec<Header>,
    pub content: Option<Content>,
}

impl RecordedRequest {
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.header(name)
    }
}

pub struct MockTransport {
    responses: Vec<MockResponse>,
    next: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Transport answering with the given statuses and empty bodies.
    pub fn new(statuses: &[u16]) -> Self {
        Self::with_responses(statuses.iter().copied().map(MockResponse::new).collect())
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            next: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock_requests().clone()
    }

    fn lock_requests(&self) -> MutexGuard<'_, Vec<RecordedRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn next_response(&self) -> Option<&MockResponse> {
        if self.responses.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.responses.len();
        self.responses.get(index)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("responses", &self.responses.len())
            .field("served", &self.next.load(Ordering::Relaxed))
            .finish()
    }
}

impl Transport for MockTransport {
    fn create_context(&self, cancel: CancelSignal) -> Box<dyn CallContext> {
        Box::new(MockContext {
            request: RequestState::new(cancel),
            response: ResponseState::default(),
        })
    }

    fn process<'a>(&'a self, context: &'a mut dyn CallContext) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let context = context
                .as_any_mut()
                .downcast_mut::<MockContext>()
                .ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message("the context is not compatible with the transport")
                })?;
            context.request.cancel.check()?;
            let response = self.next_response().ok_or_else(|| {
                Error::new(ErrorKind::Internal)
                    .with_message("mock transport has no scripted responses")
            })?;

            self.lock_requests().push(RecordedRequest {
                method: context.request.method,
                url: context.request.url.clone(),
                headers: context.request.headers.clone(),
                content: context.request.content.clone(),
            });

            context.response.status = Some(response.status);
            context.response.headers = response.headers.clone();
            context.response.body = Some(response.body_stream());
            Ok(())
        })
    }
}

struct MockContext {
    request: RequestState,
    response: ResponseState,
}

impl fmt::Display for MockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.request, f)
    }
}

impl CallContext for MockContext {
    fn set_request_line(&mut self, method: ServiceMethod, url: Url) {
        self.request.method = Some(method);
        self.request.url = Some(url);
    }

    fn add_header(&mut self, header: Header) {
        self.request.headers.push(header);
    }

    fn set_content(&mut self, content: Content) {
        self.request.content = Some(content);
    }

    fn cancellation(&self) -> &CancelSignal {
        &self.request.cancel
    }

    fn status(&self) -> Option<u16> {
        self.response.status
    }

    fn response_header(&self, name: &[u8]) -> Option<&[u8]> {
        self.response.headers.header(name)
    }

    fn take_response_body(&mut self) -> Option<BodyStream> {
        self.response.body.take()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
