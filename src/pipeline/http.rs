//! Purpose: Network transport that performs the exchange with `ureq`.
//! Exports: `HttpTransport`.
//! Role: Terminal pipeline stage for real calls; runs blocking I/O on tokio's blocking pool.
//! Invariants: Non-2xx responses are returned as responses, never as transport errors.
//! Invariants: The exchange races the context's cancel signal; a cancelled call returns promptly.
//! Invariants: The body is streamed in chunks through a bounded channel, not buffered whole.
//! Invariants: Inbound header lookup ignores ASCII case; the wire casing is not preserved.
#![allow(clippy::result_large_err)]

use super::{
    BodyStream, BoxFuture, CallContext, CancelSignal, Content, Header, RequestState,
    ResponseState, ServiceMethod, Transport,
};
use crate::core::error::{Error, ErrorKind};
use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

const BODY_CHUNK_SIZE: usize = 8 * 1024;
const BODY_CHANNEL_DEPTH: usize = 4;

#[derive(Clone)]
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }

    /// Trusts only the PEM certificates in `path` for TLS.
    pub fn with_tls_ca_file(self, path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!(
                    "failed to read TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no certificates"));
        }

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no parsable certificates"));
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        Ok(Self::with_agent(agent))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

struct HttpContext {
    request: RequestState,
    response: ResponseState,
}

struct Exchange {
    status: u16,
    headers: Vec<Header>,
    reader: Box<dyn Read + Send + Sync + 'static>,
}

impl Transport for HttpTransport {
    fn create_context(&self, cancel: CancelSignal) -> Box<dyn CallContext> {
        Box::new(HttpContext {
            request: RequestState::new(cancel),
            response: ResponseState::default(),
        })
    }

    fn process<'a>(&'a self, context: &'a mut dyn CallContext) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let context = context
                .as_any_mut()
                .downcast_mut::<HttpContext>()
                .ok_or_else(|| {
                    Error::new(ErrorKind::Usage)
                        .with_message("the context is not compatible with the transport")
                })?;
            let cancel = context.request.cancel.clone();
            cancel.check()?;

            let (Some(method), Some(url)) = (context.request.method, context.request.url.clone())
            else {
                return Err(Error::new(ErrorKind::Usage).with_message("request line was not set"));
            };
            let headers = context.request.headers.clone();
            let content = context.request.content.clone();
            let agent = self.agent.clone();

            let exchange = tokio::task::spawn_blocking(move || {
                send_blocking(&agent, method, &url, &headers, content.as_ref())
            });
            let exchange = tokio::select! {
                joined = exchange => joined.map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("transport task failed")
                        .with_source(err)
                })??,
                () = cancel.cancelled() => return Err(Error::cancelled()),
            };

            tracing::debug!(call = %context, status = exchange.status, "response received");
            context.response.status = Some(exchange.status);
            context.response.headers = exchange.headers;
            context.response.body = Some(stream_body(exchange.reader));
            Ok(())
        })
    }
}

fn send_blocking(
    agent: &ureq::Agent,
    method: ServiceMethod,
    url: &Url,
    headers: &[Header],
    content: Option<&Content>,
) -> Result<Exchange, Error> {
    let mut request = agent.request(method.as_str(), url.as_str());
    for header in headers {
        let (Ok(name), Ok(value)) = (
            std::str::from_utf8(header.name()),
            std::str::from_utf8(header.value()),
        ) else {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("request headers must be valid UTF-8 for this transport"));
        };
        request = request.set(name, value);
    }

    let response = match content {
        Some(content) => request.send_bytes(content.body()),
        None => request.call(),
    };
    let response = match response {
        Ok(resp) => resp,
        Err(ureq::Error::Status(_, resp)) => resp,
        Err(ureq::Error::Transport(err)) => {
            return Err(Error::new(ErrorKind::Io)
                .with_message("request failed")
                .with_source(err));
        }
    };

    let status = response.status();
    let mut response_headers = Vec::new();
    for name in response.headers_names() {
        for value in response.all(&name) {
            response_headers.push(Header::new(
                Bytes::copy_from_slice(name.as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            ));
        }
    }
    Ok(Exchange {
        status,
        headers: response_headers,
        reader: response.into_reader(),
    })
}

fn stream_body(mut reader: Box<dyn Read + Send + Sync + 'static>) -> BodyStream {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || {
        loop {
            let mut chunk = vec![0u8; BODY_CHUNK_SIZE];
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    chunk.truncate(read);
                    if tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

impl fmt::Display for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.request, f)
    }
}

impl CallContext for HttpContext {
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

    // ureq hands back lowercased response header names.
    fn response_header(&self, name: &[u8]) -> Option<&[u8]> {
        self.response
            .headers
            .iter()
            .find(|header| header.name().eq_ignore_ascii_case(name))
            .map(Header::value)
    }

    fn take_response_body(&mut self) -> Option<BodyStream> {
        self.response.body.take()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
