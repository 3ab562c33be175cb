//! Purpose: Turn a response body stream into decoded settings.
//! Exports: `read_body`, `parse_setting`, `parse_batch`, `DEFAULT_MAX_DOCUMENT_BYTES`.
//! Role: Bridges the async transport body to the synchronous decoders.
//! Invariants: The whole document is read (until the stream ends) before decoding starts.
//! Invariants: Documents beyond the byte limit fail with `TooLarge`; nothing is truncated silently.
//! Invariants: Each chunk read races the cancel signal; buffers return to the pool on every path.
use super::continuation::next_after;
use crate::core::buffer::BufferPool;
use crate::core::decode::{decode_batch, decode_setting};
use crate::core::error::{Error, ErrorKind};
use crate::core::setting::{ConfigurationSetting, SettingBatch};
use crate::pipeline::{BodyStream, CallContext, CancelSignal};
use tokio_stream::StreamExt;

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024;

/// Appends the full body to `buffer`, up to `limit` bytes.
pub async fn read_body(
    body: &mut BodyStream,
    cancel: &CancelSignal,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> Result<(), Error> {
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::cancelled()),
            chunk = body.next() => chunk,
        };
        match chunk {
            None => return Ok(()),
            Some(Ok(bytes)) => {
                if buffer.len() + bytes.len() > limit {
                    return Err(Error::new(ErrorKind::TooLarge)
                        .with_message(format!("response body exceeds {limit} bytes"))
                        .with_hint("Raise max_document_bytes or narrow the request."));
                }
                buffer.extend_from_slice(&bytes);
            }
            Some(Err(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read response body")
                    .with_source(err));
            }
        }
    }
}

pub async fn parse_setting(
    context: &mut dyn CallContext,
    pool: &BufferPool,
    limit: usize,
) -> Result<ConfigurationSetting, Error> {
    let mut body = take_body(context)?;
    let cancel = context.cancellation().clone();
    let mut buffer = pool.rent();
    read_body(&mut body, &cancel, &mut buffer, limit).await?;
    decode_setting(&buffer)
}

pub async fn parse_batch(
    context: &mut dyn CallContext,
    pool: &BufferPool,
    limit: usize,
) -> Result<SettingBatch, Error> {
    let continuation = next_after(&*context);
    let mut body = take_body(context)?;
    let cancel = context.cancellation().clone();
    let mut buffer = pool.rent();
    read_body(&mut body, &cancel, &mut buffer, limit).await?;
    let decoded = decode_batch(&buffer)?;
    tracing::trace!(
        settings = decoded.value.len(),
        consumed = decoded.consumed,
        ?continuation,
        "decoded settings page"
    );
    Ok(SettingBatch::new(decoded.value, continuation))
}

fn take_body(context: &mut dyn CallContext) -> Result<BodyStream, Error> {
    context.take_response_body().ok_or_else(|| {
        Error::new(ErrorKind::Internal).with_message("response has no body stream")
    })
}
