//! Streaming support for the gateway.
//!
//! This module provides:
//! - An incremental decoder for whitespace-separated JSON documents
//! - The `{"result": ...}` / `{"error": ...}` response envelope
//! - Request and response pumps for streaming calls

use crate::handler::{MessageItem, MessageStream};
use crate::marshal::Marshaler;
use axum::body::Body;
use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;
use http_body::Frame;
use http_body_util::StreamBody;
use inkwell_core::{ErrorBody, MessageDescriptor, Status};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// One unit of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEnvelope {
    Result(JsonValue),
    Error(ErrorBody),
}

impl StreamEnvelope {
    /// Encode as one JSON document followed by a newline
    pub fn to_line(&self) -> Result<Bytes, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// A request stream could not be split into JSON documents
#[derive(Debug, Error)]
pub enum StreamDecodeError {
    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON document exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Incremental decoder for a sequence of JSON documents
///
/// Documents may be separated by any whitespace. Feed bytes as they arrive,
/// call [`finish`](Self::finish) at end of input, and pull complete documents
/// with [`next_value`](Self::next_value).
#[derive(Debug)]
pub struct JsonStreamDecoder {
    buffer: Vec<u8>,
    // Start of the unread part of `buffer`
    pos: usize,
    finished: bool,
    max_document: usize,
}

impl Default for JsonStreamDecoder {
    fn default() -> Self {
        Self::with_max_document(usize::MAX)
    }
}

impl JsonStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder rejecting any single document longer than `limit` bytes
    pub fn with_max_document(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pos: 0,
            finished: false,
            max_document: limit,
        }
    }

    /// Append received bytes
    pub fn feed(&mut self, data: &[u8]) {
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Mark end of input
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next complete document, or `None` if more input is needed (or the
    /// input is exhausted)
    pub fn next_value(&mut self) -> Result<Option<JsonValue>, StreamDecodeError> {
        let rest = &self.buffer[self.pos..];
        let Some(start) = rest.iter().position(|b| !b.is_ascii_whitespace()) else {
            self.pos = self.buffer.len();
            return Ok(None);
        };
        let pending = rest.len() - start;

        let mut documents = serde_json::Deserializer::from_slice(&rest[start..]).into_iter::<JsonValue>();
        match documents.next() {
            Some(Ok(value)) => {
                let len = documents.byte_offset();
                if len > self.max_document {
                    return Err(StreamDecodeError::TooLarge {
                        limit: self.max_document,
                    });
                }
                // A bare number or literal touching the end of the buffer may
                // continue in the next chunk.
                let delimited = matches!(value, JsonValue::Object(_) | JsonValue::Array(_) | JsonValue::String(_));
                if len == pending && !delimited && !self.finished {
                    return Ok(None);
                }
                self.pos += start + len;
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() && !self.finished => {
                if pending > self.max_document {
                    return Err(StreamDecodeError::TooLarge {
                        limit: self.max_document,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// Handle to a spawned request pump; aborts the task when dropped
pub(crate) struct InboundPump(Option<JoinHandle<()>>);

impl InboundPump {
    /// Wait for the pump to finish reading the request body
    pub(crate) async fn join(mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Request stream pump failed");
                }
            }
        }
    }
}

impl Drop for InboundPump {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

/// Decode a request body as a stream of messages of type `descriptor`
///
/// The body is read by a spawned task; decoded messages are handed over a
/// bounded channel. A malformed or oversized document ends the stream with an
/// `INVALID_ARGUMENT` item.
pub(crate) fn spawn_inbound(
    body: Body,
    descriptor: Arc<MessageDescriptor>,
    marshaler: Marshaler,
    capacity: usize,
    max_document: usize,
) -> (MessageStream, InboundPump) {
    let (tx, rx) = mpsc::channel::<MessageItem>(capacity.max(1));

    let handle = tokio::spawn(async move {
        let mut data = body.into_data_stream();
        let mut decoder = JsonStreamDecoder::with_max_document(max_document);
        let mut count = 0usize;

        loop {
            loop {
                match decoder.next_value() {
                    Ok(Some(json)) => {
                        let item = marshaler
                            .decode_value(&descriptor, json)
                            .map_err(|e| Status::invalid_argument(e.to_string()));
                        let failed = item.is_err();
                        if tx.send(item).await.is_err() || failed {
                            return;
                        }
                        count += 1;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(Status::invalid_argument(e.to_string()))).await;
                        return;
                    }
                }
            }

            if decoder.is_finished() {
                break;
            }

            match data.next().await {
                Some(Ok(chunk)) => decoder.feed(&chunk),
                Some(Err(e)) => {
                    debug!(error = %e, "Request body read failed");
                    let _ = tx.send(Err(Status::cancelled(format!("reading request body: {}", e)))).await;
                    return;
                }
                None => decoder.finish(),
            }
        }

        debug!(messages = count, "Request stream finished");
    });

    (Box::pin(ReceiverStream::new(rx)), InboundPump(Some(handle)))
}

/// Parts of a streamed response, consumed by [`envelope_body`]
pub(crate) struct OutboundStream {
    pub messages: MessageStream,
    pub deadline: Option<Instant>,
    pub trailers: Option<HeaderMap>,
    pub inbound: Option<InboundPump>,
    pub capacity: usize,
}

/// Build a response body writing one envelope per backend message
///
/// The stream ends after the first error envelope. Trailers, if any, are sent
/// once both the backend stream and the request pump have finished.
pub(crate) fn envelope_body<F>(outbound: OutboundStream, mut render: F) -> Body
where
    F: FnMut(MessageItem) -> StreamEnvelope + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(outbound.capacity.max(1));

    tokio::spawn(async move {
        let OutboundStream {
            mut messages,
            deadline,
            trailers,
            inbound,
            ..
        } = outbound;
        let mut count = 0usize;

        let connected = loop {
            let next = tokio::select! {
                _ = tx.closed() => break false,
                next = next_before(&mut messages, deadline) => next,
            };
            let Some(item) = next else {
                break true;
            };

            let failed = item.is_err();
            let line = match render(item).to_line() {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to encode stream envelope");
                    break true;
                }
            };
            if tx.send(Ok(Frame::data(line))).await.is_err() {
                break false;
            }
            count += 1;
            if failed {
                break true;
            }
        };
        drop(messages);

        if !connected {
            debug!(envelopes = count, "Client went away, response stream cancelled");
            return;
        }

        if let Some(inbound) = inbound {
            inbound.join().await;
        }
        if let Some(trailers) = trailers {
            let _ = tx.send(Ok(Frame::trailers(trailers))).await;
        }
        debug!(envelopes = count, "Response stream finished");
    });

    Body::new(StreamBody::new(ReceiverStream::new(rx)))
}

/// Next item of `messages`, or a `DEADLINE_EXCEEDED` item once `deadline` passes
pub(crate) async fn next_before(messages: &mut MessageStream, deadline: Option<Instant>) -> Option<MessageItem> {
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, messages.next()).await {
            Ok(next) => next,
            Err(_) => Some(Err(Status::deadline_exceeded("deadline exceeded"))),
        },
        None => messages.next().await,
    }
}

/// Body with a single data frame, followed by trailers when given
pub(crate) fn unary_body(data: Bytes, trailers: Option<HeaderMap>) -> Body {
    match trailers {
        None => Body::from(data),
        Some(trailers) => {
            let frames = futures_util::stream::iter([
                Ok::<_, Infallible>(Frame::data(data)),
                Ok(Frame::trailers(trailers)),
            ]);
            Body::new(StreamBody::new(frames))
        }
    }
}
