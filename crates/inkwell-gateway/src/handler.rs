//! Backend call contract.
//!
//! The gateway hands each translated request to a [`HandlerFn`] and renders
//! the [`RpcReply`] it resolves to. Streaming directions are carried as
//! [`MessageStream`]s.

use futures_util::Stream;
use inkwell_core::{DynamicMessage, Metadata, Status};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;

/// One message of a stream, or the error that ends it
pub type MessageItem = Result<DynamicMessage, Status>;

/// Stream of messages in one call direction
pub type MessageStream = Pin<Box<dyn Stream<Item = MessageItem> + Send>>;

/// Async backend call
pub type HandlerFn = Arc<dyn Fn(RpcRequest) -> Pin<Box<dyn Future<Output = RpcReply> + Send>> + Send + Sync>;

/// Wrap an async function as a [`HandlerFn`]
pub fn handler_fn<F, Fut>(handler: F) -> HandlerFn
where
    F: Fn(RpcRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcReply> + Send + 'static,
{
    Arc::new(move |req: RpcRequest| Box::pin(handler(req)) as Pin<Box<_>>)
}

/// Streaming shape of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidiStreaming,
}

impl MethodKind {
    pub fn is_client_streaming(self) -> bool {
        matches!(self, MethodKind::ClientStreaming | MethodKind::BidiStreaming)
    }

    pub fn is_server_streaming(self) -> bool {
        matches!(self, MethodKind::ServerStreaming | MethodKind::BidiStreaming)
    }
}

/// Request payload: a single message or an inbound stream
pub enum RequestBody {
    Message(DynamicMessage),
    Stream(MessageStream),
}

/// A translated call handed to the backend
pub struct RpcRequest {
    /// Full method name, `/package.Service/Method`
    pub method: String,
    pub metadata: Metadata,
    /// Call deadline from the `Grpc-Timeout` header
    pub deadline: Option<Instant>,
    pub body: RequestBody,
}

impl RpcRequest {
    /// The request message of a unary or server-streaming call
    pub fn message(&self) -> Option<&DynamicMessage> {
        match &self.body {
            RequestBody::Message(msg) => Some(msg),
            RequestBody::Stream(_) => None,
        }
    }

    /// Take the request message; fails for streaming requests
    pub fn into_message(self) -> Result<DynamicMessage, Status> {
        match self.body {
            RequestBody::Message(msg) => Ok(msg),
            RequestBody::Stream(_) => Err(Status::internal(format!(
                "{} expects a single request message",
                self.method
            ))),
        }
    }

    /// Take the request as a stream; a single message becomes a one-item stream
    pub fn into_stream(self) -> MessageStream {
        match self.body {
            RequestBody::Stream(stream) => stream,
            RequestBody::Message(msg) => Box::pin(futures_util::stream::iter([Ok::<_, Status>(msg)])),
        }
    }
}

impl fmt::Debug for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRequest")
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Response payload: a single message or an outbound stream
pub enum ResponseBody {
    Message(DynamicMessage),
    Stream(MessageStream),
}

/// Backend reply: response metadata, trailer metadata and the call outcome
///
/// Metadata is forwarded even when the call fails.
pub struct RpcReply {
    pub header: Metadata,
    pub trailer: Metadata,
    pub result: Result<ResponseBody, Status>,
}

impl RpcReply {
    /// Create a unary reply
    pub fn unary(message: DynamicMessage) -> Self {
        Self::from_result(Ok(ResponseBody::Message(message)))
    }

    /// Create a streaming reply
    pub fn streaming<S>(stream: S) -> Self
    where
        S: Stream<Item = MessageItem> + Send + 'static,
    {
        Self::from_result(Ok(ResponseBody::Stream(Box::pin(stream))))
    }

    /// Create a failed reply
    pub fn error(status: Status) -> Self {
        Self::from_result(Err(status))
    }

    fn from_result(result: Result<ResponseBody, Status>) -> Self {
        Self {
            header: Metadata::new(),
            trailer: Metadata::new(),
            result,
        }
    }

    /// Add response metadata
    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.header.append(key, value);
        self
    }

    /// Add trailer metadata
    pub fn with_trailer(mut self, key: &str, value: impl Into<String>) -> Self {
        self.trailer.append(key, value);
        self
    }
}

impl From<Status> for RpcReply {
    fn from(status: Status) -> Self {
        Self::error(status)
    }
}

impl From<Result<DynamicMessage, Status>> for RpcReply {
    fn from(result: Result<DynamicMessage, Status>) -> Self {
        match result {
            Ok(message) => Self::unary(message),
            Err(status) => Self::error(status),
        }
    }
}

impl fmt::Debug for RpcReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match &self.result {
            Ok(ResponseBody::Message(_)) => "message",
            Ok(ResponseBody::Stream(_)) => "stream",
            Err(_) => "error",
        };
        f.debug_struct("RpcReply")
            .field("header", &self.header)
            .field("trailer", &self.trailer)
            .field("result", &result)
            .finish()
    }
}
