//! HTTP/JSON to RPC gateway for Inkwell services.
//!
//! This crate maps RESTful HTTP requests onto backend calls and renders the
//! replies back as JSON. It supports:
//! - Path templates with captures, wildcards and verbs (`/v1/{name=shelves/*}:get`)
//! - Binding path and query values into nested request fields, including oneofs
//! - JSON request/response conversion and newline-delimited JSON streaming
//! - `Grpc-Metadata-*` / `Grpc-Trailer-*` header mapping and `Grpc-Timeout` deadlines
//! - Status to HTTP mapping with `{"error", "code", "details"}` error bodies

pub mod binder;
pub mod config;
pub mod error;
pub mod handler;
pub mod mapping;
pub mod marshal;
pub mod metadata;
pub mod pattern;
pub mod router;
pub mod streaming;

pub use binder::{parse_query, FieldBindError, FieldBinder};
pub use config::{ForwardResponseHook, GatewayConfig};
pub use error::{ErrorMapper, GatewayError, GatewayResponse, GatewayResult};
pub use handler::{handler_fn, HandlerFn, MessageStream, MethodKind, RequestBody, ResponseBody, RpcReply, RpcRequest};
pub use mapping::{BodySelector, HttpMethod, HttpRule, RouteMapping};
pub use marshal::{DecodeError, MarshalOptions, Marshaler};
pub use metadata::{HeaderMatcher, MetadataMapper};
pub use pattern::{PathPattern, PatternSyntaxError, RequestPath};
pub use router::{RestGateway, RestGatewayBuilder};
pub use streaming::{JsonStreamDecoder, StreamDecodeError, StreamEnvelope};
