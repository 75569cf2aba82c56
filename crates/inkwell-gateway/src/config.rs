//! Gateway configuration

use crate::marshal::{MarshalOptions, Marshaler};
use crate::metadata::{
    default_incoming_matcher, default_outgoing_header_matcher, default_outgoing_trailer_matcher, HeaderMatcher,
    MetadataMapper,
};
use axum::http::HeaderMap;
use inkwell_core::{DynamicMessage, Status};
use std::fmt;
use std::sync::Arc;

/// Callback run on every successful reply before its body is written
///
/// A hook may edit the response headers (e.g. override `Content-Type`) or
/// fail the request with a status.
pub type ForwardResponseHook = Arc<dyn Fn(&mut HeaderMap, &DynamicMessage) -> Result<(), Status> + Send + Sync>;

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// JSON marshaling options for bodies and stream envelopes
    pub marshal_options: MarshalOptions,
    /// Maps inbound HTTP header names to call metadata keys
    pub incoming_header_matcher: HeaderMatcher,
    /// Maps response metadata keys to HTTP header names
    pub outgoing_header_matcher: HeaderMatcher,
    /// Maps trailer metadata keys to HTTP trailer names
    pub outgoing_trailer_matcher: HeaderMatcher,
    /// Hooks run in order on each reply message
    pub forward_response_hooks: Vec<ForwardResponseHook>,
    /// Capacity of the channels feeding streamed bodies
    pub stream_buffer: usize,
    /// Send trailer metadata as HTTP trailers
    pub forward_trailers: bool,
    /// Maximum size of a non-streamed request body, in bytes
    pub max_body_size: usize,
    /// Maximum size of one JSON document in a streamed request body, in bytes
    pub max_stream_document: usize,
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marshal_options(mut self, options: MarshalOptions) -> Self {
        self.marshal_options = options;
        self
    }

    pub fn incoming_header_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.incoming_header_matcher = Arc::new(matcher);
        self
    }

    pub fn outgoing_header_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.outgoing_header_matcher = Arc::new(matcher);
        self
    }

    pub fn outgoing_trailer_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.outgoing_trailer_matcher = Arc::new(matcher);
        self
    }

    /// Append a forward-response hook
    pub fn forward_response_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HeaderMap, &DynamicMessage) -> Result<(), Status> + Send + Sync + 'static,
    {
        self.forward_response_hooks.push(Arc::new(hook));
        self
    }

    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    pub fn forward_trailers(mut self, enabled: bool) -> Self {
        self.forward_trailers = enabled;
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn max_stream_document(mut self, bytes: usize) -> Self {
        self.max_stream_document = bytes;
        self
    }

    /// Header mapper built from the configured matchers
    pub fn metadata_mapper(&self) -> MetadataMapper {
        MetadataMapper::new(
            self.incoming_header_matcher.clone(),
            self.outgoing_header_matcher.clone(),
            self.outgoing_trailer_matcher.clone(),
        )
    }

    pub fn marshaler(&self) -> Marshaler {
        Marshaler::new(self.marshal_options)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            marshal_options: MarshalOptions::default(),
            incoming_header_matcher: Arc::new(default_incoming_matcher),
            outgoing_header_matcher: Arc::new(default_outgoing_header_matcher),
            outgoing_trailer_matcher: Arc::new(default_outgoing_trailer_matcher),
            forward_response_hooks: Vec::new(),
            stream_buffer: 16,
            forward_trailers: true,
            max_body_size: 4 * 1024 * 1024, // 4MB
            max_stream_document: 4 * 1024 * 1024,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("marshal_options", &self.marshal_options)
            .field("forward_response_hooks", &self.forward_response_hooks.len())
            .field("stream_buffer", &self.stream_buffer)
            .field("forward_trailers", &self.forward_trailers)
            .field("max_body_size", &self.max_body_size)
            .field("max_stream_document", &self.max_stream_document)
            .finish_non_exhaustive()
    }
}
