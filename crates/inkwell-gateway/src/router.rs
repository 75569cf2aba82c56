//! REST gateway router

use crate::binder::{populate_query, FieldBinder};
use crate::config::{ForwardResponseHook, GatewayConfig};
use crate::error::{log_status, ErrorMapper, GatewayError, GatewayResponse, GatewayResult};
use crate::handler::{HandlerFn, MessageStream, RequestBody, ResponseBody, RpcReply, RpcRequest};
use crate::mapping::{BodySelector, HttpMethod, HttpRule, RouteMapping};
use crate::marshal::{DecodeError, Marshaler};
use crate::metadata::MetadataMapper;
use crate::pattern::RequestPath;
use crate::streaming::{
    envelope_body, next_before, spawn_inbound, unary_body, InboundPump, OutboundStream, StreamEnvelope,
};
use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, Request},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::{future, stream, StreamExt};
use inkwell_core::{DynamicMessage, ExtractedValue, FieldPath, Status, Value};
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, debug_span, error, warn, Instrument};

/// Header carrying the intended method of a tunnelled POST
pub const METHOD_OVERRIDE_HEADER: &str = "x-http-method-override";

/// One HTTP binding together with the backend call it dispatches to
struct Route {
    rule: HttpRule,
    mapping: Arc<RouteMapping>,
    handler: HandlerFn,
}

/// REST gateway state
#[derive(Clone)]
struct GatewayState {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    routes: Vec<Route>,
    config: GatewayConfig,
    mapper: MetadataMapper,
    marshaler: Marshaler,
    errors: ErrorMapper,
}

/// REST gateway for backend RPC services
pub struct RestGateway {
    router: Router,
}

impl RestGateway {
    pub fn builder(config: GatewayConfig) -> RestGatewayBuilder {
        RestGatewayBuilder::new(config)
    }

    /// Get the Axum router
    pub fn router(self) -> Router {
        self.router
    }
}

/// REST gateway builder
pub struct RestGatewayBuilder {
    config: GatewayConfig,
    routes: Vec<(RouteMapping, HandlerFn)>,
}

impl RestGatewayBuilder {
    /// Create a new REST gateway builder
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            routes: Vec::new(),
        }
    }

    /// Add a route mapping served by `handler`
    ///
    /// Bindings are matched in the order they are added.
    pub fn route(mut self, mapping: RouteMapping, handler: HandlerFn) -> Self {
        self.routes.push((mapping, handler));
        self
    }

    /// Build the REST gateway
    pub fn build(self) -> GatewayResult<RestGateway> {
        let mut routes = Vec::new();
        for (mapping, handler) in self.routes {
            mapping.validate()?;
            let mapping = Arc::new(mapping);
            for rule in &mapping.http_mappings {
                debug!(
                    http_method = %rule.http_method,
                    template = %rule.pattern,
                    method = %mapping.full_method(),
                    "Registered route"
                );
                routes.push(Route {
                    rule: rule.clone(),
                    mapping: mapping.clone(),
                    handler: handler.clone(),
                });
            }
        }

        let marshaler = self.config.marshaler();
        let state = GatewayState {
            inner: Arc::new(GatewayInner {
                routes,
                mapper: self.config.metadata_mapper(),
                errors: ErrorMapper::new(marshaler.clone()),
                marshaler,
                config: self.config,
            }),
        };

        let router = Router::new().fallback(dispatch).with_state(state);
        Ok(RestGateway { router })
    }
}

/// Entry point for every request
async fn dispatch(State(state): State<GatewayState>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let inner = &state.inner;

    let (route, captures) = match inner.find(&parts) {
        Ok(found) => found,
        Err(err) => return inner.errors.response(&err).into_response(),
    };

    let span = debug_span!(
        "rpc",
        method = %route.mapping.full_method(),
        template = %route.rule.pattern,
    );
    async move {
        match inner.serve(route, captures, parts, body).await {
            Ok(response) => response,
            Err(err) => inner.errors.response(&err).into_response(),
        }
    }
    .instrument(span)
    .await
}

/// Method used for routing, honouring `X-HTTP-Method-Override` on POST
fn effective_method(parts: &Parts) -> Option<HttpMethod> {
    if parts.method == Method::POST {
        if let Some(value) = parts.headers.get(METHOD_OVERRIDE_HEADER) {
            return value.to_str().ok().and_then(HttpMethod::from_str);
        }
    }
    HttpMethod::from_method(&parts.method)
}

impl GatewayInner {
    /// First route in declaration order matching the method and path
    fn find(&self, parts: &Parts) -> GatewayResult<(&Route, Vec<ExtractedValue>)> {
        let raw = parts.uri.path();
        let path = RequestPath::parse(raw)?;
        let method = effective_method(parts);

        let mut path_matched = false;
        for route in &self.routes {
            let wanted = Some(route.rule.http_method) == method;
            if !wanted && path_matched {
                continue;
            }
            if let Some(captures) = route.rule.pattern.match_path(&path) {
                if wanted {
                    debug!(path = %raw, template = %route.rule.pattern, "Matched route");
                    return Ok((route, captures));
                }
                path_matched = true;
            }
        }

        if path_matched {
            Err(GatewayError::MethodMismatch {
                method: parts.method.to_string(),
                path: raw.to_string(),
            })
        } else {
            Err(GatewayError::NoRouteMatch(raw.to_string()))
        }
    }

    async fn serve(
        &self,
        route: &Route,
        captures: Vec<ExtractedValue>,
        parts: Parts,
        body: Body,
    ) -> GatewayResult<Response> {
        let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|info| info.0);
        let (metadata, timeout) = self.mapper.inbound(&parts.headers, peer)?;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        let mapping = &route.mapping;
        let mut inbound = None;
        let body = if mapping.kind.is_client_streaming() {
            // Streamed messages carry no path bindings, but the path must still bind cleanly.
            let mut scratch = DynamicMessage::new(mapping.input.clone());
            bind_path(&mut scratch, &captures)?;

            let (stream, pump) = spawn_inbound(
                body,
                mapping.input.clone(),
                self.marshaler.clone(),
                self.config.stream_buffer,
                self.config.max_stream_document,
            );
            inbound = Some(pump);
            RequestBody::Stream(stream)
        } else {
            let bytes = to_bytes(body, self.config.max_body_size)
                .await
                .map_err(|e| GatewayError::BodyRead(e.to_string()))?;
            RequestBody::Message(self.build_message(route, &captures, parts.uri.query(), &bytes)?)
        };

        let request = RpcRequest {
            method: mapping.full_method(),
            metadata,
            deadline,
            body,
        };
        let call = (route.handler)(request);
        let reply = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(reply) => reply,
                Err(_) => RpcReply::error(Status::deadline_exceeded("context deadline exceeded")),
            },
            None => call.await,
        };

        Ok(self.render(route, reply, deadline, inbound).await)
    }

    /// Build the request message from body, path captures and query
    fn build_message(
        &self,
        route: &Route,
        captures: &[ExtractedValue],
        query: Option<&str>,
        body: &[u8],
    ) -> GatewayResult<DynamicMessage> {
        let input = &route.mapping.input;
        let has_body = !body.iter().all(u8::is_ascii_whitespace);

        let mut message = match &route.rule.body {
            BodySelector::Whole if has_body => self.marshaler.decode(input, body)?,
            BodySelector::Field(path) if has_body => {
                let json: JsonValue = serde_json::from_slice(body).map_err(DecodeError::from)?;
                let field = input.field_by_path(path).ok_or_else(|| GatewayError::InvalidRoute {
                    template: route.rule.pattern.to_string(),
                    reason: format!("{} has no body field {}", input, path),
                })?;
                let value = self.marshaler.decode_field(field, json)?;
                let mut message = DynamicMessage::new(input.clone());
                FieldBinder::new(&mut message).assign(path, value)?;
                message
            }
            _ => DynamicMessage::new(input.clone()),
        };

        bind_path(&mut message, captures)?;

        let mut bound: Vec<FieldPath> = captures.iter().map(|c| c.path.clone()).collect();
        let query = match &route.rule.body {
            BodySelector::Whole => None,
            BodySelector::Field(path) => {
                bound.push(path.clone());
                query
            }
            BodySelector::Empty => query,
        };
        if let Some(query) = query {
            populate_query(&mut FieldBinder::new(&mut message), query, &bound)?;
        }

        Ok(message)
    }

    async fn render(
        &self,
        route: &Route,
        reply: RpcReply,
        deadline: Option<Instant>,
        inbound: Option<InboundPump>,
    ) -> Response {
        let RpcReply { header, trailer, result } = reply;
        let result = result.and_then(|body| conform(route, body));

        let mut headers = HeaderMap::new();
        self.mapper.outbound_headers(&header, &mut headers);
        let trailers = if self.config.forward_trailers && !trailer.is_empty() {
            self.mapper.declare_trailers(&trailer, &mut headers);
            Some(self.mapper.outbound_trailers(&trailer))
        } else {
            None
        };

        let renderer = ReplyRenderer {
            marshaler: self.marshaler.clone(),
            errors: self.errors.clone(),
            hooks: self.config.forward_response_hooks.clone(),
            response_body: route.rule.response_body.clone(),
        };

        let body = match result {
            Err(status) => return renderer.failure(&status, headers, trailers),
            Ok(ResponseBody::Message(message)) => {
                if let Err(status) = renderer.run_hooks(&mut headers, &message) {
                    return renderer.failure(&status, headers, trailers);
                }
                let json = match renderer.to_json(&message) {
                    Ok(json) => json,
                    Err(status) => return renderer.failure(&status, headers, trailers),
                };
                match serde_json::to_vec(&json) {
                    Ok(bytes) => unary_body(bytes.into(), trailers),
                    Err(e) => return self.errors.response(&GatewayError::from(e)).into_response(),
                }
            }
            Ok(ResponseBody::Stream(mut messages)) => {
                // Headers are not committed until the first item is in, so a
                // stream failing up front still gets its own HTTP status.
                let messages: MessageStream = match next_before(&mut messages, deadline).await {
                    Some(Err(status)) => return renderer.failure(&status, headers, trailers),
                    Some(Ok(first)) => {
                        let first = stream::once(future::ready(Ok::<_, Status>(first)));
                        Box::pin(first.chain(messages))
                    }
                    None => messages,
                };
                let outbound = OutboundStream {
                    messages,
                    deadline,
                    trailers,
                    inbound,
                    capacity: self.config.stream_buffer,
                };
                envelope_body(outbound, move |item| renderer.envelope(item))
            }
        };

        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(self.marshaler.content_type()));
        let mut response = Response::new(body);
        *response.headers_mut() = headers;
        response
    }
}

/// Check the reply shape against the method's streaming kind
fn conform(route: &Route, body: ResponseBody) -> Result<ResponseBody, Status> {
    let streaming = route.mapping.kind.is_server_streaming();
    match body {
        ResponseBody::Message(message) if streaming => {
            warn!(method = %route.mapping.full_method(), "Streaming method replied with a single message");
            Ok(ResponseBody::Stream(Box::pin(stream::iter([Ok::<_, Status>(message)]))))
        }
        ResponseBody::Stream(_) if !streaming => {
            error!(method = %route.mapping.full_method(), "Unary method replied with a stream");
            Err(Status::internal(format!(
                "{} replied with a stream to a unary call",
                route.mapping.full_method()
            )))
        }
        body => Ok(body),
    }
}

/// Bind path captures into `message`
fn bind_path(message: &mut DynamicMessage, captures: &[ExtractedValue]) -> GatewayResult<()> {
    let mut binder = FieldBinder::new(message);
    for value in captures {
        binder.bind(value)?;
    }
    Ok(())
}

/// Per-call view of everything needed to render replies
struct ReplyRenderer {
    marshaler: Marshaler,
    errors: ErrorMapper,
    hooks: Vec<ForwardResponseHook>,
    response_body: Option<FieldPath>,
}

impl ReplyRenderer {
    fn run_hooks(&self, headers: &mut HeaderMap, message: &DynamicMessage) -> Result<(), Status> {
        self.hooks.iter().try_for_each(|hook| hook(headers, message))
    }

    /// JSON for a reply message, narrowed to the response field if one is set
    fn to_json(&self, message: &DynamicMessage) -> Result<JsonValue, Status> {
        let Some(path) = &self.response_body else {
            return Ok(self.marshaler.to_value(message));
        };
        let field = message
            .descriptor()
            .field_by_path(path)
            .ok_or_else(|| Status::internal(format!("{} has no field {}", message.descriptor(), path)))?;
        let json = match message.get_path(path) {
            Some(value) => self.marshaler.field_to_value(field, value),
            None => self.marshaler.field_to_value(field, &Value::default_for_field(field)),
        };
        Ok(json)
    }

    fn envelope(&self, item: Result<DynamicMessage, Status>) -> StreamEnvelope {
        let rendered = item.and_then(|message| {
            let mut scratch = HeaderMap::new();
            self.run_hooks(&mut scratch, &message)?;
            self.to_json(&message)
        });
        match rendered {
            Ok(json) => StreamEnvelope::Result(json),
            Err(status) => {
                log_status(&status);
                StreamEnvelope::Error(self.errors.error_body(&status))
            }
        }
    }

    fn failure(&self, status: &Status, headers: HeaderMap, trailers: Option<HeaderMap>) -> Response {
        log_status(status);
        let (code, body) = self.errors.to_http(status);
        let mut response = GatewayResponse::new(code, body).with_headers(headers);
        if let Some(trailers) = trailers {
            response = response.with_trailers(trailers);
        }
        response.into_response()
    }
}
