//! End-to-end tests driving the gateway router against an in-memory backend

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use inkwell_core::{Code, DynamicMessage, EnumDescriptor, FieldKind, MessageDescriptor, Status, Value};
use inkwell_gateway::{
    handler_fn, GatewayConfig, HttpMethod, HttpRule, MethodKind, RestGateway, RouteMapping, RpcReply, RpcRequest,
};
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

const ECHO_SERVICE: &str = "grpc.gateway.examples.EchoService";
const ABE_SERVICE: &str = "grpc.gateway.examples.ABitOfEverythingService";

struct Schema {
    simple: Arc<MessageDescriptor>,
    string_message: Arc<MessageDescriptor>,
    abe: Arc<MessageDescriptor>,
    repeated: Arc<MessageDescriptor>,
    empty: Arc<MessageDescriptor>,
    debug_info: Arc<MessageDescriptor>,
    response_in: Arc<MessageDescriptor>,
    response_out: Arc<MessageDescriptor>,
}

impl Schema {
    fn new() -> Self {
        let embedded = MessageDescriptor::builder("grpc.gateway.examples.Embedded")
            .field("progress", FieldKind::Int64)
            .field("note", FieldKind::String)
            .build()
            .unwrap();
        let simple = MessageDescriptor::builder("grpc.gateway.examples.SimpleMessage")
            .field("id", FieldKind::String)
            .field("num", FieldKind::Int64)
            .oneof("code", [("line_num", FieldKind::Int64), ("lang", FieldKind::String)])
            .field("status", FieldKind::Message(embedded.clone()))
            .oneof("ext", [("en", FieldKind::Int64), ("no", FieldKind::Message(embedded))])
            .build()
            .unwrap();

        let string_message = MessageDescriptor::builder("grpc.gateway.examples.sub.StringMessage")
            .field("value", FieldKind::String)
            .build()
            .unwrap();
        let numeric_enum = EnumDescriptor::new("grpc.gateway.examples.NumericEnum", [("ZERO", 0), ("ONE", 1)]);

        let nested = MessageDescriptor::builder("grpc.gateway.examples.ABitOfEverything.Nested")
            .field("name", FieldKind::String)
            .field("amount", FieldKind::Uint32)
            .field("deeper_nested_value", FieldKind::Message(string_message.clone()))
            .oneof(
                "oneof_value",
                [
                    ("oneof_value_terminal", FieldKind::String),
                    ("oneof_value_deeper_nested", FieldKind::Message(string_message.clone())),
                ],
            )
            .build()
            .unwrap();

        let abe = MessageDescriptor::builder("grpc.gateway.examples.ABitOfEverything")
            .field("single_nested", FieldKind::Message(nested.clone()))
            .field("uuid", FieldKind::String)
            .repeated("nested", FieldKind::Message(nested.clone()))
            .field("float_value", FieldKind::Float)
            .field("double_value", FieldKind::Double)
            .field("int64_value", FieldKind::Int64)
            .field("uint64_value", FieldKind::Uint64)
            .field("int32_value", FieldKind::Int32)
            .field("fixed64_value", FieldKind::Fixed64)
            .field("fixed32_value", FieldKind::Fixed32)
            .field("bool_value", FieldKind::Bool)
            .field("string_value", FieldKind::String)
            .field("bytes_value", FieldKind::Bytes)
            .field("uint32_value", FieldKind::Uint32)
            .field("enum_value", FieldKind::Enum(numeric_enum.clone()))
            .field("sfixed32_value", FieldKind::Sfixed32)
            .field("sfixed64_value", FieldKind::Sfixed64)
            .field("sint32_value", FieldKind::Sint32)
            .field("sint64_value", FieldKind::Sint64)
            .repeated("repeated_string_value", FieldKind::String)
            .oneof(
                "oneof_value",
                [
                    ("oneof_value_string", FieldKind::String),
                    ("oneof_value_nested", FieldKind::Message(nested)),
                ],
            )
            .map("map_value", FieldKind::Enum(numeric_enum.clone()))
            .field("non_conventional_name_value", FieldKind::String)
            .build()
            .unwrap();

        let repeated = MessageDescriptor::builder("grpc.gateway.examples.ABitOfEverythingRepeated")
            .repeated("path_repeated_float_value", FieldKind::Float)
            .repeated("path_repeated_int64_value", FieldKind::Int64)
            .repeated("path_repeated_uint32_value", FieldKind::Uint32)
            .repeated("path_repeated_bool_value", FieldKind::Bool)
            .repeated("path_repeated_string_value", FieldKind::String)
            .repeated("path_repeated_bytes_value", FieldKind::Bytes)
            .repeated("path_repeated_enum_value", FieldKind::Enum(numeric_enum))
            .build()
            .unwrap();

        let response_value = MessageDescriptor::builder("grpc.gateway.examples.ResponseBodyValue")
            .field("data", FieldKind::String)
            .build()
            .unwrap();

        Self {
            simple,
            string_message,
            abe,
            repeated,
            empty: MessageDescriptor::builder("google.protobuf.Empty").build().unwrap(),
            debug_info: MessageDescriptor::builder("google.rpc.DebugInfo")
                .repeated("stack_entries", FieldKind::String)
                .field("detail", FieldKind::String)
                .build()
                .unwrap(),
            response_in: MessageDescriptor::builder("grpc.gateway.examples.ResponseBodyIn")
                .field("data", FieldKind::String)
                .build()
                .unwrap(),
            response_out: MessageDescriptor::builder("grpc.gateway.examples.ResponseBodyOut")
                .field("response", FieldKind::Message(response_value))
                .build()
                .unwrap(),
        }
    }
}

fn echo_reply(req: RpcRequest) -> RpcReply {
    req.into_message().into()
}

static INIT_LOGGING: Once = Once::new();

/// Log to the test writer; `RUST_LOG` selects the level
fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .with_ansi(false)
            .try_init();
    });
}

/// Gateway wired to an in-memory backend
fn gateway(config: GatewayConfig) -> Router {
    init_test_logging();
    let schema = Schema::new();
    let store: Arc<Mutex<Vec<DynamicMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let next_id = Arc::new(AtomicUsize::new(1));

    let echo = RouteMapping::new(ECHO_SERVICE, "Echo", schema.simple.clone(), schema.simple.clone())
        .add_mapping(HttpMethod::Post, "/v1/example/echo/{id}")
        .unwrap()
        .add_mapping(HttpMethod::Get, "/v1/example/echo/{id}/{num}")
        .unwrap()
        .add_mapping(HttpMethod::Get, "/v1/example/echo/{id}/{num}/{lang}")
        .unwrap()
        .add_mapping(HttpMethod::Get, "/v1/example/echo1/{id}/{line_num}/{status.note}")
        .unwrap()
        .add_mapping(HttpMethod::Get, "/v1/example/echo2/{no.note}")
        .unwrap();

    let echo_body = RouteMapping::new(ECHO_SERVICE, "EchoBody", schema.simple.clone(), schema.simple.clone())
        .add_body_mapping(HttpMethod::Post, "/v1/example/echo_body", "*")
        .unwrap();
    let echo_body_handler = handler_fn(|req: RpcRequest| async move {
        echo_reply(req)
            .with_header("foo", "foo1")
            .with_header("bar", "bar1")
            .with_trailer("foo", "foo2")
            .with_trailer("bar", "bar2")
    });

    let metadata = RouteMapping::new(ECHO_SERVICE, "EchoMetadata", schema.simple.clone(), schema.simple.clone())
        .add_mapping(HttpMethod::Get, "/v1/example/metadata")
        .unwrap();
    let metadata_handler = handler_fn(|req: RpcRequest| async move {
        let incoming = req.metadata.clone();
        let mut reply = echo_reply(req);
        reply.header = incoming;
        reply
    });

    let create = RouteMapping::new(ABE_SERVICE, "Create", schema.abe.clone(), schema.abe.clone())
        .add_mapping(
            HttpMethod::Post,
            "/v1/example/a_bit_of_everything/{float_value}/{double_value}/{int64_value}/separator/{uint64_value}/{int32_value}/{fixed64_value}/{fixed32_value}/{bool_value}/{string_value=strprefix/*}/{uint32_value}/{sfixed32_value}/{sfixed64_value}/{sint32_value}/{sint64_value}/{oneof_value_string}/{non_conventional_name_value}/{enum_value}",
        )
        .unwrap();
    let create_body = RouteMapping::new(ABE_SERVICE, "CreateBody", schema.abe.clone(), schema.abe.clone())
        .add_body_mapping(HttpMethod::Post, "/v1/example/a_bit_of_everything", "*")
        .unwrap();
    let create_handler = {
        let store = store.clone();
        let next_id = next_id.clone();
        handler_fn(move |req: RpcRequest| {
            let store = store.clone();
            let next_id = next_id.clone();
            async move {
                let mut msg = match req.into_message() {
                    Ok(msg) => msg,
                    Err(status) => return RpcReply::error(status),
                };
                let uuid = format!("uuid-{}", next_id.fetch_add(1, Ordering::SeqCst));
                msg.set("uuid", uuid).unwrap();
                store.lock().unwrap().push(msg.clone());
                RpcReply::unary(msg)
            }
        })
    };

    let bulk_create = RouteMapping::new(ABE_SERVICE, "BulkCreate", schema.abe.clone(), schema.empty.clone())
        .kind(MethodKind::ClientStreaming)
        .add_body_mapping(HttpMethod::Post, "/v1/example/a_bit_of_everything/bulk", "*")
        .unwrap();
    let empty = schema.empty.clone();
    let bulk_create_handler = {
        let store = store.clone();
        handler_fn(move |req: RpcRequest| {
            let store = store.clone();
            let empty = empty.clone();
            async move {
                let mut stream = req.into_stream();
                let mut count = 0;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(msg) => {
                            store.lock().unwrap().push(msg);
                            count += 1;
                        }
                        Err(status) => return RpcReply::error(status),
                    }
                }
                RpcReply::unary(DynamicMessage::new(empty))
                    .with_header("count", count.to_string())
                    .with_trailer("foo", "foo2")
                    .with_trailer("bar", "bar2")
            }
        })
    };

    let bulk_echo = RouteMapping::new(
        ABE_SERVICE,
        "BulkEcho",
        schema.string_message.clone(),
        schema.string_message.clone(),
    )
    .kind(MethodKind::BidiStreaming)
    .add_body_mapping(HttpMethod::Post, "/v1/example/a_bit_of_everything/echo", "*")
    .unwrap();
    let bulk_echo_handler = handler_fn(|req: RpcRequest| async move { RpcReply::streaming(req.into_stream()) });

    let lookup = RouteMapping::new(ABE_SERVICE, "Lookup", schema.abe.clone(), schema.abe.clone())
        .add_mapping(HttpMethod::Get, "/v1/example/a_bit_of_everything/{uuid}")
        .unwrap();
    let lookup_handler = {
        let store = store.clone();
        handler_fn(move |req: RpcRequest| {
            let store = store.clone();
            async move {
                let Some(uuid) = req.message().and_then(|m| m.get("uuid")).and_then(Value::as_str) else {
                    return RpcReply::error(Status::invalid_argument("missing uuid"));
                };
                let found = store
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|m| m.get("uuid").and_then(Value::as_str) == Some(uuid))
                    .cloned();
                match found {
                    Some(msg) => RpcReply::unary(msg),
                    None => RpcReply::error(Status::not_found("not found")),
                }
            }
        })
    };

    let list = RouteMapping::new(ABE_SERVICE, "List", schema.empty.clone(), schema.abe.clone())
        .kind(MethodKind::ServerStreaming)
        .add_mapping(HttpMethod::Get, "/v1/example/a_bit_of_everything")
        .unwrap();
    let list_handler = {
        let store = store.clone();
        handler_fn(move |_req: RpcRequest| {
            let items: Vec<Result<DynamicMessage, Status>> = store.lock().unwrap().iter().cloned().map(Ok).collect();
            async move { RpcReply::streaming(futures_util::stream::iter(items)).with_header("count", "listed") }
        })
    };

    let abe_echo = RouteMapping::new(
        ABE_SERVICE,
        "Echo",
        schema.string_message.clone(),
        schema.string_message.clone(),
    )
    .add_mapping(HttpMethod::Get, "/v1/example/a_bit_of_everything/echo/{value}")
    .unwrap()
    .add_body_mapping(HttpMethod::Post, "/v2/example/echo", "value")
    .unwrap()
    .add_mapping(HttpMethod::Get, "/v2/example/echo")
    .unwrap();

    let deep_path_echo = RouteMapping::new(ABE_SERVICE, "DeepPathEcho", schema.abe.clone(), schema.abe.clone())
        .add_body_mapping(HttpMethod::Post, "/v1/example/a_bit_of_everything/{single_nested.name}", "*")
        .unwrap()
        .add_body_mapping(
            HttpMethod::Post,
            "/v2/example/single_nested/deeper_nested_value/{single_nested.deeper_nested_value.value}",
            "*",
        )
        .unwrap()
        .add_mapping(HttpMethod::Post, "/v2/example/oneof_value_string/echo/{oneof_value_string}")
        .unwrap()
        .add_mapping(HttpMethod::Post, "/v2/example/oneof_value_nested/name/echo/{oneof_value_nested.name}")
        .unwrap()
        .add_mapping(
            HttpMethod::Post,
            "/v2/example/oneof_value_nested/deeper_nested_value/value/echo/{oneof_value_nested.deeper_nested_value.value}",
        )
        .unwrap()
        .add_mapping(
            HttpMethod::Post,
            "/v2/example/oneof_value_nested/oneof_value_terminal/echo/{oneof_value_nested.oneof_value_terminal}",
        )
        .unwrap()
        .add_mapping(
            HttpMethod::Post,
            "/v2/example/oneof_value_nested/oneof_value_deeper_nested/value/echo/{oneof_value_nested.oneof_value_deeper_nested.value}",
        )
        .unwrap()
        .add_mapping(
            HttpMethod::Post,
            "/v2/example/oneof_conflict/{oneof_value_string}/{oneof_value_nested.name}",
        )
        .unwrap()
        .add_body_mapping(HttpMethod::Post, "/v2/example/oneof_value_string/echo", "oneof_value_string")
        .unwrap()
        .add_body_mapping(HttpMethod::Post, "/v2/example/oneof_value_nested/echo", "oneof_value_nested")
        .unwrap()
        .add_body_mapping(HttpMethod::Post, "/v2/example/oneof_body/{oneof_value_nested.name}", "*")
        .unwrap()
        .add_body_mapping(
            HttpMethod::Post,
            "/v2/example/oneof_field/{oneof_value_nested.name}",
            "oneof_value_string",
        )
        .unwrap();

    let repeated = RouteMapping::new(ABE_SERVICE, "CheckGetQueryParams", schema.repeated.clone(), schema.repeated.clone())
        .add_mapping(
            HttpMethod::Get,
            "/v1/example/a_bit_of_everything_repeated/{path_repeated_float_value}/{path_repeated_int64_value}/{path_repeated_uint32_value}/{path_repeated_bool_value}/{path_repeated_string_value}/{path_repeated_bytes_value}/{path_repeated_enum_value}",
        )
        .unwrap();

    let timeout = RouteMapping::new(ABE_SERVICE, "Timeout", schema.empty.clone(), schema.empty.clone())
        .add_mapping(HttpMethod::Get, "/v2/example/timeout")
        .unwrap();
    let timeout_handler = handler_fn(|req: RpcRequest| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        echo_reply(req)
    });

    let debug_info = schema.debug_info.clone();
    let error_with_details = RouteMapping::new(ABE_SERVICE, "ErrorWithDetails", schema.empty.clone(), schema.empty.clone())
        .add_mapping(HttpMethod::Get, "/v2/example/errorwithdetails")
        .unwrap();
    let error_with_details_handler = handler_fn(move |_req: RpcRequest| {
        let mut detail = DynamicMessage::new(debug_info.clone());
        detail.set("stack_entries", Value::List(vec!["foo:1".into()])).unwrap();
        detail.set("detail", "error debug details").unwrap();
        async move { RpcReply::error(Status::unknown("with details").with_detail(detail)) }
    });

    let stream_error = RouteMapping::new(ABE_SERVICE, "StreamError", schema.empty.clone(), schema.string_message.clone())
        .kind(MethodKind::ServerStreaming)
        .add_mapping(HttpMethod::Get, "/v2/example/stream_error")
        .unwrap();
    let string_message = schema.string_message.clone();
    let stream_error_handler = handler_fn(move |_req: RpcRequest| {
        let mut first = DynamicMessage::new(string_message.clone());
        first.set("value", "first").unwrap();
        let items = vec![
            Ok(first.clone()),
            Err(Status::new(Code::Aborted, "stream broke")),
            Ok(first),
        ];
        async move { RpcReply::streaming(futures_util::stream::iter(items)) }
    });

    let stream_not_found = RouteMapping::new(ABE_SERVICE, "StreamNotFound", schema.empty.clone(), schema.string_message.clone())
        .kind(MethodKind::ServerStreaming)
        .add_mapping(HttpMethod::Get, "/v2/example/stream_not_found")
        .unwrap();
    let stream_not_found_handler = handler_fn(|_req: RpcRequest| async {
        let items: Vec<Result<DynamicMessage, Status>> = vec![Err(Status::not_found("nothing to stream"))];
        RpcReply::streaming(futures_util::stream::iter(items))
    });

    let post_empty = RouteMapping::new(ABE_SERVICE, "PostWithEmptyBody", schema.response_in.clone(), schema.empty.clone())
        .add_body_mapping(HttpMethod::Post, "/v2/example/postwithemptybody/{data}", "*")
        .unwrap();
    let empty = schema.empty.clone();
    let post_empty_handler = handler_fn(move |_req: RpcRequest| {
        let empty = empty.clone();
        async move { RpcReply::unary(DynamicMessage::new(empty)) }
    });

    let response_body = RouteMapping::new(
        "grpc.gateway.examples.ResponseBodyService",
        "GetResponseBody",
        schema.response_in.clone(),
        schema.response_out.clone(),
    )
    .rule(
        HttpRule::new(HttpMethod::Get, "/responsebody/{data}")
            .unwrap()
            .response_body("response")
            .unwrap(),
    );
    let response_out = schema.response_out.clone();
    let response_body_handler = handler_fn(move |req: RpcRequest| {
        let response_out = response_out.clone();
        async move {
            let data = req
                .message()
                .and_then(|m| m.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let value_desc = response_out
                .field_by_name("response")
                .and_then(|f| f.kind().as_message())
                .cloned()
                .unwrap();
            let mut value = DynamicMessage::new(value_desc);
            value.set("data", data).unwrap();
            let mut out = DynamicMessage::new(response_out);
            out.set("response", value).unwrap();
            RpcReply::unary(out)
        }
    });

    let echo_handler = handler_fn(|req: RpcRequest| async move { echo_reply(req) });

    RestGateway::builder(config)
        .route(echo, echo_handler.clone())
        .route(echo_body, echo_body_handler)
        .route(metadata, metadata_handler)
        .route(create, create_handler.clone())
        .route(create_body, create_handler)
        .route(bulk_create, bulk_create_handler)
        .route(bulk_echo, bulk_echo_handler)
        .route(abe_echo, echo_handler.clone())
        .route(lookup, lookup_handler)
        .route(list, list_handler)
        .route(deep_path_echo, echo_handler.clone())
        .route(repeated, echo_handler)
        .route(timeout, timeout_handler)
        .route(error_with_details, error_with_details_handler)
        .route(stream_error, stream_error_handler)
        .route(stream_not_found, stream_not_found_handler)
        .route(post_empty, post_empty_handler)
        .route(response_body, response_body_handler)
        .build()
        .unwrap()
        .router()
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    trailers: Option<HeaderMap>,
    body: bytes::Bytes,
}

impl Reply {
    fn json(&self) -> JsonValue {
        serde_json::from_slice(&self.body).unwrap()
    }

    /// Each newline-terminated document of a streamed body
    fn lines(&self) -> Vec<JsonValue> {
        let mut out = Vec::new();
        for doc in serde_json::Deserializer::from_slice(&self.body).into_iter::<JsonValue>() {
            out.push(doc.unwrap());
        }
        out
    }
}

async fn send(router: &Router, req: Request<Body>) -> Reply {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let collected = response.into_body().collect().await.unwrap();
    let trailers = collected.trailers().cloned();
    Reply {
        status,
        headers,
        trailers,
        body: collected.to_bytes(),
    }
}

fn request(method: Method, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri, Body::empty())
}

fn post(uri: &str, body: &'static str) -> Request<Body> {
    request(Method::POST, uri, body)
}

#[tokio::test]
async fn test_echo_path_parameter() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, post("/v1/example/echo/myid", "{}")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"id": "myid"}));
    assert_eq!(reply.headers[header::CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn test_echo_oneof_bindings() {
    let router = gateway(GatewayConfig::default());

    let reply = send(&router, get("/v1/example/echo/myid/10/golang")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"id": "myid", "num": "10", "lang": "golang"}));

    let reply = send(&router, get("/v1/example/echo1/myid/10/golang")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({"id": "myid", "line_num": "10", "status": {"note": "golang"}})
    );

    let reply = send(&router, get("/v1/example/echo2/golang")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"no": {"note": "golang"}}));
}

#[tokio::test]
async fn test_echo_body_metadata_and_trailers() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, post("/v1/example/echo_body", r#"{"id":"example"}"#)).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"id": "example"}));
    assert_eq!(reply.headers["grpc-metadata-foo"], "foo1");
    assert_eq!(reply.headers["grpc-metadata-bar"], "bar1");

    let declared: Vec<_> = reply.headers.get_all(header::TRAILER).iter().collect();
    assert_eq!(declared.len(), 2);

    let trailers = reply.trailers.expect("trailers");
    assert_eq!(trailers["grpc-trailer-foo"], "foo2");
    assert_eq!(trailers["grpc-trailer-bar"], "bar2");
}

#[tokio::test]
async fn test_trailers_can_be_disabled() {
    let router = gateway(GatewayConfig::default().forward_trailers(false));
    let reply = send(&router, post("/v1/example/echo_body", r#"{"id":"example"}"#)).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.trailers.is_none());
    assert!(reply.headers.get(header::TRAILER).is_none());
}

#[tokio::test]
async fn test_inbound_metadata() {
    let router = gateway(GatewayConfig::default());
    let mut req = Request::builder()
        .uri("/v1/example/metadata")
        .header(header::HOST, "gateway.example.com")
        .header("Grpc-Metadata-Tenant", "acme")
        .header(header::AUTHORIZATION, "Bearer token")
        .header(header::USER_AGENT, "integration")
        .header("X-Not-Forwarded", "dropped")
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 40000))));

    let reply = send(&router, req).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers["grpc-metadata-tenant"], "acme");
    assert_eq!(reply.headers["grpc-metadata-authorization"], "Bearer token");
    assert_eq!(reply.headers["grpc-metadata-grpcgateway-user-agent"], "integration");
    assert_eq!(reply.headers["grpc-metadata-x-forwarded-host"], "gateway.example.com");
    assert_eq!(reply.headers["grpc-metadata-x-forwarded-for"], "192.0.2.1");
    assert!(reply.headers.get("grpc-metadata-x-not-forwarded").is_none());
}

#[tokio::test]
async fn test_forward_response_hook_sets_content_type() {
    let config = GatewayConfig::default().forward_response_hook(|headers, _| {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.docker.plugins.v1.1+json"),
        );
        Ok(())
    });
    let router = gateway(config);
    let reply = send(&router, post("/v1/example/echo/myid", "{}")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::CONTENT_TYPE], "application/vnd.docker.plugins.v1.1+json");
}

#[tokio::test]
async fn test_abe_create_from_path() {
    let router = gateway(GatewayConfig::default());
    let uri = "/v1/example/a_bit_of_everything/1.500000/2.500000/4294967296/separator/9223372036854775807/-2147483648/9223372036854775807/4294967295/true/strprefix/foo/4294967295/2147483647/-4611686018427387904/2147483647/4611686018427387903/bar/camelCase/ONE";
    let reply = send(&router, post(uri, "{}")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({
            "uuid": "uuid-1",
            "float_value": 1.5,
            "double_value": 2.5,
            "int64_value": "4294967296",
            "uint64_value": "9223372036854775807",
            "int32_value": -2147483648i64,
            "fixed64_value": "9223372036854775807",
            "fixed32_value": 4294967295u32,
            "bool_value": true,
            "string_value": "strprefix/foo",
            "uint32_value": 4294967295u32,
            "enum_value": "ONE",
            "sfixed32_value": 2147483647,
            "sfixed64_value": "-4611686018427387904",
            "sint32_value": 2147483647,
            "sint64_value": "4611686018427387903",
            "oneof_value_string": "bar",
            "non_conventional_name_value": "camelCase",
        })
    );
}

#[tokio::test]
async fn test_abe_create_body_lookup_and_list() {
    let router = gateway(GatewayConfig::default());
    let payload = r#"{
        "float_value": 1.5,
        "double_value": 2.5,
        "int64_value": "4294967296",
        "uint64_value": "9223372036854775807",
        "int32_value": -2147483648,
        "bool_value": true,
        "string_value": "strprefix/foo",
        "bytes_value": "AAH/",
        "enum_value": "ONE",
        "repeated_string_value": ["a", "b", "c"],
        "map_value": {"a": "ONE", "b": 0},
        "nested": [{"name": "hoge", "amount": 10}, {"name": "fuga", "amount": 20}],
        "oneof_value_nested": {"name": "bar", "amount": 10}
    }"#;
    let created = send(&router, post("/v1/example/a_bit_of_everything", payload)).await;
    assert_eq!(created.status, StatusCode::OK);
    let created = created.json();
    assert_eq!(created["uuid"], "uuid-1");
    assert_eq!(created["bytes_value"], "AAH/");
    assert_eq!(created["map_value"], json!({"a": "ONE", "b": "ZERO"}));
    assert_eq!(created["nested"][1], json!({"name": "fuga", "amount": 20}));
    assert_eq!(created["oneof_value_nested"], json!({"name": "bar", "amount": 10}));

    let found = send(&router, get("/v1/example/a_bit_of_everything/uuid-1")).await;
    assert_eq!(found.status, StatusCode::OK);
    assert_eq!(found.json(), created);

    let missing = send(&router, get("/v1/example/a_bit_of_everything/not_exist")).await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["code"], Code::NotFound.as_i32());

    send(&router, post("/v1/example/a_bit_of_everything", r#"{"string_value":"second"}"#)).await;
    let listed = send(&router, get("/v1/example/a_bit_of_everything")).await;
    assert_eq!(listed.status, StatusCode::OK);
    assert_eq!(listed.headers["grpc-metadata-count"], "listed");
    let items = listed.lines();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["result"], created);
    assert_eq!(items[1]["result"]["string_value"], "second");
    assert!(listed.body.ends_with(b"\n"));
}

#[tokio::test]
async fn test_abe_bulk_create() {
    let router = gateway(GatewayConfig::default());
    let chunks: Vec<Result<String, std::io::Error>> = ["foo", "bar", "baz", "qux", "quux"]
        .iter()
        .map(|val| {
            Ok(format!(
                "{}\n",
                json!({
                    "int64_value": "4294967296",
                    "string_value": format!("strprefix/{}", val),
                    "enum_value": "ONE",
                    "nested": [{"name": "hoge", "amount": 10}, {"name": "fuga", "amount": 20}],
                })
            ))
        })
        .collect();
    let body = Body::from_stream(futures_util::stream::iter(chunks));

    let reply = send(&router, request(Method::POST, "/v1/example/a_bit_of_everything/bulk", body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({}));
    assert_eq!(reply.headers["grpc-metadata-count"], "5");

    let trailers = reply.trailers.expect("trailers");
    assert_eq!(trailers["grpc-trailer-foo"], "foo2");
    assert_eq!(trailers["grpc-trailer-bar"], "bar2");

    let listed = send(&router, get("/v1/example/a_bit_of_everything")).await;
    let values: Vec<_> = listed
        .lines()
        .iter()
        .map(|item| item["result"]["string_value"].clone())
        .collect();
    assert_eq!(
        values,
        vec![
            json!("strprefix/foo"),
            json!("strprefix/bar"),
            json!("strprefix/baz"),
            json!("strprefix/qux"),
            json!("strprefix/quux"),
        ]
    );
}

#[tokio::test]
async fn test_abe_bulk_create_malformed_element() {
    let router = gateway(GatewayConfig::default());
    let reply = send(
        &router,
        post("/v1/example/a_bit_of_everything/bulk", "{\"string_value\":\"ok\"}\n{\"int64_value\":\"x\"}\n"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["code"], Code::InvalidArgument.as_i32());
}

#[tokio::test]
async fn test_abe_bulk_echo() {
    let router = gateway(GatewayConfig::default());
    let want: Vec<JsonValue> = (0..1000).map(|i| json!({"value": format!("message {}", i)})).collect();
    let chunks: Vec<Result<String, std::io::Error>> = want.iter().map(|msg| Ok(format!("{}\n", msg))).collect();
    let body = Body::from_stream(futures_util::stream::iter(chunks));

    let reply = send(&router, request(Method::POST, "/v1/example/a_bit_of_everything/echo", body)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let got: Vec<JsonValue> = reply
        .lines()
        .into_iter()
        .map(|item| {
            assert!(item.get("error").is_none(), "unexpected error envelope: {}", item);
            item["result"].clone()
        })
        .collect();
    assert_eq!(got, want);
}

#[tokio::test]
async fn test_abe_bulk_echo_zero_length() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, request(Method::POST, "/v1/example/a_bit_of_everything/echo", Body::empty())).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn test_additional_bindings() {
    let router = gateway(GatewayConfig::default());
    let streamed = Body::from_stream(futures_util::stream::iter(vec![
        Ok::<_, std::io::Error>("\"hel"),
        Ok("lo\""),
    ]));

    let requests = vec![
        get("/v1/example/a_bit_of_everything/echo/hello"),
        post("/v2/example/echo", "\"hello\""),
        request(Method::POST, "/v2/example/echo", streamed),
        get("/v2/example/echo?value=hello"),
    ];
    for (i, req) in requests.into_iter().enumerate() {
        let reply = send(&router, req).await;
        assert_eq!(reply.status, StatusCode::OK, "binding {}", i);
        assert_eq!(reply.json(), json!({"value": "hello"}), "binding {}", i);
    }
}

#[tokio::test]
async fn test_abe_repeated_path_values() {
    let router = gateway(GatewayConfig::default());
    let reply = send(
        &router,
        get("/v1/example/a_bit_of_everything_repeated/1.5,-1.5/4294967296,-9223372036854775808/0,4294967295/true,false/foo,bar/AA==,_w==/ZERO,1"),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.json(),
        json!({
            "path_repeated_float_value": [1.5, -1.5],
            "path_repeated_int64_value": ["4294967296", "-9223372036854775808"],
            "path_repeated_uint32_value": [0, 4294967295u32],
            "path_repeated_bool_value": [true, false],
            "path_repeated_string_value": ["foo", "bar"],
            "path_repeated_bytes_value": ["AA==", "/w=="],
            "path_repeated_enum_value": ["ZERO", "ONE"],
        })
    );
}

#[tokio::test]
async fn test_deep_fields() {
    let router = gateway(GatewayConfig::default());
    let cases = [
        ("/v1/example/a_bit_of_everything/foo", json!({"single_nested": {"name": "foo"}})),
        (
            "/v2/example/single_nested/deeper_nested_value/foo",
            json!({"single_nested": {"deeper_nested_value": {"value": "foo"}}}),
        ),
    ];
    for (uri, want) in cases {
        let reply = send(&router, post(uri, "")).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", uri);
        assert_eq!(reply.json(), want, "{}", uri);
    }
}

#[tokio::test]
async fn test_oneof_bindings() {
    let router = gateway(GatewayConfig::default());
    let cases = [
        ("/v2/example/oneof_value_string/echo/foo", "", json!({"oneof_value_string": "foo"})),
        (
            "/v2/example/oneof_value_nested/name/echo/foo",
            "",
            json!({"oneof_value_nested": {"name": "foo"}}),
        ),
        (
            "/v2/example/oneof_value_nested/deeper_nested_value/value/echo/foo",
            "",
            json!({"oneof_value_nested": {"deeper_nested_value": {"value": "foo"}}}),
        ),
        (
            "/v2/example/oneof_value_nested/oneof_value_terminal/echo/foo",
            "",
            json!({"oneof_value_nested": {"oneof_value_terminal": "foo"}}),
        ),
        (
            "/v2/example/oneof_value_nested/oneof_value_deeper_nested/value/echo/foo",
            "",
            json!({"oneof_value_nested": {"oneof_value_deeper_nested": {"value": "foo"}}}),
        ),
        ("/v2/example/oneof_value_string/echo", "\"foo\"", json!({"oneof_value_string": "foo"})),
        (
            "/v2/example/oneof_value_nested/echo",
            r#"{"name": "foo", "amount": 123}"#,
            json!({"oneof_value_nested": {"name": "foo", "amount": 123}}),
        ),
    ];
    for (uri, payload, want) in cases {
        let reply = send(&router, post(uri, payload)).await;
        assert_eq!(reply.status, StatusCode::OK, "{}", uri);
        assert_eq!(reply.json(), want, "{}", uri);
    }
}

#[tokio::test]
async fn test_oneof_conflict_is_rejected() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, post("/v2/example/oneof_conflict/foo/bar", "")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["code"], Code::InvalidArgument.as_i32());
}

#[tokio::test]
async fn test_oneof_conflict_between_body_and_path() {
    let router = gateway(GatewayConfig::default());
    let cases = [
        post("/v2/example/oneof_body/x", r#"{"oneof_value_string":"from-body"}"#),
        post("/v2/example/oneof_field/x", r#""from-body""#),
        post("/v2/example/oneof_value_string/echo/foo?oneof_value_nested.name=bar", ""),
    ];
    for req in cases {
        let uri = req.uri().to_string();
        let reply = send(&router, req).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(reply.json()["code"], Code::InvalidArgument.as_i32(), "{}", uri);
    }

    let reply = send(&router, post("/v2/example/oneof_body/x", r#"{"oneof_value_nested":{"amount":3}}"#)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"oneof_value_nested": {"name": "x", "amount": 3}}));
}

#[tokio::test]
async fn test_query_decoding() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v1/example/echo/myid/10?lang=go+lang%21")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json(), json!({"id": "myid", "num": "10", "lang": "go lang!"}));

    for uri in [
        "/v1/example/echo/myid/10?lang=%zz",
        "/v1/example/echo/myid/10?lang=%FF%FE",
        "/v1/example/echo/%FF/10",
    ] {
        let reply = send(&router, get(uri)).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(reply.json()["code"], Code::InvalidArgument.as_i32(), "{}", uri);
    }
}

#[tokio::test]
async fn test_timeout() {
    let router = gateway(GatewayConfig::default());
    let req = Request::builder()
        .uri("/v2/example/timeout")
        .header("Grpc-Timeout", "10m")
        .body(Body::empty())
        .unwrap();
    let reply = send(&router, req).await;

    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(reply.json()["code"], Code::DeadlineExceeded.as_i32());
}

#[tokio::test]
async fn test_error_with_details() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v2/example/errorwithdetails")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = reply.json();
    assert_eq!(body["code"], Code::Unknown.as_i32());
    assert_eq!(body["error"], "with details");
    assert_eq!(
        body["details"],
        json!([{
            "@type": "type.googleapis.com/google.rpc.DebugInfo",
            "stack_entries": ["foo:1"],
            "detail": "error debug details",
        }])
    );
}

#[tokio::test]
async fn test_stream_error_ends_stream() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v2/example/stream_error")).await;

    assert_eq!(reply.status, StatusCode::OK);
    let items = reply.lines();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], json!({"result": {"value": "first"}}));
    assert_eq!(items[1]["error"]["code"], Code::Aborted.as_i32());
    assert_eq!(items[1]["error"]["error"], "stream broke");
}

#[tokio::test]
async fn test_stream_failing_before_first_message() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v2/example/stream_not_found")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json(), json!({"error": "nothing to stream", "code": 5, "details": []}));
}

#[tokio::test]
async fn test_abe_bulk_echo_document_limit() {
    let router = gateway(GatewayConfig::default().max_stream_document(32));

    let body = "{\"value\":\"short\"}\n{\"value\":\"this document is longer than the limit\"}\n";
    let reply = send(&router, post("/v1/example/a_bit_of_everything/echo", body)).await;
    assert_eq!(reply.status, StatusCode::OK);
    let items = reply.lines();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], json!({"result": {"value": "short"}}));
    assert_eq!(items[1]["error"]["code"], Code::InvalidArgument.as_i32());

    let body = "{\"value\":\"this document is longer than the limit\"}";
    let reply = send(&router, post("/v1/example/a_bit_of_everything/echo", body)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_with_empty_body() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, request(Method::POST, "/v2/example/postwithemptybody/name", Body::empty())).await;

    assert_eq!(reply.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_path() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, post("/", "{}")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["code"], Code::NotFound.as_i32());
}

#[tokio::test]
async fn test_method_not_allowed() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v1/example/echo/myid")).await;

    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_invalid_argument() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/v1/example/echo/myid/not_int64")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["code"], Code::InvalidArgument.as_i32());
}

#[tokio::test]
async fn test_response_body() {
    let router = gateway(GatewayConfig::default());
    let reply = send(&router, get("/responsebody/foo")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(&reply.body[..], br#"{"data":"foo"}"#);
}
