//! Error types for the gateway and status to HTTP mapping

use crate::binder::FieldBindError;
use crate::marshal::{DecodeError, Marshaler, JSON_CONTENT_TYPE};
use crate::metadata::InvalidTimeout;
use crate::pattern::{PathDecodeError, PatternSyntaxError};
use crate::streaming::unary_body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use inkwell_core::{Code, ErrorBody, Status};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Route not found: {0}")]
    NoRouteMatch(String),

    #[error("Method not allowed: {method} for path {path}")]
    MethodMismatch { method: String, path: String },

    #[error("Invalid route {template}: {reason}")]
    InvalidRoute { template: String, reason: String },

    #[error(transparent)]
    Pattern(#[from] PatternSyntaxError),

    #[error(transparent)]
    Bind(#[from] FieldBindError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    PathDecode(#[from] PathDecodeError),

    #[error(transparent)]
    InvalidTimeout(#[from] InvalidTimeout),

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error(transparent)]
    Rpc(#[from] Status),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Status reported to the client for this error
    pub fn to_status(&self) -> Status {
        match self {
            GatewayError::NoRouteMatch(_) => Status::not_found("Not Found"),
            GatewayError::MethodMismatch { .. } => Status::unimplemented("Method Not Allowed"),
            GatewayError::Bind(_)
            | GatewayError::Decode(_)
            | GatewayError::PathDecode(_)
            | GatewayError::InvalidTimeout(_)
            | GatewayError::BodyRead(_) => Status::invalid_argument(self.to_string()),
            GatewayError::Rpc(status) => status.clone(),
            GatewayError::InvalidRoute { .. } | GatewayError::Pattern(_) | GatewayError::JsonSerialization(_) => {
                Status::internal(self.to_string())
            }
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::NoRouteMatch(_) => StatusCode::NOT_FOUND,
            GatewayError::MethodMismatch { .. } => StatusCode::METHOD_NOT_ALLOWED,
            other => http_status_from_code(other.to_status().code()),
        }
    }
}

/// HTTP status for a call status code
///
/// `CANCELLED` maps to 499 (client closed request).
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

/// Renders call statuses as HTTP statuses and JSON error bodies
#[derive(Debug, Clone, Default)]
pub struct ErrorMapper {
    marshaler: Marshaler,
}

impl ErrorMapper {
    pub fn new(marshaler: Marshaler) -> Self {
        Self { marshaler }
    }

    /// HTTP status and error body for `status`
    pub fn to_http(&self, status: &Status) -> (StatusCode, ErrorBody) {
        (http_status_from_code(status.code()), self.error_body(status))
    }

    /// Error body for `status`; each detail carries its `@type`
    pub fn error_body(&self, status: &Status) -> ErrorBody {
        let mut body = ErrorBody::new(status.code(), status.message());
        body.details = status
            .details()
            .iter()
            .map(|detail| {
                let mut object = Map::new();
                object.insert("@type".to_string(), JsonValue::String(detail.descriptor().type_url()));
                if let JsonValue::Object(fields) = self.marshaler.to_value(detail) {
                    object.extend(fields);
                }
                JsonValue::Object(object)
            })
            .collect();
        body
    }

    /// Error response for a gateway error
    pub fn response(&self, err: &GatewayError) -> GatewayResponse {
        let status = err.to_status();
        log_status(&status);
        GatewayResponse::new(err.status_code(), self.error_body(&status))
    }
}

/// Log a failed call at a level matching its cause
pub(crate) fn log_status(status: &Status) {
    match status.code() {
        Code::Cancelled => debug!(reason = status.message(), "Call cancelled"),
        code if http_status_from_code(code).is_server_error() => {
            error!(code = %code, reason = status.message(), "Call failed")
        }
        code => warn!(code = %code, reason = status.message(), "Request rejected"),
    }
}

/// Error response: status, JSON body, extra headers and optional trailers
#[derive(Debug)]
pub struct GatewayResponse {
    status: StatusCode,
    body: ErrorBody,
    headers: HeaderMap,
    trailers: Option<HeaderMap>,
}

impl GatewayResponse {
    pub fn new(status: StatusCode, body: ErrorBody) -> Self {
        Self {
            status,
            body,
            headers: HeaderMap::new(),
            trailers: None,
        }
    }

    /// Add response headers, e.g. forwarded call metadata
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Send trailers after the body
    pub fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = Some(trailers);
        self
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let bytes = match serde_json::to_vec(&self.body) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "Failed to encode error body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let mut response = Response::new(unary_body(Bytes::from(bytes), self.trailers));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.extend(self.headers);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }
}

impl From<GatewayError> for GatewayResponse {
    fn from(err: GatewayError) -> Self {
        ErrorMapper::default().response(&err)
    }
}
