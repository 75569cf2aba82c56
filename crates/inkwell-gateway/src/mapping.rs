//! HTTP rule mapping for backend methods

use crate::error::{GatewayError, GatewayResult};
use crate::handler::MethodKind;
use crate::pattern::PathPattern;
use axum::http::Method;
use inkwell_core::{FieldPath, MessageDescriptor};
use std::fmt;
use std::sync::Arc;

/// HTTP methods supported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse HTTP method from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn from_method(method: &Method) -> Option<Self> {
        Self::from_str(method.as_str())
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the request message the HTTP body decodes into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySelector {
    /// `*`: the whole request message
    Whole,
    /// `""` or `-`: no body
    Empty,
    /// One named field of the request message
    Field(FieldPath),
}

impl BodySelector {
    pub fn parse(body: &str) -> GatewayResult<Self> {
        match body {
            "*" => Ok(BodySelector::Whole),
            "" | "-" => Ok(BodySelector::Empty),
            field => FieldPath::parse(field)
                .map(BodySelector::Field)
                .map_err(|e| GatewayError::InvalidRoute {
                    template: body.to_string(),
                    reason: e.to_string(),
                }),
        }
    }
}

/// One HTTP binding of a backend method
#[derive(Debug, Clone)]
pub struct HttpRule {
    pub http_method: HttpMethod,
    pub pattern: PathPattern,
    pub body: BodySelector,
    /// Field of the reply rendered as the response body
    pub response_body: Option<FieldPath>,
}

impl HttpRule {
    /// Create a rule without a request body
    pub fn new(http_method: HttpMethod, template: &str) -> GatewayResult<Self> {
        Ok(Self {
            http_method,
            pattern: PathPattern::compile(template)?,
            body: BodySelector::Empty,
            response_body: None,
        })
    }

    /// Set the body selector: `*`, `-` or a field path
    pub fn body(mut self, body: &str) -> GatewayResult<Self> {
        self.body = BodySelector::parse(body)?;
        Ok(self)
    }

    /// Render only `field` of the reply
    pub fn response_body(mut self, field: &str) -> GatewayResult<Self> {
        let path = FieldPath::parse(field).map_err(|e| GatewayError::InvalidRoute {
            template: self.pattern.template().to_string(),
            reason: e.to_string(),
        })?;
        self.response_body = Some(path);
        Ok(self)
    }
}

/// Route mapping from REST to a backend method
#[derive(Debug, Clone)]
pub struct RouteMapping {
    /// Service name (e.g., "grpc.gateway.examples.EchoService")
    pub service: String,
    /// Method name (e.g., "Echo")
    pub method: String,
    pub kind: MethodKind,
    pub input: Arc<MessageDescriptor>,
    pub output: Arc<MessageDescriptor>,
    /// HTTP bindings, tried in declaration order
    pub http_mappings: Vec<HttpRule>,
}

impl RouteMapping {
    /// Create a unary route mapping
    pub fn new(service: &str, method: &str, input: Arc<MessageDescriptor>, output: Arc<MessageDescriptor>) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            kind: MethodKind::Unary,
            input,
            output,
            http_mappings: Vec::new(),
        }
    }

    /// Set the streaming shape
    pub fn kind(mut self, kind: MethodKind) -> Self {
        self.kind = kind;
        self
    }

    /// Add a binding without a request body
    pub fn add_mapping(self, http_method: HttpMethod, template: &str) -> GatewayResult<Self> {
        let rule = HttpRule::new(http_method, template)?;
        Ok(self.rule(rule))
    }

    /// Add a binding whose body decodes into `body`
    pub fn add_body_mapping(self, http_method: HttpMethod, template: &str, body: &str) -> GatewayResult<Self> {
        let rule = HttpRule::new(http_method, template)?.body(body)?;
        Ok(self.rule(rule))
    }

    /// Add a prepared binding
    pub fn rule(mut self, rule: HttpRule) -> Self {
        self.http_mappings.push(rule);
        self
    }

    /// Full method name, `/package.Service/Method`
    pub fn full_method(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }

    /// Check every binding against the request and reply descriptors
    pub fn validate(&self) -> GatewayResult<()> {
        for rule in &self.http_mappings {
            let invalid = |reason: String| GatewayError::InvalidRoute {
                template: rule.pattern.template().to_string(),
                reason,
            };

            for path in rule.pattern.capture_paths() {
                let field = self
                    .input
                    .field_by_path(path)
                    .ok_or_else(|| invalid(format!("{} has no field {}", self.input, path)))?;
                if field.is_map() {
                    return Err(invalid(format!("map field {} cannot be a path parameter", path)));
                }
            }

            if let BodySelector::Field(path) = &rule.body {
                let field = self
                    .input
                    .field_by_path(path)
                    .ok_or_else(|| invalid(format!("{} has no body field {}", self.input, path)))?;
                if self.kind.is_client_streaming() {
                    return Err(invalid(format!("streaming request cannot bind body to {}", field.name())));
                }
            }
            if self.kind.is_client_streaming() && rule.body == BodySelector::Empty {
                return Err(invalid("streaming request requires body \"*\"".to_string()));
            }

            if let Some(path) = &rule.response_body {
                if self.output.field_by_path(path).is_none() {
                    return Err(invalid(format!("{} has no response field {}", self.output, path)));
                }
            }
        }
        Ok(())
    }
}
