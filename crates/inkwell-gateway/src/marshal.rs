//! JSON marshaling of dynamic messages.
//!
//! Encoding follows the proto3 JSON mapping: 64-bit integers are rendered as
//! strings, enums by name, bytes as standard base64 and non-finite floats as
//! `"NaN"`, `"Infinity"` or `"-Infinity"`.

use crate::binder::{decode_base64, parse_scalar, ScalarParseError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use inkwell_core::{Cardinality, DynamicMessage, FieldDescriptor, FieldKind, MessageDescriptor, Value};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// JSON content type
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// JSON body or stream element could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("field '{field}': expected {expected}")]
    TypeMismatch { field: String, expected: String },

    #[error("field '{field}': {source}")]
    InvalidValue {
        field: String,
        source: ScalarParseError,
    },

    #[error("unknown field '{field}' in message {message}")]
    UnknownField { message: String, field: String },

    #[error("more than one member of oneof '{0}' is set")]
    OneofConflict(String),
}

/// Marshaling options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Emit declared field names instead of lowerCamelCase JSON names
    pub use_proto_names: bool,
    /// Emit fields holding their zero value
    pub emit_defaults: bool,
    /// Emit enum values as numbers
    pub enums_as_ints: bool,
    /// Skip unknown keys when decoding instead of failing
    pub discard_unknown: bool,
}

impl Default for MarshalOptions {
    fn default() -> Self {
        Self {
            use_proto_names: true,
            emit_defaults: false,
            enums_as_ints: false,
            discard_unknown: false,
        }
    }
}

/// Converts messages to and from JSON
#[derive(Debug, Clone, Default)]
pub struct Marshaler {
    options: MarshalOptions,
}

impl Marshaler {
    pub fn new(options: MarshalOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MarshalOptions {
        &self.options
    }

    pub fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    /// Encode a message as JSON bytes
    pub fn encode(&self, message: &DynamicMessage) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_value(message))
    }

    /// Render a message as a JSON object
    pub fn to_value(&self, message: &DynamicMessage) -> JsonValue {
        let mut object = Map::new();
        for field in message.descriptor().fields() {
            let key = self.key(field);
            match message.get_field(field) {
                Some(value) => {
                    if field.oneof_index().is_none() && !self.options.emit_defaults && value.is_default() {
                        continue;
                    }
                    object.insert(key, self.field_to_value(field, value));
                }
                None if self.options.emit_defaults && field.oneof_index().is_none() => {
                    let value = match (field.cardinality(), field.kind()) {
                        (Cardinality::Singular, FieldKind::Message(_)) => JsonValue::Null,
                        _ => self.field_to_value(field, &Value::default_for_field(field)),
                    };
                    object.insert(key, value);
                }
                None => {}
            }
        }
        JsonValue::Object(object)
    }

    /// Render the value of one field, honouring its cardinality
    pub fn field_to_value(&self, field: &FieldDescriptor, value: &Value) -> JsonValue {
        match value {
            Value::List(items) => {
                JsonValue::Array(items.iter().map(|v| self.element_to_value(field.kind(), v)).collect())
            }
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.element_to_value(field.kind(), v)))
                    .collect(),
            ),
            other => self.element_to_value(field.kind(), other),
        }
    }

    fn element_to_value(&self, kind: &FieldKind, value: &Value) -> JsonValue {
        match value {
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::I32(v) => JsonValue::from(*v),
            Value::U32(v) => JsonValue::from(*v),
            Value::I64(v) => JsonValue::String(v.to_string()),
            Value::U64(v) => JsonValue::String(v.to_string()),
            // Shortest decimal form of the f32, not of its f64 widening.
            Value::F32(v) => float_to_value(v.to_string().parse().unwrap_or(f64::from(*v))),
            Value::F64(v) => float_to_value(*v),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(STANDARD.encode(b)),
            Value::EnumNumber(n) => {
                let name = kind.as_enum().and_then(|e| e.name_of(*n));
                match name {
                    Some(name) if !self.options.enums_as_ints => JsonValue::String(name.to_string()),
                    _ => JsonValue::from(*n),
                }
            }
            Value::Message(m) => self.to_value(m),
            Value::List(items) => JsonValue::Array(items.iter().map(|v| self.element_to_value(kind, v)).collect()),
            Value::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.element_to_value(kind, v)))
                    .collect(),
            ),
        }
    }

    fn key(&self, field: &FieldDescriptor) -> String {
        if self.options.use_proto_names {
            field.name().to_string()
        } else {
            field.json_name().to_string()
        }
    }

    /// Decode JSON bytes into a message of type `descriptor`
    pub fn decode(&self, descriptor: &Arc<MessageDescriptor>, bytes: &[u8]) -> Result<DynamicMessage, DecodeError> {
        let json: JsonValue = serde_json::from_slice(bytes)?;
        self.decode_value(descriptor, json)
    }

    /// Decode a parsed JSON value into a message of type `descriptor`
    pub fn decode_value(
        &self,
        descriptor: &Arc<MessageDescriptor>,
        json: JsonValue,
    ) -> Result<DynamicMessage, DecodeError> {
        let JsonValue::Object(object) = json else {
            return Err(DecodeError::TypeMismatch {
                field: descriptor.full_name().to_string(),
                expected: "object".to_string(),
            });
        };

        let mut message = DynamicMessage::new(descriptor.clone());
        let mut oneofs = HashSet::new();
        for (key, value) in object {
            let Some(field) = descriptor.field_by_name(&key) else {
                if self.options.discard_unknown {
                    continue;
                }
                return Err(DecodeError::UnknownField {
                    message: descriptor.full_name().to_string(),
                    field: key,
                });
            };
            if value.is_null() {
                continue;
            }
            if let Some(index) = field.oneof_index() {
                if !oneofs.insert(index) {
                    let name = descriptor.oneof_name(index).unwrap_or_default();
                    return Err(DecodeError::OneofConflict(name.to_string()));
                }
            }

            let value = self.decode_field(field, value)?;
            message
                .set_field(field, value)
                .map_err(|_| DecodeError::TypeMismatch {
                    field: field.name().to_string(),
                    expected: field.kind().name().to_string(),
                })?;
        }
        Ok(message)
    }

    /// Decode the JSON value of one field, honouring its cardinality
    pub fn decode_field(&self, field: &FieldDescriptor, json: JsonValue) -> Result<Value, DecodeError> {
        let mismatch = |expected: &str| DecodeError::TypeMismatch {
            field: field.name().to_string(),
            expected: expected.to_string(),
        };

        match field.cardinality() {
            Cardinality::Singular => self.decode_element(field, json),
            Cardinality::Repeated => {
                let JsonValue::Array(items) = json else {
                    return Err(mismatch("array"));
                };
                items
                    .into_iter()
                    .map(|item| self.decode_element(field, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            Cardinality::Map => {
                let JsonValue::Object(entries) = json else {
                    return Err(mismatch("object"));
                };
                let mut map = BTreeMap::new();
                for (key, item) in entries {
                    map.insert(key, self.decode_element(field, item)?);
                }
                Ok(Value::Map(map))
            }
        }
    }

    fn decode_element(&self, field: &FieldDescriptor, json: JsonValue) -> Result<Value, DecodeError> {
        let kind = field.kind();
        let mismatch = || DecodeError::TypeMismatch {
            field: field.name().to_string(),
            expected: kind.name().to_string(),
        };
        let invalid = |source| DecodeError::InvalidValue {
            field: field.name().to_string(),
            source,
        };
        let out_of_range = |raw: &Number| DecodeError::InvalidValue {
            field: field.name().to_string(),
            source: ScalarParseError {
                kind: kind.name().to_string(),
                raw: raw.to_string(),
            },
        };

        match (kind, json) {
            (FieldKind::Message(desc), json @ JsonValue::Object(_)) => {
                self.decode_value(desc, json).map(Value::Message)
            }
            (FieldKind::String, JsonValue::String(s)) => Ok(Value::String(s)),
            (FieldKind::Bool, JsonValue::Bool(b)) => Ok(Value::Bool(b)),
            (FieldKind::Bytes, JsonValue::String(s)) => decode_base64(&s).map(Value::Bytes).ok_or_else(|| {
                invalid(ScalarParseError {
                    kind: kind.name().to_string(),
                    raw: s,
                })
            }),
            (FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32, JsonValue::Number(n)) => integral_i64(&n)
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::I32)
                .ok_or_else(|| out_of_range(&n)),
            (FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64, JsonValue::Number(n)) => {
                integral_i64(&n).map(Value::I64).ok_or_else(|| out_of_range(&n))
            }
            (FieldKind::Uint32 | FieldKind::Fixed32, JsonValue::Number(n)) => integral_u64(&n)
                .and_then(|v| u32::try_from(v).ok())
                .map(Value::U32)
                .ok_or_else(|| out_of_range(&n)),
            (FieldKind::Uint64 | FieldKind::Fixed64, JsonValue::Number(n)) => {
                integral_u64(&n).map(Value::U64).ok_or_else(|| out_of_range(&n))
            }
            (FieldKind::Double, JsonValue::Number(n)) => n.as_f64().map(Value::F64).ok_or_else(|| out_of_range(&n)),
            (FieldKind::Float, JsonValue::Number(n)) => n
                .as_f64()
                .filter(|v| v.abs() <= f64::from(f32::MAX))
                .map(|v| Value::F32(v as f32))
                .ok_or_else(|| out_of_range(&n)),
            (FieldKind::Enum(desc), JsonValue::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .filter(|v| desc.contains(*v))
                .map(Value::EnumNumber)
                .ok_or_else(|| out_of_range(&n)),
            (
                FieldKind::Double
                | FieldKind::Float
                | FieldKind::Int32
                | FieldKind::Sint32
                | FieldKind::Sfixed32
                | FieldKind::Int64
                | FieldKind::Sint64
                | FieldKind::Sfixed64
                | FieldKind::Uint32
                | FieldKind::Fixed32
                | FieldKind::Uint64
                | FieldKind::Fixed64
                | FieldKind::Enum(_),
                JsonValue::String(s),
            ) => parse_scalar(kind, &s).map_err(invalid),
            _ => Err(mismatch()),
        }
    }
}

fn float_to_value(v: f64) -> JsonValue {
    if v.is_nan() {
        JsonValue::String("NaN".to_string())
    } else if v.is_infinite() {
        let text = if v > 0.0 { "Infinity" } else { "-Infinity" };
        JsonValue::String(text.to_string())
    } else {
        Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number)
    }
}

// Integer JSON numbers, also accepting floats with no fractional part.
fn integral_i64(n: &Number) -> Option<i64> {
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn integral_u64(n: &Number) -> Option<u64> {
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
            .map(|f| f as u64)
    })
}
