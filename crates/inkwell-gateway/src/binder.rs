//! Binding of extracted path and query values into a request message.
//!
//! A [`FieldBinder`] borrows the message under construction for one binding
//! pass. Traversing a oneof member selects that variant; selecting a second
//! variant of a group that is already set, whether by this pass or by an
//! earlier one such as the request body, is an error.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use bytes::Bytes;
use inkwell_core::{
    Cardinality, DynamicMessage, ExtractedValue, FieldDescriptor, FieldKind, FieldPath, MessageError,
    Value, ValueSource,
};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Text could not be converted to a scalar of the requested kind
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse {raw:?} as {kind}")]
pub struct ScalarParseError {
    pub kind: String,
    pub raw: String,
}

/// Request input could not be bound into the message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldBindError {
    #[error("no field '{segment}' in path '{path}'")]
    UnknownField { path: String, segment: String },

    #[error("field '{segment}' in path '{path}' is not a message")]
    NotTraversable { path: String, segment: String },

    #[error("invalid value for field '{path}': {source}")]
    InvalidValue {
        path: String,
        source: ScalarParseError,
    },

    #[error("oneof '{oneof}' already has '{selected}' set, cannot also set '{conflicting}'")]
    OneofConflict {
        oneof: String,
        selected: String,
        conflicting: String,
    },

    #[error("field '{0}' is not repeated but received multiple values")]
    TooManyValues(String),

    #[error("binding map field '{0}' from request parameters is not supported")]
    Unsupported(String),

    #[error("malformed query component {0:?}")]
    MalformedQuery(String),

    #[error("value does not fit field '{path}': {source}")]
    Mismatch { path: String, source: MessageError },
}

/// Assigns values into one message, tracking oneof selections
pub struct FieldBinder<'m> {
    message: &'m mut DynamicMessage,
    selected: HashMap<(String, usize), String>,
}

impl<'m> FieldBinder<'m> {
    /// Start a binding pass; variants already selected in `message` count as bound
    pub fn new(message: &'m mut DynamicMessage) -> Self {
        let mut selected = HashMap::new();
        record_selections(message, "", &mut selected);
        Self { message, selected }
    }

    /// Bind one extracted value
    ///
    /// Path values addressed to a repeated field are split on commas, one
    /// element per item.
    pub fn bind(&mut self, extracted: &ExtractedValue) -> Result<(), FieldBindError> {
        let values = [extracted.value.as_str()];
        self.bind_text(&extracted.path, &values, extracted.source == ValueSource::Path)
    }

    /// Bind every value given for one query key
    pub fn bind_values(&mut self, path: &FieldPath, values: &[String]) -> Result<(), FieldBindError> {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        self.bind_text(path, &values, false)
    }

    /// Assign an already decoded value, e.g. a request body bound to a field
    pub fn assign(&mut self, path: &FieldPath, value: Value) -> Result<(), FieldBindError> {
        let (target, leaf) = self.walk(path)?;
        target
            .set_field(&leaf, value)
            .map_err(|source| FieldBindError::Mismatch {
                path: path.to_string(),
                source,
            })
    }

    fn bind_text(&mut self, path: &FieldPath, values: &[&str], split: bool) -> Result<(), FieldBindError> {
        let (target, leaf) = self.walk(path)?;
        let invalid = |source| FieldBindError::InvalidValue {
            path: path.to_string(),
            source,
        };

        match leaf.cardinality() {
            Cardinality::Map => Err(FieldBindError::Unsupported(path.to_string())),
            Cardinality::Repeated => {
                let mut items = Vec::new();
                for raw in values {
                    if split {
                        for part in raw.split(',') {
                            items.push(parse_scalar(leaf.kind(), part).map_err(invalid)?);
                        }
                    } else {
                        items.push(parse_scalar(leaf.kind(), raw).map_err(invalid)?);
                    }
                }
                if let Some(list) = target.field_mut(&leaf).as_list_mut() {
                    list.extend(items);
                }
                Ok(())
            }
            Cardinality::Singular => {
                let [raw] = values else {
                    return Err(FieldBindError::TooManyValues(path.to_string()));
                };
                let value = parse_scalar(leaf.kind(), raw).map_err(invalid)?;
                target
                    .set_field(&leaf, value)
                    .map_err(|source| FieldBindError::Mismatch {
                        path: path.to_string(),
                        source,
                    })
            }
        }
    }

    // Resolves `path` to the message owning its last segment, creating
    // intermediate messages and selecting oneof variants on the way.
    fn walk(&mut self, path: &FieldPath) -> Result<(&mut DynamicMessage, FieldDescriptor), FieldBindError> {
        let segments = path.segments();
        let mut descriptor = self.message.descriptor().clone();
        let mut prefix = String::new();
        let mut leaf = None;

        for (i, segment) in segments.iter().enumerate() {
            let field = descriptor
                .field_by_name(segment)
                .cloned()
                .ok_or_else(|| FieldBindError::UnknownField {
                    path: path.to_string(),
                    segment: segment.clone(),
                })?;

            if let Some(index) = field.oneof_index() {
                let selected = self
                    .selected
                    .entry((prefix.clone(), index))
                    .or_insert_with(|| field.name().to_string());
                if selected.as_str() != field.name() {
                    return Err(FieldBindError::OneofConflict {
                        oneof: descriptor.oneof_name(index).unwrap_or_default().to_string(),
                        selected: selected.clone(),
                        conflicting: field.name().to_string(),
                    });
                }
            }

            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(field.name());

            if i + 1 == segments.len() {
                leaf = Some(field);
            } else {
                descriptor = match (field.cardinality(), field.kind()) {
                    (Cardinality::Singular, FieldKind::Message(next)) => next.clone(),
                    _ => {
                        return Err(FieldBindError::NotTraversable {
                            path: path.to_string(),
                            segment: segment.clone(),
                        })
                    }
                };
            }
        }

        let leaf = leaf.ok_or_else(|| FieldBindError::UnknownField {
            path: path.to_string(),
            segment: String::new(),
        })?;

        let mut current: &mut DynamicMessage = self.message;
        for segment in &segments[..segments.len() - 1] {
            let field = current
                .descriptor()
                .field_by_name(segment)
                .cloned()
                .ok_or_else(|| FieldBindError::UnknownField {
                    path: path.to_string(),
                    segment: segment.clone(),
                })?;
            current = current
                .field_mut(&field)
                .as_message_mut()
                .ok_or_else(|| FieldBindError::NotTraversable {
                    path: path.to_string(),
                    segment: segment.clone(),
                })?;
        }

        Ok((current, leaf))
    }
}

// Oneof selections of `message` and its singular sub-messages, keyed by the
// dotted prefix of the owning message.
fn record_selections(message: &DynamicMessage, prefix: &str, out: &mut HashMap<(String, usize), String>) {
    for (field, value) in message.iter() {
        if let Some(index) = field.oneof_index() {
            out.insert((prefix.to_string(), index), field.name().to_string());
        }
        if field.cardinality() != Cardinality::Singular {
            continue;
        }
        if let Some(child) = value.as_message() {
            let nested = if prefix.is_empty() {
                field.name().to_string()
            } else {
                format!("{}.{}", prefix, field.name())
            };
            record_selections(child, &nested, out);
        }
    }
}

/// Split a raw query string into extracted values
///
/// `+` decodes to a space. A malformed `%` escape or an escape sequence that
/// is not UTF-8 fails the whole query. Keys that are not field paths are
/// skipped.
pub fn parse_query(query: &str) -> Result<Vec<ExtractedValue>, FieldBindError> {
    let mut values = Vec::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_query_component(key)?;
        let value = decode_query_component(value)?;
        match FieldPath::parse(&key) {
            Ok(path) => values.push(ExtractedValue::from_query(path, value)),
            Err(_) => debug!(key = %key, "Ignoring query parameter"),
        }
    }
    Ok(values)
}

fn decode_query_component(raw: &str) -> Result<String, FieldBindError> {
    let malformed = || FieldBindError::MalformedQuery(raw.to_string());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3).ok_or_else(malformed)?;
            if !escape.iter().all(u8::is_ascii_hexdigit) {
                return Err(malformed());
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| malformed())
}

/// Populate a message from a raw query string
///
/// Keys are dotted field paths (declared or JSON names). Keys that do not
/// name a field are ignored; keys overlapping a path-bound field are skipped.
pub fn populate_query(
    binder: &mut FieldBinder<'_>,
    query: &str,
    bound: &[FieldPath],
) -> Result<(), FieldBindError> {
    let mut grouped: Vec<(FieldPath, Vec<String>)> = Vec::new();
    for extracted in parse_query(query)? {
        match grouped.iter_mut().find(|(path, _)| *path == extracted.path) {
            Some((_, values)) => values.push(extracted.value),
            None => grouped.push((extracted.path, vec![extracted.value])),
        }
    }

    for (path, values) in grouped {
        if bound.iter().any(|b| b.shares_prefix(&path)) {
            continue;
        }
        match binder.bind_values(&path, &values) {
            Err(FieldBindError::UnknownField { .. }) => {
                debug!(key = %path, "Ignoring unknown query parameter");
            }
            result => result?,
        }
    }
    Ok(())
}

/// Parse text into a single value of `kind`
pub fn parse_scalar(kind: &FieldKind, raw: &str) -> Result<Value, ScalarParseError> {
    let fail = || ScalarParseError {
        kind: kind.name().to_string(),
        raw: raw.to_string(),
    };

    let value = match kind {
        FieldKind::String => Value::String(raw.to_string()),
        FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 => {
            Value::I32(raw.parse().map_err(|_| fail())?)
        }
        FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => {
            Value::I64(raw.parse().map_err(|_| fail())?)
        }
        FieldKind::Uint32 | FieldKind::Fixed32 => Value::U32(raw.parse().map_err(|_| fail())?),
        FieldKind::Uint64 | FieldKind::Fixed64 => Value::U64(raw.parse().map_err(|_| fail())?),
        FieldKind::Double => Value::F64(parse_float::<f64>(raw).ok_or_else(fail)?),
        FieldKind::Float => Value::F32(parse_float::<f32>(raw).ok_or_else(fail)?),
        FieldKind::Bool => match raw {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(fail()),
        },
        FieldKind::Bytes => Value::Bytes(decode_base64(raw).ok_or_else(fail)?),
        FieldKind::Enum(desc) => match desc.number_of(raw) {
            Some(number) => Value::EnumNumber(number),
            None => {
                let number: i32 = raw.parse().map_err(|_| fail())?;
                if !desc.contains(number) {
                    return Err(fail());
                }
                Value::EnumNumber(number)
            }
        },
        FieldKind::Message(_) => return Err(fail()),
    };
    Ok(value)
}

/// Float text: decimal or exponential, or one of `NaN`, `Infinity`, `-Infinity`
pub(crate) fn parse_float<F>(raw: &str) -> Option<F>
where
    F: std::str::FromStr + Float,
{
    match raw {
        "NaN" => Some(F::NAN),
        "Infinity" => Some(F::INFINITY),
        "-Infinity" => Some(F::NEG_INFINITY),
        _ => {
            if raw.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
                return None;
            }
            raw.parse::<F>().ok().filter(|v| v.is_finite())
        }
    }
}

pub(crate) trait Float: Copy {
    const NAN: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;
    fn is_finite(self) -> bool;
}

impl Float for f64 {
    const NAN: Self = f64::NAN;
    const INFINITY: Self = f64::INFINITY;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
}

impl Float for f32 {
    const NAN: Self = f32::NAN;
    const INFINITY: Self = f32::INFINITY;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
}

/// Standard or URL-safe base64, padded or not
pub(crate) fn decode_base64(raw: &str) -> Option<Bytes> {
    [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(raw).ok())
        .map(Bytes::from)
}
