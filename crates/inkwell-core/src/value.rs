//! Field values of a dynamic message.

use crate::descriptor::{Cardinality, FieldDescriptor, FieldKind};
use crate::message::DynamicMessage;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Value held by a field
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Bytes),
    EnumNumber(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Zero value of a single element of `kind`
    pub fn default_for_kind(kind: &FieldKind) -> Value {
        match kind {
            FieldKind::Double => Value::F64(0.0),
            FieldKind::Float => Value::F32(0.0),
            FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 => Value::I32(0),
            FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => Value::I64(0),
            FieldKind::Uint32 | FieldKind::Fixed32 => Value::U32(0),
            FieldKind::Uint64 | FieldKind::Fixed64 => Value::U64(0),
            FieldKind::Bool => Value::Bool(false),
            FieldKind::String => Value::String(String::new()),
            FieldKind::Bytes => Value::Bytes(Bytes::new()),
            FieldKind::Enum(_) => Value::EnumNumber(0),
            FieldKind::Message(desc) => Value::Message(DynamicMessage::new(desc.clone())),
        }
    }

    /// Zero value of a field, honouring its cardinality
    pub fn default_for_field(field: &FieldDescriptor) -> Value {
        match field.cardinality() {
            Cardinality::Singular => Self::default_for_kind(field.kind()),
            Cardinality::Repeated => Value::List(Vec::new()),
            Cardinality::Map => Value::Map(BTreeMap::new()),
        }
    }

    /// True for proto3 zero values; messages are never considered default
    pub fn is_default(&self) -> bool {
        match self {
            Value::Bool(b) => !*b,
            Value::I32(v) | Value::EnumNumber(v) => *v == 0,
            Value::I64(v) => *v == 0,
            Value::U32(v) => *v == 0,
            Value::U64(v) => *v == 0,
            Value::F32(v) => *v == 0.0,
            Value::F64(v) => *v == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Message(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
        }
    }

    /// Check that this value is a valid single element of `kind`
    pub fn is_valid_for_kind(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (Value::F64(_), FieldKind::Double) | (Value::F32(_), FieldKind::Float) => true,
            (Value::I32(_), FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32) => true,
            (Value::I64(_), FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64) => true,
            (Value::U32(_), FieldKind::Uint32 | FieldKind::Fixed32) => true,
            (Value::U64(_), FieldKind::Uint64 | FieldKind::Fixed64) => true,
            (Value::Bool(_), FieldKind::Bool) => true,
            (Value::String(_), FieldKind::String) => true,
            (Value::Bytes(_), FieldKind::Bytes) => true,
            (Value::EnumNumber(_), FieldKind::Enum(_)) => true,
            (Value::Message(m), FieldKind::Message(desc)) => m.descriptor().full_name() == desc.full_name(),
            _ => false,
        }
    }

    /// Check that this value fits `field`, including its cardinality
    pub fn is_valid_for_field(&self, field: &FieldDescriptor) -> bool {
        match (field.cardinality(), self) {
            (Cardinality::Singular, v) => v.is_valid_for_kind(field.kind()),
            (Cardinality::Repeated, Value::List(items)) => {
                items.iter().all(|v| v.is_valid_for_kind(field.kind()))
            }
            (Cardinality::Map, Value::Map(entries)) => {
                entries.values().all(|v| v.is_valid_for_kind(field.kind()))
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) | Value::EnumNumber(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::U32(v) => Some(i64::from(*v)),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_message_mut(&mut self) -> Option<&mut DynamicMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DynamicMessage> for Value {
    fn from(m: DynamicMessage) -> Self {
        Value::Message(m)
    }
}
