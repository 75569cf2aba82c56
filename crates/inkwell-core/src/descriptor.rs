//! Message, field and enum descriptors.
//!
//! Descriptors are the schema half of the message model: they are built once
//! (usually at startup, next to the route table) and shared behind `Arc` by
//! every [`DynamicMessage`](crate::DynamicMessage) created from them.

use crate::error::MessageError;
use crate::path::FieldPath;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Prefix used when rendering a message type as an `Any` type URL
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Kind of a field's value (element kind for repeated and map fields)
#[derive(Debug, Clone)]
pub enum FieldKind {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Enum(Arc<EnumDescriptor>),
    Message(Arc<MessageDescriptor>),
}

impl FieldKind {
    /// Short lowercase name of the kind, as used in error messages
    pub fn name(&self) -> &str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int32 => "int32",
            FieldKind::Int64 => "int64",
            FieldKind::Uint32 => "uint32",
            FieldKind::Uint64 => "uint64",
            FieldKind::Sint32 => "sint32",
            FieldKind::Sint64 => "sint64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Sfixed32 => "sfixed32",
            FieldKind::Sfixed64 => "sfixed64",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Enum(e) => e.full_name(),
            FieldKind::Message(m) => m.full_name(),
        }
    }

    /// Returns the message descriptor if this is a message kind
    pub fn as_message(&self) -> Option<&Arc<MessageDescriptor>> {
        match self {
            FieldKind::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the enum descriptor if this is an enum kind
    pub fn as_enum(&self) -> Option<&Arc<EnumDescriptor>> {
        match self {
            FieldKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, FieldKind::Message(_))
    }
}

/// How many values a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one value
    Singular,
    /// Ordered list of values
    Repeated,
    /// String-keyed map of values
    Map,
}

/// Descriptor of a single field
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    json_name: String,
    number: u32,
    kind: FieldKind,
    cardinality: Cardinality,
    oneof: Option<usize>,
}

impl FieldDescriptor {
    /// Field name as declared
    pub fn name(&self) -> &str {
        &self.name
    }

    /// lowerCamelCase JSON name
    pub fn json_name(&self) -> &str {
        &self.json_name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_list(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }

    pub fn is_map(&self) -> bool {
        self.cardinality == Cardinality::Map
    }

    /// Index of the oneof group this field belongs to, if any
    pub fn oneof_index(&self) -> Option<usize> {
        self.oneof
    }
}

/// Descriptor of an enumerated type
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    full_name: String,
    values: Vec<(String, i32)>,
}

impl EnumDescriptor {
    /// Create an enum descriptor from `(name, number)` pairs
    pub fn new<I, S>(full_name: impl Into<String>, values: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        Arc::new(Self {
            full_name: full_name.into(),
            values: values.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        })
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Look up a value number by its symbolic name
    pub fn number_of(&self, name: &str) -> Option<i32> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    /// Look up the symbolic name of a value number
    pub fn name_of(&self, number: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == number)
            .map(|(n, _)| n.as_str())
    }

    pub fn contains(&self, number: i32) -> bool {
        self.values.iter().any(|(_, v)| *v == number)
    }
}

/// Descriptor of a message type
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    full_name: String,
    fields: Vec<FieldDescriptor>,
    oneofs: Vec<String>,
}

impl MessageDescriptor {
    /// Start building a message descriptor
    pub fn builder(full_name: impl Into<String>) -> MessageDescriptorBuilder {
        MessageDescriptorBuilder {
            full_name: full_name.into(),
            fields: Vec::new(),
            oneofs: Vec::new(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// `Any` type URL of this message type
    pub fn type_url(&self) -> String {
        format!("{}{}", TYPE_URL_PREFIX, self.full_name)
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Oneof group names, indexed by [`FieldDescriptor::oneof_index`]
    pub fn oneofs(&self) -> &[String] {
        &self.oneofs
    }

    pub fn oneof_name(&self, index: usize) -> Option<&str> {
        self.oneofs.get(index).map(String::as_str)
    }

    /// Find a field by declared name, falling back to its JSON name
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.json_name == name))
    }

    pub fn field_by_number(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    /// Resolve a dotted field path through nested singular message fields
    pub fn field_by_path(&self, path: &FieldPath) -> Option<&FieldDescriptor> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = self;
        for segment in parents {
            let field = current.field_by_name(segment)?;
            if field.cardinality != Cardinality::Singular {
                return None;
            }
            current = field.kind.as_message()?;
        }
        current.field_by_name(last)
    }
}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

/// Builder for [`MessageDescriptor`]
///
/// Field numbers are assigned in declaration order starting at 1.
pub struct MessageDescriptorBuilder {
    full_name: String,
    fields: Vec<FieldDescriptor>,
    oneofs: Vec<String>,
}

impl MessageDescriptorBuilder {
    /// Add a singular field
    pub fn field(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, Cardinality::Singular, None)
    }

    /// Add a repeated field
    pub fn repeated(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, Cardinality::Repeated, None)
    }

    /// Add a string-keyed map field with values of `kind`
    pub fn map(self, name: &str, kind: FieldKind) -> Self {
        self.push(name, kind, Cardinality::Map, None)
    }

    /// Add a oneof group and its member fields
    pub fn oneof<'a, I>(mut self, name: &str, members: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, FieldKind)>,
    {
        let index = self.oneofs.len();
        self.oneofs.push(name.to_string());
        for (field, kind) in members {
            self = self.push(field, kind, Cardinality::Singular, Some(index));
        }
        self
    }

    fn push(mut self, name: &str, kind: FieldKind, cardinality: Cardinality, oneof: Option<usize>) -> Self {
        let number = self.fields.len() as u32 + 1;
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            json_name: to_json_name(name),
            number,
            kind,
            cardinality,
            oneof,
        });
        self
    }

    /// Finish the descriptor, rejecting duplicate field or oneof names
    pub fn build(self) -> Result<Arc<MessageDescriptor>, MessageError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(MessageError::DuplicateField {
                    message: self.full_name.clone(),
                    field: field.name.clone(),
                });
            }
        }
        let mut groups = HashSet::new();
        for oneof in &self.oneofs {
            if !groups.insert(oneof.as_str()) {
                return Err(MessageError::DuplicateField {
                    message: self.full_name.clone(),
                    field: oneof.clone(),
                });
            }
        }

        Ok(Arc::new(MessageDescriptor {
            full_name: self.full_name,
            fields: self.fields,
            oneofs: self.oneofs,
        }))
    }
}

/// Derive the lowerCamelCase JSON name of a declared field name
pub fn to_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
