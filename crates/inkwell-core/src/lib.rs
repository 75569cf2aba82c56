//! Core types for the Inkwell HTTP/JSON to RPC gateway.
//!
//! This crate provides the value types shared by every gateway layer:
//! - Status codes, call status and the JSON error body
//! - Call metadata
//! - The structured message model (descriptors, values, dynamic messages)
//! - Field paths and extracted request values

pub mod descriptor;
pub mod error;
pub mod message;
pub mod metadata;
pub mod path;
pub mod value;

pub use descriptor::{Cardinality, EnumDescriptor, FieldDescriptor, FieldKind, MessageDescriptor};
pub use error::{Code, ErrorBody, MessageError, Status};
pub use message::{DynamicMessage, OneofSelection};
pub use metadata::Metadata;
pub use path::{ExtractedValue, FieldPath, ValueSource};
pub use value::Value;
