//! Dynamic structured messages.
//!
//! A [`DynamicMessage`] is a field tree addressed through its
//! [`MessageDescriptor`]. Ordinary fields live in a number-keyed map; each
//! oneof group is a single tagged slot ([`OneofSelection`]) so that the
//! selected variant and its payload are always replaced together.

use crate::descriptor::{FieldDescriptor, MessageDescriptor};
use crate::error::MessageError;
use crate::path::FieldPath;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Currently selected member of a oneof group and its payload
#[derive(Debug, Clone, PartialEq)]
pub struct OneofSelection {
    field: u32,
    value: Value,
}

impl OneofSelection {
    /// Field number of the selected member
    pub fn field_number(&self) -> u32 {
        self.field
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Message instance described at runtime by a [`MessageDescriptor`]
#[derive(Debug, Clone)]
pub struct DynamicMessage {
    descriptor: Arc<MessageDescriptor>,
    fields: BTreeMap<u32, Value>,
    oneofs: Vec<Option<OneofSelection>>,
}

impl DynamicMessage {
    /// Create an empty message of the given type
    pub fn new(descriptor: Arc<MessageDescriptor>) -> Self {
        let oneofs = vec![None; descriptor.oneofs().len()];
        Self {
            descriptor,
            fields: BTreeMap::new(),
            oneofs,
        }
    }

    pub fn descriptor(&self) -> &Arc<MessageDescriptor> {
        &self.descriptor
    }

    /// Get a field value by name; unset fields and unselected oneof members yield `None`
    pub fn get(&self, name: &str) -> Option<&Value> {
        let field = self.descriptor.field_by_name(name)?;
        self.get_field(field)
    }

    /// Get the value of `field`, which must belong to this message's descriptor
    pub fn get_field(&self, field: &FieldDescriptor) -> Option<&Value> {
        match field.oneof_index() {
            Some(index) => self
                .oneofs
                .get(index)?
                .as_ref()
                .filter(|sel| sel.field == field.number())
                .map(|sel| &sel.value),
            None => self.fields.get(&field.number()),
        }
    }

    /// Follow a dotted path through nested messages
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (last, parents) = path.segments().split_last()?;
        let mut current = self;
        for segment in parents {
            current = current.get(segment)?.as_message()?;
        }
        current.get(last)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a field by name, validating the value against the field's kind
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), MessageError> {
        let descriptor = self.descriptor.clone();
        let field = descriptor
            .field_by_name(name)
            .ok_or_else(|| MessageError::UnknownField {
                message: descriptor.full_name().to_string(),
                field: name.to_string(),
            })?;
        self.set_field(field, value.into())
    }

    /// Set `field` to `value`
    ///
    /// For a oneof member this replaces the group's selection and payload in
    /// one assignment, discarding any previously selected variant.
    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<(), MessageError> {
        if !value.is_valid_for_field(field) {
            return Err(MessageError::KindMismatch {
                field: field.name().to_string(),
                expected: field.kind().name().to_string(),
            });
        }

        match field.oneof_index() {
            Some(index) => self.select(index, field.number(), value)?,
            None => {
                self.fields.insert(field.number(), value);
            }
        }
        Ok(())
    }

    /// Mutable access to `field`, inserting its zero value if unset
    ///
    /// For a oneof member that is not currently selected, the member becomes
    /// the selected variant (with a zero payload) and the previous variant is
    /// discarded.
    pub fn field_mut(&mut self, field: &FieldDescriptor) -> &mut Value {
        match field.oneof_index() {
            Some(index) => {
                if index >= self.oneofs.len() {
                    self.oneofs.resize(index + 1, None);
                }
                let slot = &mut self.oneofs[index];
                if slot.as_ref().is_some_and(|sel| sel.field != field.number()) {
                    *slot = None;
                }
                &mut slot
                    .get_or_insert_with(|| OneofSelection {
                        field: field.number(),
                        value: Value::default_for_field(field),
                    })
                    .value
            }
            None => self
                .fields
                .entry(field.number())
                .or_insert_with(|| Value::default_for_field(field)),
        }
    }

    /// Clear a field; clearing a selected oneof member empties its group
    pub fn clear_field(&mut self, field: &FieldDescriptor) {
        match field.oneof_index() {
            Some(index) => {
                if let Some(slot) = self.oneofs.get_mut(index) {
                    if slot.as_ref().is_some_and(|sel| sel.field == field.number()) {
                        *slot = None;
                    }
                }
            }
            None => {
                self.fields.remove(&field.number());
            }
        }
    }

    /// Descriptor of the selected member of a oneof group
    pub fn which_oneof(&self, oneof: &str) -> Option<&FieldDescriptor> {
        let index = self.descriptor.oneofs().iter().position(|o| o == oneof)?;
        let selection = self.oneofs.get(index)?.as_ref()?;
        self.descriptor.field_by_number(selection.field)
    }

    /// Set fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDescriptor, &Value)> + '_ {
        self.descriptor
            .fields()
            .iter()
            .filter_map(move |field| self.get_field(field).map(|value| (field, value)))
    }

    fn select(&mut self, index: usize, field: u32, value: Value) -> Result<(), MessageError> {
        let slot = self
            .oneofs
            .get_mut(index)
            .ok_or_else(|| MessageError::UnknownField {
                message: self.descriptor.full_name().to_string(),
                field: format!("oneof #{}", index),
            })?;
        *slot = Some(OneofSelection { field, value });
        Ok(())
    }
}

impl PartialEq for DynamicMessage {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.full_name() == other.descriptor.full_name()
            && self.fields == other.fields
            && self.oneofs == other.oneofs
    }
}
