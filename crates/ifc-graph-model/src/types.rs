// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for entity graph data
//!
//! This module defines the values that appear in a physical file and the owned
//! snapshot of an entity handed out by resolvers.

use crate::DeclarationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Type-safe entity identifier
///
/// Wraps the raw instance name (e.g., #123 becomes EntityId(123))
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize, Default,
)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(id: u32) -> Self {
        EntityId(id)
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0 as u64
    }
}

/// Tri-state LOGICAL value (`.T.`, `.F.`, `.U.`)
///
/// BOOLEAN attributes use the first two states only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Logical {
    True,
    False,
    Unknown,
}

impl Logical {
    /// Convert to a boolean, `None` for `Unknown`
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Logical::True => Some(true),
            Logical::False => Some(false),
            Logical::Unknown => None,
        }
    }

    /// Encoding letter used between the dots
    pub fn letter(self) -> char {
        match self {
            Logical::True => 'T',
            Logical::False => 'F',
            Logical::Unknown => 'U',
        }
    }
}

impl From<bool> for Logical {
    fn from(value: bool) -> Self {
        if value {
            Logical::True
        } else {
            Logical::False
        }
    }
}

/// Decoded attribute value
///
/// Represents any value that can appear in an entity's attribute list.
/// Entity references are kept as ids; resolving them to instances is an
/// explicit store lookup.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum AttributeValue {
    /// Omitted value ($)
    #[default]
    Null,
    /// Derived value (*)
    Derived,
    /// Entity reference (#123)
    EntityRef(EntityId),
    /// Boolean / logical value
    Logical(Logical),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value (escape sequences already decoded)
    String(String),
    /// Binary value, hex digits as written ("0FF")
    Binary(String),
    /// Enumeration value (.VALUE.)
    Enum(String),
    /// Aggregate of values
    List(Vec<AttributeValue>),
    /// Typed value like IFCLABEL('text')
    TypedValue(String, Vec<AttributeValue>),
}

impl AttributeValue {
    /// Try to get as entity reference
    pub fn as_entity_ref(&self) -> Option<EntityId> {
        match self {
            AttributeValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Try to get as string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            AttributeValue::TypedValue(_, args) if !args.is_empty() => args[0].as_string(),
            _ => None,
        }
    }

    /// Try to get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Integer(i) => Some(*i as f64),
            AttributeValue::TypedValue(_, args) if !args.is_empty() => args[0].as_float(),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::TypedValue(_, args) if !args.is_empty() => args[0].as_integer(),
            _ => None,
        }
    }

    /// Try to get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Logical(l) => l.as_bool(),
            AttributeValue::TypedValue(_, args) if !args.is_empty() => args[0].as_bool(),
            _ => None,
        }
    }

    /// Try to get as enumeration tag
    pub fn as_enum(&self) -> Option<&str> {
        match self {
            AttributeValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as list
    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Check if value is omitted
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Visit every entity reference, descending into aggregates, in order
    pub fn for_each_reference(&self, f: &mut impl FnMut(EntityId)) {
        match self {
            AttributeValue::EntityRef(id) => f(*id),
            AttributeValue::List(items) | AttributeValue::TypedValue(_, items) => {
                for item in items {
                    item.for_each_reference(f);
                }
            }
            _ => {}
        }
    }

    /// All entity references in this value, in order (duplicates kept)
    pub fn references(&self) -> Vec<EntityId> {
        let mut refs = Vec::new();
        self.for_each_reference(&mut |id| refs.push(id));
        refs
    }

    /// Whether `target` is referenced anywhere in this value
    pub fn contains_reference(&self, target: EntityId) -> bool {
        match self {
            AttributeValue::EntityRef(id) => *id == target,
            AttributeValue::List(items) | AttributeValue::TypedValue(_, items) => {
                items.iter().any(|item| item.contains_reference(target))
            }
            _ => false,
        }
    }

    /// Drop every reference to `target`
    ///
    /// A direct reference becomes `$`; aggregate members referencing the
    /// target are removed from the aggregate.
    pub fn detach_reference(&mut self, target: EntityId) {
        match self {
            AttributeValue::EntityRef(id) if *id == target => *self = AttributeValue::Null,
            AttributeValue::List(items) => {
                items.retain(|item| item.as_entity_ref() != Some(target));
                for item in items.iter_mut() {
                    item.detach_reference(target);
                }
            }
            AttributeValue::TypedValue(_, args) => {
                for arg in args.iter_mut() {
                    arg.detach_reference(target);
                }
            }
            _ => {}
        }
    }
}

/// Collect the references of an attribute list, in declared order
pub fn collect_references(attributes: &[AttributeValue]) -> Vec<EntityId> {
    let mut refs = Vec::new();
    for attr in attributes {
        attr.for_each_reference(&mut |id| refs.push(id));
    }
    refs
}

/// Owned snapshot of one entity
///
/// Handed out by [`crate::EntityResolver`] implementations; cheap to clone
/// because the attribute list is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedEntity {
    /// Entity instance name
    pub id: EntityId,
    /// Upper-case type name as written in the file
    pub type_name: String,
    /// Declaration in the active schema, if the type is known
    pub declaration: Option<DeclarationId>,
    /// Materialized attribute values
    pub attributes: Arc<[AttributeValue]>,
}

impl DecodedEntity {
    /// Get attribute at index
    pub fn get(&self, index: usize) -> Option<&AttributeValue> {
        self.attributes.get(index)
    }

    /// Get entity reference at index
    pub fn get_ref(&self, index: usize) -> Option<EntityId> {
        self.get(index).and_then(|v| v.as_entity_ref())
    }

    /// Get string at index
    pub fn get_string(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|v| v.as_string())
    }

    /// Get float at index
    pub fn get_float(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(|v| v.as_float())
    }

    /// Get enum string at index
    pub fn get_enum(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(|v| v.as_enum())
    }

    /// Get list at index
    pub fn get_list(&self, index: usize) -> Option<&[AttributeValue]> {
        self.get(index).and_then(|v| v.as_list())
    }

    /// Get list of entity references at index
    pub fn get_refs(&self, index: usize) -> Option<Vec<EntityId>> {
        self.get_list(index)
            .map(|list| list.iter().filter_map(|v| v.as_entity_ref()).collect())
    }

    /// Case-insensitive type name comparison
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name.eq_ignore_ascii_case(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> AttributeValue {
        AttributeValue::List(vec![
            AttributeValue::EntityRef(EntityId(2)),
            AttributeValue::List(vec![
                AttributeValue::EntityRef(EntityId(3)),
                AttributeValue::Integer(1),
            ]),
            AttributeValue::EntityRef(EntityId(2)),
        ])
    }

    #[test]
    fn test_references_descend_into_aggregates() {
        assert_eq!(
            nested().references(),
            vec![EntityId(2), EntityId(3), EntityId(2)]
        );
        assert!(nested().contains_reference(EntityId(3)));
        assert!(!nested().contains_reference(EntityId(4)));
    }

    #[test]
    fn test_detach_reference() {
        let mut value = nested();
        value.detach_reference(EntityId(2));
        assert_eq!(
            value,
            AttributeValue::List(vec![AttributeValue::List(vec![
                AttributeValue::EntityRef(EntityId(3)),
                AttributeValue::Integer(1),
            ])])
        );

        let mut direct = AttributeValue::EntityRef(EntityId(3));
        direct.detach_reference(EntityId(3));
        assert!(direct.is_null());
    }

    #[test]
    fn test_typed_value_accessors() {
        let label = AttributeValue::TypedValue(
            "IFCLABEL".to_string(),
            vec![AttributeValue::String("Wall".to_string())],
        );
        assert_eq!(label.as_string(), Some("Wall"));

        let flag = AttributeValue::TypedValue(
            "IFCBOOLEAN".to_string(),
            vec![AttributeValue::Logical(Logical::True)],
        );
        assert_eq!(flag.as_bool(), Some(true));
        assert_eq!(AttributeValue::Logical(Logical::Unknown).as_bool(), None);
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId(12).to_string(), "#12");
    }
}
