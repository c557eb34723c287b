// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity instance records

use crate::lexer::Span;
use ifc_graph_model::{AttributeValue, DeclarationId, EntityId, ParseError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Observable state of a [`LazyAttributeList`]
#[derive(Clone, Copy, Debug)]
pub enum AttributeState<'a> {
    /// Raw argument list not yet parsed
    Unparsed(Span),
    /// Parsed attribute values
    Parsed(&'a [AttributeValue]),
    /// Parsing was attempted and failed; the error is cached
    Failed(&'a ParseError),
}

/// Attribute list that moves from unparsed to parsed at most once
///
/// The transition goes through a [`OnceCell`]: one reader computes, concurrent
/// first readers wait for its result, and no reader ever sees a partially
/// built list.
#[derive(Debug)]
pub struct LazyAttributeList {
    raw: Option<Span>,
    parsed: OnceCell<Result<Arc<[AttributeValue]>>>,
}

impl LazyAttributeList {
    /// List backed by a raw argument span of the source
    pub fn unparsed(span: Span) -> Self {
        LazyAttributeList {
            raw: Some(span),
            parsed: OnceCell::new(),
        }
    }

    /// Already materialized list
    pub fn parsed(values: Arc<[AttributeValue]>) -> Self {
        LazyAttributeList {
            raw: None,
            parsed: OnceCell::with_value(Ok(values)),
        }
    }

    pub fn state(&self) -> AttributeState<'_> {
        match (self.parsed.get(), self.raw) {
            (Some(Ok(values)), _) => AttributeState::Parsed(values),
            (Some(Err(err)), _) => AttributeState::Failed(err),
            (None, Some(span)) => AttributeState::Unparsed(span),
            // Lists built from values are initialized at construction
            (None, None) => AttributeState::Parsed(&[]),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self.parsed.get(), Some(Ok(_)))
    }

    /// Raw argument span, if the list came from a source
    pub fn raw_span(&self) -> Option<Span> {
        self.raw
    }

    /// Parsed values if materialization already happened and succeeded
    pub fn get(&self) -> Option<&Arc<[AttributeValue]>> {
        match self.parsed.get() {
            Some(Ok(values)) => Some(values),
            _ => None,
        }
    }

    /// Return the cached outcome, running `parse` on first access
    pub fn get_or_materialize(
        &self,
        parse: impl FnOnce(Span) -> Result<Arc<[AttributeValue]>>,
    ) -> Result<Arc<[AttributeValue]>> {
        self.parsed
            .get_or_init(|| match self.raw {
                Some(span) => parse(span),
                None => Ok(Arc::from(Vec::new())),
            })
            .clone()
    }
}

/// One node of the entity graph, owned by the store
#[derive(Debug)]
pub struct EntityInstance {
    pub(crate) id: EntityId,
    pub(crate) type_name: Arc<str>,
    pub(crate) declaration: Option<DeclarationId>,
    pub(crate) attributes: LazyAttributeList,
}

impl EntityInstance {
    pub(crate) fn new(
        id: EntityId,
        type_name: Arc<str>,
        declaration: Option<DeclarationId>,
        attributes: LazyAttributeList,
    ) -> Self {
        EntityInstance {
            id,
            type_name,
            declaration,
            attributes,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Upper-case type name as written in the file
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Declaration in the active schema; `None` for untyped entities
    pub fn declaration(&self) -> Option<DeclarationId> {
        self.declaration
    }

    pub fn attribute_state(&self) -> AttributeState<'_> {
        self.attributes.state()
    }
}

/// Entity to insert with [`crate::EntityStore::add_entity`]
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntity {
    /// Requested id; a fresh one is allocated when `None`
    pub id: Option<EntityId>,
    /// Type name, matched case-insensitively against the schema
    pub type_name: String,
    pub attributes: Vec<AttributeValue>,
}

impl NewEntity {
    pub fn new(type_name: impl Into<String>, attributes: Vec<AttributeValue>) -> Self {
        NewEntity {
            id: None,
            type_name: type_name.into(),
            attributes,
        }
    }

    /// Request a specific id
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }
}
