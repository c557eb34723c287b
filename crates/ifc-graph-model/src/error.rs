// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for loading and mutating an entity graph

use crate::EntityId;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for store and parser operations
pub type Result<T> = std::result::Result<T, ParseError>;

/// Malformed byte sequence in the physical file
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Lexical error at byte {offset}: {message}")]
pub struct LexError {
    /// Absolute byte offset of the offending input
    pub offset: u64,
    /// Human-readable cause
    pub message: String,
}

impl LexError {
    /// Create a new lexical error
    pub fn new(offset: u64, message: impl Into<String>) -> Self {
        LexError {
            offset,
            message: message.into(),
        }
    }
}

/// Errors that can occur while loading, querying or mutating a model
///
/// The enum is `Clone` so that materialization outcomes (including failures)
/// can be cached per entity and reported again without re-lexing.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    /// Malformed token
    #[error(transparent)]
    Lex(#[from] LexError),

    /// Attribute list disagrees with the declared schema
    #[error("Schema mismatch on entity {entity}: {message}")]
    SchemaMismatch { entity: EntityId, message: String },

    /// Schema identifier not present in the registry
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// Entity type not declared by the active schema
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    /// Entity id already present in the store
    #[error("Duplicate entity id {0}")]
    DuplicateId(EntityId),

    /// GlobalId already used by another entity
    #[error("Duplicate GlobalId '{guid}' (already used by {existing})")]
    DuplicateGuid { guid: String, existing: EntityId },

    /// Unforced removal of an entity that other entities still reference
    #[error("Entity {entity} is still referenced by {referenced_by:?}")]
    DanglingReference {
        entity: EntityId,
        referenced_by: Vec<EntityId>,
    },

    /// Entity not found
    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    /// Failed to parse header section
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid physical file structure
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Load stopped by the caller's interrupt flag
    #[error("Load interrupted")]
    Interrupted,

    /// One entity of a batch insertion was rejected
    #[error("Entity at position {position} rejected: {source}")]
    Batch {
        position: usize,
        #[source]
        source: Box<ParseError>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Io(Arc::new(err))
    }
}

impl ParseError {
    /// Create a new format error
    pub fn format(msg: impl Into<String>) -> Self {
        ParseError::InvalidFormat(msg.into())
    }

    /// Create a new schema mismatch error
    pub fn schema_mismatch(entity: EntityId, msg: impl Into<String>) -> Self {
        ParseError::SchemaMismatch {
            entity,
            message: msg.into(),
        }
    }

    /// Whether the error is confined to a single entity
    pub fn is_entity_local(&self) -> bool {
        matches!(
            self,
            ParseError::Lex(_)
                | ParseError::SchemaMismatch { .. }
                | ParseError::UnknownType(_)
                | ParseError::DuplicateId(_)
                | ParseError::DuplicateGuid { .. }
                | ParseError::EntityNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_error_display_carries_offset() {
        let err = ParseError::from(LexError::new(42, "unterminated string"));
        assert_eq!(
            err.to_string(),
            "Lexical error at byte 42: unterminated string"
        );
        assert!(err.is_entity_local());
    }

    #[test]
    fn test_batch_error_keeps_position() {
        let err = ParseError::Batch {
            position: 3,
            source: Box::new(ParseError::DuplicateId(EntityId(7))),
        };
        assert_eq!(
            err.to_string(),
            "Entity at position 3 rejected: Duplicate entity id #7"
        );
    }
}
