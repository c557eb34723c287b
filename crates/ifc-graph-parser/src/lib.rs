// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC-Graph Parser - Lazy STEP loader and indexed entity graph store
//!
//! Loads ISO-10303-21 physical files into an [`EntityStore`]: an arena of
//! entity instances with indices by id, type, type closure, guid and inverse
//! reference.
//!
//! # Features
//!
//! - **Streaming load** - statements are split with `memchr` from any
//!   buffered reader, never holding more than one statement
//! - **Token-level indexing** - the load pass records types, references and
//!   guids without building attribute values
//! - **Lazy materialization** - attributes are parsed once, on first access,
//!   safe under concurrent readers
//! - **Mutation** - add, remove and rewrite entities with every index kept
//!   consistent
//! - **Round trip** - [`StepWriter`] serializes a store back to a file
//!
//! # Example
//!
//! ```
//! use ifc_graph_parser::{load_str, RemovalPolicy};
//! use ifc_graph_model::EntityId;
//!
//! let mut store = load_str("ISO-10303-21;
//! HEADER;
//! FILE_DESCRIPTION((''),'2;1');
//! FILE_NAME('','',(''),(''),'','','');
//! FILE_SCHEMA(('IFC4'));
//! ENDSEC;
//! DATA;
//! #1=IFCCARTESIANPOINT((0.,0.));
//! #2=IFCPOLYLOOP((#1,#1));
//! ENDSEC;
//! END-ISO-10303-21;
//! ").unwrap();
//!
//! assert_eq!(store.instances_by_reference(EntityId(1)), &[EntityId(2)]);
//! assert_eq!(store.traverse(EntityId(2), -1), vec![EntityId(2), EntityId(1)]);
//! assert!(store.remove_entity(EntityId(1), RemovalPolicy::Restrict).is_err());
//! ```

mod charset;
mod entity;
mod header;
mod lexer;
mod loader;
mod materialize;
mod source;
mod statement;
mod store;
pub mod typed;
mod units;
mod writer;

pub use charset::{decode_string, encode_string};
pub use entity::{AttributeState, EntityInstance, LazyAttributeList, NewEntity};
pub use header::{apply_header_record, create_timestamp, default_header, write_header};
pub use lexer::{Lexer, Position, Span, Token, TokenKind};
pub use loader::{ProgressCallback, StepLoader};
pub use materialize::{materialize, parse_arguments, scan_arguments, ArgumentScan};
pub use source::ByteSource;
pub use statement::{Statement, StatementReader};
pub use store::{EntityRecord, EntityStore, ReferenceSet, RemovalPolicy, StoreState};
pub use typed::{EntityClass, Typed};
pub use units::{find_unit, scales, Unit};
pub use writer::{format_real, write_value, StepWriter};

use ifc_graph_model::Result;
use std::path::Path;

/// Quick load of in-memory text with the built-in schemas
pub fn load_str(text: &str) -> Result<EntityStore> {
    StepLoader::new().load_str(text)
}

/// Quick load of a file with the built-in schemas
pub fn load_path(path: impl AsRef<Path>) -> Result<EntityStore> {
    StepLoader::new().load_path(path)
}
