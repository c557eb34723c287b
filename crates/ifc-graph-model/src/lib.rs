// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IFC-Graph Model - Shared types, schema metadata and traits
//!
//! This crate holds the vocabulary shared between the STEP loader and anything
//! that consumes an entity graph: identifiers, attribute values, the schema
//! metadata describing entity declarations, the header record and the
//! read-only resolver trait.
//!
//! # Architecture
//!
//! - [`EntityId`] / [`AttributeValue`] - the values found in a physical file
//! - [`SchemaDefinition`] / [`EntityDeclaration`] - schema metadata consumed
//!   read-only by the store (attribute lists, super/subtypes, inverses)
//! - [`SchemaRegistry`] - maps `FILE_SCHEMA` identifiers to catalogues
//! - [`EntityResolver`] - backend-agnostic entity lookup
//!
//! # Example
//!
//! ```
//! use ifc_graph_model::SchemaRegistry;
//!
//! let registry = SchemaRegistry::with_builtin();
//! let schema = registry.resolve("IFC4").unwrap();
//! let wall = schema.declaration_by_name("IfcWall").unwrap();
//! let product = schema.declaration_by_name("IfcProduct").unwrap();
//! assert!(schema.is_subtype_of(wall.id(), product.id()));
//! ```

pub mod catalogue;
pub mod error;
pub mod header;
pub mod resolver;
pub mod schema;
pub mod types;

// Re-export all public types
pub use error::*;
pub use header::*;
pub use resolver::*;
pub use schema::*;
pub use types::*;
