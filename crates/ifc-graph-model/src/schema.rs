// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Schema metadata consumed by the entity store
//!
//! A [`SchemaDefinition`] is an immutable catalogue of entity declarations.
//! Declarations are addressed by [`DeclarationId`], an index into the
//! catalogue, which is what the store keys its type indices on.

use crate::{ParseError, Result};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Handle of an entity declaration within one schema
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeclarationId(pub u16);

/// One explicit attribute of an entity
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeDecl {
    /// Attribute name (e.g. "GlobalId")
    pub name: String,
    /// Whether `$` is a valid value
    pub optional: bool,
}

/// Aggregate bounds of an inverse attribute (`SET [min:max]`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cardinality {
    pub min: u32,
    /// `None` for an unbounded upper limit (`?`)
    pub max: Option<u32>,
}

/// Inverse attribute declared on an entity
///
/// `IsDefinedBy : SET [0:?] OF IfcRelDefinesByProperties FOR RelatedObjects`
/// is stored as name `IsDefinedBy`, entity `IfcRelDefinesByProperties`, and the
/// flattened index of `RelatedObjects` on that entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InverseAttributeDecl {
    pub name: String,
    /// Referencing entity type
    pub entity: DeclarationId,
    /// Attribute of the referencing entity holding the reference
    pub attribute_index: usize,
    pub cardinality: Cardinality,
}

/// Immutable metadata node describing one entity type
#[derive(Clone, Debug)]
pub struct EntityDeclaration {
    id: DeclarationId,
    name: String,
    upper_name: String,
    supertype: Option<DeclarationId>,
    subtypes: Vec<DeclarationId>,
    is_abstract: bool,
    own_attribute_count: usize,
    /// Inherited attributes first, then the declaration's own
    attributes: Vec<AttributeDecl>,
    /// Own and inherited inverse attributes
    inverse_attributes: Vec<InverseAttributeDecl>,
}

impl EntityDeclaration {
    pub fn id(&self) -> DeclarationId {
        self.id
    }

    /// Declared name (e.g. "IfcWall")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper-case name as written in physical files (e.g. "IFCWALL")
    pub fn upper_name(&self) -> &str {
        &self.upper_name
    }

    pub fn supertype(&self) -> Option<DeclarationId> {
        self.supertype
    }

    /// Direct subtypes
    pub fn subtypes(&self) -> &[DeclarationId] {
        &self.subtypes
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// All explicit attributes in positional order, inherited ones first
    pub fn attributes(&self) -> &[AttributeDecl] {
        &self.attributes
    }

    /// Attributes introduced by this declaration itself
    pub fn own_attributes(&self) -> &[AttributeDecl] {
        &self.attributes[self.attributes.len() - self.own_attribute_count..]
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    /// Positional index of an attribute (case-insensitive)
    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn inverse_attributes(&self) -> &[InverseAttributeDecl] {
        &self.inverse_attributes
    }

    /// Find an inverse attribute by name (case-insensitive)
    pub fn inverse_attribute(&self, name: &str) -> Option<&InverseAttributeDecl> {
        self.inverse_attributes
            .iter()
            .find(|inv| inv.name.eq_ignore_ascii_case(name))
    }
}

/// Immutable catalogue of entity declarations for one schema version
#[derive(Debug)]
pub struct SchemaDefinition {
    name: String,
    declarations: Vec<EntityDeclaration>,
    by_name: FxHashMap<String, DeclarationId>,
    guid_attribute: Option<(DeclarationId, usize)>,
}

impl SchemaDefinition {
    /// Schema identifier (e.g. "IFC4")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a declaration by name, case-insensitively
    pub fn declaration_by_name(&self, name: &str) -> Option<&EntityDeclaration> {
        let id = self.by_name.get(&name.to_ascii_uppercase())?;
        Some(self.declaration(*id))
    }

    /// Get a declaration by handle
    ///
    /// # Panics
    /// Panics if the handle belongs to a different schema.
    pub fn declaration(&self, id: DeclarationId) -> &EntityDeclaration {
        &self.declarations[id.0 as usize]
    }

    pub fn declarations(&self) -> impl Iterator<Item = &EntityDeclaration> {
        self.declarations.iter()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// The declaration itself followed by its supertype chain
    pub fn ancestors(&self, id: DeclarationId) -> impl Iterator<Item = DeclarationId> + '_ {
        std::iter::successors(Some(id), move |d| self.declaration(*d).supertype)
    }

    /// `is-a` check: true when `id` equals `ancestor` or derives from it
    pub fn is_subtype_of(&self, id: DeclarationId, ancestor: DeclarationId) -> bool {
        self.ancestors(id).any(|d| d == ancestor)
    }

    /// The declaration and all of its transitive subtypes
    pub fn subtype_closure(&self, id: DeclarationId) -> Vec<DeclarationId> {
        let mut closure = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            closure.push(current);
            stack.extend(self.declaration(current).subtypes.iter().rev());
        }
        closure
    }

    /// The unique string identifier attribute (root type, attribute index)
    pub fn guid_attribute(&self) -> Option<(DeclarationId, usize)> {
        self.guid_attribute
    }

    /// Index of the guid attribute if `id` is a root-like entity type
    pub fn guid_index(&self, id: DeclarationId) -> Option<usize> {
        let (root, index) = self.guid_attribute?;
        self.is_subtype_of(id, root).then_some(index)
    }
}

struct PendingInverse {
    on: String,
    name: String,
    entity: String,
    attribute: String,
    cardinality: Cardinality,
}

/// Builder for [`SchemaDefinition`]
///
/// Supertypes must be declared before their subtypes.
///
/// ```
/// use ifc_graph_model::SchemaBuilder;
///
/// let schema = SchemaBuilder::new("DEMO")
///     .abstract_entity("Root", None, &[("GlobalId", false), ("Name", true)])
///     .entity("Node", Some("Root"), &[("Next", true)])
///     .guid("Root", "GlobalId")
///     .build()
///     .unwrap();
/// let node = schema.declaration_by_name("NODE").unwrap();
/// assert_eq!(node.attribute_count(), 3);
/// ```
pub struct SchemaBuilder {
    name: String,
    declarations: Vec<EntityDeclaration>,
    by_name: FxHashMap<String, DeclarationId>,
    inverses: Vec<PendingInverse>,
    guid: Option<(String, String)>,
    errors: Vec<String>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declarations: Vec::new(),
            by_name: FxHashMap::default(),
            inverses: Vec::new(),
            guid: None,
            errors: Vec::new(),
        }
    }

    /// Declare an instantiable entity
    pub fn entity(self, name: &str, supertype: Option<&str>, attributes: &[(&str, bool)]) -> Self {
        self.declare(name, supertype, attributes, false)
    }

    /// Declare an abstract entity
    pub fn abstract_entity(
        self,
        name: &str,
        supertype: Option<&str>,
        attributes: &[(&str, bool)],
    ) -> Self {
        self.declare(name, supertype, attributes, true)
    }

    fn declare(
        mut self,
        name: &str,
        supertype: Option<&str>,
        attributes: &[(&str, bool)],
        is_abstract: bool,
    ) -> Self {
        let upper_name = name.to_ascii_uppercase();
        if self.by_name.contains_key(&upper_name) {
            self.errors.push(format!("{name} declared twice"));
            return self;
        }

        let parent = match supertype {
            Some(parent_name) => match self.by_name.get(&parent_name.to_ascii_uppercase()) {
                Some(id) => Some(*id),
                None => {
                    self.errors
                        .push(format!("{name}: supertype {parent_name} is not declared"));
                    return self;
                }
            },
            None => None,
        };

        let id = DeclarationId(self.declarations.len() as u16);
        let mut all_attributes = parent
            .map(|p| self.declarations[p.0 as usize].attributes.clone())
            .unwrap_or_default();
        all_attributes.extend(attributes.iter().map(|(attr, optional)| AttributeDecl {
            name: (*attr).to_string(),
            optional: *optional,
        }));

        if let Some(p) = parent {
            self.declarations[p.0 as usize].subtypes.push(id);
        }
        self.declarations.push(EntityDeclaration {
            id,
            name: name.to_string(),
            upper_name: upper_name.clone(),
            supertype: parent,
            subtypes: Vec::new(),
            is_abstract,
            own_attribute_count: attributes.len(),
            attributes: all_attributes,
            inverse_attributes: Vec::new(),
        });
        self.by_name.insert(upper_name, id);
        self
    }

    /// Declare an inverse attribute `name` on `on`, satisfied by references
    /// held in `entity.attribute`
    pub fn inverse(
        mut self,
        on: &str,
        name: &str,
        entity: &str,
        attribute: &str,
        min: u32,
        max: Option<u32>,
    ) -> Self {
        self.inverses.push(PendingInverse {
            on: on.to_string(),
            name: name.to_string(),
            entity: entity.to_string(),
            attribute: attribute.to_string(),
            cardinality: Cardinality { min, max },
        });
        self
    }

    /// Declare the unique string identifier attribute of root-like entities
    pub fn guid(mut self, entity: &str, attribute: &str) -> Self {
        self.guid = Some((entity.to_string(), attribute.to_string()));
        self
    }

    pub fn build(mut self) -> Result<SchemaDefinition> {
        for pending in std::mem::take(&mut self.inverses) {
            let Some(on) = self.lookup(&pending.on) else {
                self.errors.push(format!("inverse {}: unknown entity {}", pending.name, pending.on));
                continue;
            };
            let Some(entity) = self.lookup(&pending.entity) else {
                self.errors.push(format!(
                    "inverse {}: unknown entity {}",
                    pending.name, pending.entity
                ));
                continue;
            };
            let Some(attribute_index) =
                self.declarations[entity.0 as usize].attribute_index(&pending.attribute)
            else {
                self.errors.push(format!(
                    "inverse {}: {} has no attribute {}",
                    pending.name, pending.entity, pending.attribute
                ));
                continue;
            };
            let inverse = InverseAttributeDecl {
                name: pending.name,
                entity,
                attribute_index,
                cardinality: pending.cardinality,
            };
            // Inverses are inherited by every subtype
            let mut stack = vec![on];
            while let Some(current) = stack.pop() {
                let decl = &mut self.declarations[current.0 as usize];
                decl.inverse_attributes.push(inverse.clone());
                stack.extend(decl.subtypes.iter().copied());
            }
        }

        let guid_attribute = match self.guid.take() {
            Some((entity, attribute)) => {
                let root = self.lookup(&entity);
                let index = root.and_then(|r| self.declarations[r.0 as usize].attribute_index(&attribute));
                match (root, index) {
                    (Some(root), Some(index)) => Some((root, index)),
                    _ => {
                        self.errors
                            .push(format!("guid attribute {entity}.{attribute} is not declared"));
                        None
                    }
                }
            }
            None => None,
        };

        if !self.errors.is_empty() {
            return Err(ParseError::InvalidFormat(format!(
                "schema {}: {}",
                self.name,
                self.errors.join("; ")
            )));
        }

        Ok(SchemaDefinition {
            name: self.name,
            declarations: self.declarations,
            by_name: self.by_name,
            guid_attribute,
        })
    }

    fn lookup(&self, name: &str) -> Option<DeclarationId> {
        self.by_name.get(&name.to_ascii_uppercase()).copied()
    }
}

/// Maps `FILE_SCHEMA` identifiers to schema catalogues
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: FxHashMap<String, Arc<SchemaDefinition>>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `IFC2X3` and `IFC4` catalogues
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for schema in crate::catalogue::builtin_schemas() {
            registry.register(schema);
        }
        registry
    }

    /// Register (or replace) a schema under its own name
    pub fn register(&mut self, schema: Arc<SchemaDefinition>) {
        self.schemas
            .insert(schema.name().to_ascii_uppercase(), schema);
    }

    /// Resolve a schema identifier
    ///
    /// Matching is case-insensitive. Addendum and technical-corrigendum
    /// suffixes resolve to their base schema (`IFC4ADD2` → `IFC4`,
    /// `IFC2X3_TC1` → `IFC2X3`).
    pub fn resolve(&self, identifier: &str) -> Option<Arc<SchemaDefinition>> {
        let upper = identifier.trim().to_ascii_uppercase();
        if let Some(schema) = self.schemas.get(&upper) {
            return Some(Arc::clone(schema));
        }
        self.schemas
            .iter()
            .filter(|(name, _)| {
                upper
                    .strip_prefix(name.as_str())
                    .map(|rest| rest.starts_with("ADD") || rest.starts_with("_TC") || rest.starts_with("TC"))
                    .unwrap_or(false)
            })
            .max_by_key(|(name, _)| name.len())
            .map(|(_, schema)| Arc::clone(schema))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.values().map(|s| s.name()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> SchemaDefinition {
        SchemaBuilder::new("DEMO")
            .abstract_entity("Root", None, &[("GlobalId", false), ("Name", true)])
            .entity("Element", Some("Root"), &[("Tag", true)])
            .entity("Wall", Some("Element"), &[])
            .entity("Door", Some("Element"), &[("Height", true)])
            .entity("Rel", Some("Root"), &[("Relating", false), ("Related", false)])
            .inverse("Element", "HasRels", "Rel", "Related", 0, None)
            .guid("Root", "GlobalId")
            .build()
            .unwrap()
    }

    #[test]
    fn test_attributes_are_flattened() {
        let schema = demo();
        let door = schema.declaration_by_name("door").unwrap();
        let names: Vec<_> = door.attributes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["GlobalId", "Name", "Tag", "Height"]);
        assert_eq!(door.own_attributes().len(), 1);
        assert_eq!(door.attribute_index("tag"), Some(2));
    }

    #[test]
    fn test_subtype_queries() {
        let schema = demo();
        let root = schema.declaration_by_name("Root").unwrap().id();
        let element = schema.declaration_by_name("Element").unwrap().id();
        let wall = schema.declaration_by_name("Wall").unwrap().id();
        let rel = schema.declaration_by_name("Rel").unwrap().id();

        assert!(schema.is_subtype_of(wall, root));
        assert!(schema.is_subtype_of(wall, wall));
        assert!(!schema.is_subtype_of(rel, element));
        assert_eq!(schema.ancestors(wall).collect::<Vec<_>>(), vec![wall, element, root]);

        let closure = schema.subtype_closure(element);
        assert_eq!(closure.len(), 3);
        assert!(closure.contains(&wall));
    }

    #[test]
    fn test_inverses_are_inherited() {
        let schema = demo();
        let wall = schema.declaration_by_name("Wall").unwrap();
        let inverse = wall.inverse_attribute("hasrels").unwrap();
        assert_eq!(inverse.attribute_index, 3);
        assert_eq!(inverse.cardinality.max, None);
    }

    #[test]
    fn test_guid_index_only_for_root_like_types() {
        let schema = demo();
        let wall = schema.declaration_by_name("Wall").unwrap().id();
        assert_eq!(schema.guid_index(wall), Some(0));
    }

    #[test]
    fn test_unknown_supertype_is_reported() {
        let result = SchemaBuilder::new("BROKEN")
            .entity("Child", Some("Missing"), &[])
            .build();
        assert!(matches!(result, Err(ParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_registry_resolves_suffixes() {
        let registry = SchemaRegistry::with_builtin();
        assert_eq!(registry.resolve("ifc4").unwrap().name(), "IFC4");
        assert_eq!(registry.resolve("IFC4ADD2").unwrap().name(), "IFC4");
        assert_eq!(registry.resolve("IFC2X3_TC1").unwrap().name(), "IFC2X3");
        assert!(registry.resolve("IFC4X3").is_none());
        assert!(registry.resolve("CONFIG_CONTROL_DESIGN").is_none());
    }
}
