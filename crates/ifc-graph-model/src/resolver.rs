// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity resolution trait for looking up and resolving entities

use crate::{AttributeValue, DecodedEntity, EntityId};
use std::sync::Arc;

/// Entity lookup and reference resolution
///
/// Implementations provide O(1) lookup by entity id. References inside
/// attribute values are plain ids; resolving them always goes through the
/// resolver.
///
/// # Example
///
/// ```ignore
/// use ifc_graph_model::{EntityResolver, EntityId};
///
/// fn placement_of(resolver: &dyn EntityResolver, product: EntityId) {
///     if let Some(entity) = resolver.get(product) {
///         if let Some(placement) = entity.get(5).and_then(|a| resolver.resolve_ref(a)) {
///             println!("placement: {}", placement.type_name);
///         }
///     }
/// }
/// ```
pub trait EntityResolver: Send + Sync {
    /// Get entity by id
    ///
    /// Returns an owned snapshot with materialized attributes, or `None` if
    /// the id is unknown or the attributes failed to materialize.
    fn get(&self, id: EntityId) -> Option<Arc<DecodedEntity>>;

    /// Resolve an entity reference from an attribute value
    fn resolve_ref(&self, attr: &AttributeValue) -> Option<Arc<DecodedEntity>> {
        match attr {
            AttributeValue::EntityRef(id) => self.get(*id),
            _ => None,
        }
    }

    /// Resolve every reference of an aggregate attribute
    ///
    /// Non-reference members and unknown ids are skipped.
    fn resolve_ref_list(&self, attr: &AttributeValue) -> Vec<Arc<DecodedEntity>> {
        match attr {
            AttributeValue::List(items) => items
                .iter()
                .filter_map(|item| self.resolve_ref(item))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Ids of all entities of a type, by name (case-insensitive)
    ///
    /// Empty when the type is not declared by the active schema.
    fn ids_by_type_name(&self, type_name: &str, include_subtypes: bool) -> Vec<EntityId>;

    /// Entities of a type, by name (case-insensitive)
    fn entities_by_type_name(
        &self,
        type_name: &str,
        include_subtypes: bool,
    ) -> Vec<Arc<DecodedEntity>> {
        self.ids_by_type_name(type_name, include_subtypes)
            .into_iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// All entity ids in the model
    fn all_ids(&self) -> Vec<EntityId>;

    /// Total entity count
    fn entity_count(&self) -> usize {
        self.all_ids().len()
    }
}

/// Extension methods for EntityResolver
pub trait EntityResolverExt: EntityResolver {
    /// Get entity by raw u32 id
    fn get_by_u32(&self, id: u32) -> Option<Arc<DecodedEntity>> {
        self.get(EntityId(id))
    }

    /// Check if an entity exists
    fn exists(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Get entity or return error
    fn get_or_err(&self, id: EntityId) -> crate::Result<Arc<DecodedEntity>> {
        self.get(id).ok_or(crate::ParseError::EntityNotFound(id))
    }

    /// First entity of a type, if any
    fn first_of_type(&self, type_name: &str) -> Option<Arc<DecodedEntity>> {
        self.ids_by_type_name(type_name, true)
            .into_iter()
            .find_map(|id| self.get(id))
    }
}

// Blanket implementation for all EntityResolver types
impl<T: EntityResolver + ?Sized> EntityResolverExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    struct MapResolver {
        entities: FxHashMap<EntityId, Arc<DecodedEntity>>,
    }

    impl EntityResolver for MapResolver {
        fn get(&self, id: EntityId) -> Option<Arc<DecodedEntity>> {
            self.entities.get(&id).cloned()
        }

        fn ids_by_type_name(&self, type_name: &str, _include_subtypes: bool) -> Vec<EntityId> {
            let mut ids: Vec<_> = self
                .entities
                .values()
                .filter(|e| e.is_type(type_name))
                .map(|e| e.id)
                .collect();
            ids.sort();
            ids
        }

        fn all_ids(&self) -> Vec<EntityId> {
            self.entities.keys().copied().collect()
        }
    }

    fn entity(id: u32, type_name: &str, attributes: Vec<AttributeValue>) -> Arc<DecodedEntity> {
        Arc::new(DecodedEntity {
            id: EntityId(id),
            type_name: type_name.to_string(),
            declaration: None,
            attributes: attributes.into(),
        })
    }

    fn resolver() -> MapResolver {
        let mut entities = FxHashMap::default();
        for e in [
            entity(1, "IFCCARTESIANPOINT", vec![]),
            entity(2, "IFCCARTESIANPOINT", vec![]),
            entity(
                3,
                "IFCPOLYLOOP",
                vec![AttributeValue::List(vec![
                    AttributeValue::EntityRef(EntityId(1)),
                    AttributeValue::EntityRef(EntityId(2)),
                    AttributeValue::EntityRef(EntityId(99)),
                ])],
            ),
        ] {
            entities.insert(e.id, e);
        }
        MapResolver { entities }
    }

    #[test]
    fn test_resolve_ref_list_skips_unknown_ids() {
        let resolver = resolver();
        let poly_loop = resolver.get(EntityId(3)).unwrap();
        let points = resolver.resolve_ref_list(poly_loop.get(0).unwrap());
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].id, EntityId(2));
    }

    #[test]
    fn test_extension_methods() {
        let resolver = resolver();
        assert!(resolver.exists(EntityId(1)));
        assert!(matches!(
            resolver.get_or_err(EntityId(42)),
            Err(crate::ParseError::EntityNotFound(EntityId(42)))
        ));
        assert_eq!(
            resolver.first_of_type("IfcCartesianPoint").map(|e| e.id),
            Some(EntityId(1))
        );
        assert_eq!(resolver.entities_by_type_name("IfcPolyLoop", false).len(), 1);
        assert_eq!(resolver.entity_count(), 3);
    }
}
