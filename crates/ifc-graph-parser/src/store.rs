// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity graph store
//!
//! The store owns every [`EntityInstance`] of one model in a single arena
//! keyed by [`EntityId`], and keeps four indices in step with it:
//!
//! - by exact type: declaration → ids whose type is that declaration
//! - by type closure: declaration → ids whose type is it or a subtype
//! - by guid: unique string identifier of root-like entities → id
//! - by reference: id → ids of every entity referencing it
//!
//! Mutation takes `&mut self`. Reads take `&self` and may run from several
//! threads at once; the only interior mutation on the read path is attribute
//! materialization, which is compute-once per entity.

use crate::entity::{EntityInstance, LazyAttributeList, NewEntity};
use crate::header::default_header;
use crate::lexer::{Lexer, Span};
use crate::materialize::{self, ArgumentScan};
use crate::source::ByteSource;
use crate::units::Unit;
use ifc_graph_model::{
    collect_references, AttributeValue, DeclarationId, DecodedEntity, EntityId, EntityResolver,
    Header, ParseError, Result, SchemaDefinition,
};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Referencers of one entity
pub type ReferenceSet = SmallVec<[EntityId; 4]>;

/// Lifecycle of a store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    /// Nothing loaded or added yet
    Empty,
    /// A load is in progress
    Loading,
    /// Loaded or built up; `has_errors` mirrors [`EntityStore::has_errors`]
    Loaded { has_errors: bool },
}

/// What [`EntityStore::remove_entity`] does with entities that still
/// reference the one being removed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Fail with [`ParseError::DanglingReference`]
    #[default]
    Restrict,
    /// Replace every reference with `$` (or drop it from aggregates), then
    /// remove
    Detach,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Empty,
    Loading,
    Loaded,
}

/// One live entity as seen by a writer
#[derive(Debug)]
pub struct EntityRecord<'a> {
    pub id: EntityId,
    pub type_name: &'a str,
    pub attributes: Result<Arc<[AttributeValue]>>,
}

/// Entity graph store for one model
pub struct EntityStore {
    header: Header,
    schema: Option<Arc<SchemaDefinition>>,
    source: Option<ByteSource>,
    entities: FxHashMap<EntityId, EntityInstance>,
    by_type: FxHashMap<DeclarationId, Vec<EntityId>>,
    by_type_closure: FxHashMap<DeclarationId, Vec<EntityId>>,
    by_guid: FxHashMap<String, EntityId>,
    by_ref: FxHashMap<EntityId, ReferenceSet>,
    /// Interned upper-case type names
    type_names: FxHashMap<String, Arc<str>>,
    max_id: u32,
    phase: Phase,
    errors: Mutex<Vec<(Option<EntityId>, ParseError)>>,
    /// Errors of the header and id/type pass, as opposed to materialization
    structural_errors: AtomicUsize,
    pub(crate) unit_cache: Mutex<FxHashMap<String, Option<Unit>>>,
    materializations: AtomicUsize,
}

impl EntityStore {
    /// Empty, writable store for `schema`
    pub fn new(schema: Arc<SchemaDefinition>) -> Self {
        let header = default_header(schema.name());
        Self::with_parts(header, Some(schema), None)
    }

    pub(crate) fn with_parts(
        header: Header,
        schema: Option<Arc<SchemaDefinition>>,
        source: Option<ByteSource>,
    ) -> Self {
        EntityStore {
            header,
            schema,
            source,
            entities: FxHashMap::default(),
            by_type: FxHashMap::default(),
            by_type_closure: FxHashMap::default(),
            by_guid: FxHashMap::default(),
            by_ref: FxHashMap::default(),
            type_names: FxHashMap::default(),
            max_id: 0,
            phase: Phase::Empty,
            errors: Mutex::new(Vec::new()),
            structural_errors: AtomicUsize::new(0),
            unit_cache: Mutex::new(FxHashMap::default()),
            materializations: AtomicUsize::new(0),
        }
    }

    // ========================================================================
    // Model-level accessors
    // ========================================================================

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Active schema, `None` when the header named an unknown schema
    pub fn schema(&self) -> Option<&Arc<SchemaDefinition>> {
        self.schema.as_ref()
    }

    /// Active schema, or [`ParseError::UnknownSchema`] for typed queries
    pub fn require_schema(&self) -> Result<&Arc<SchemaDefinition>> {
        self.schema.as_ref().ok_or_else(|| {
            ParseError::UnknownSchema(
                self.header
                    .schema_identifier()
                    .unwrap_or_default()
                    .to_string(),
            )
        })
    }

    pub fn source(&self) -> Option<&ByteSource> {
        self.source.as_ref()
    }

    pub fn state(&self) -> StoreState {
        match self.phase {
            Phase::Empty => StoreState::Empty,
            Phase::Loading => StoreState::Loading,
            Phase::Loaded => StoreState::Loaded {
                has_errors: self.has_errors(),
            },
        }
    }

    /// True when no load is in progress and nothing has been recorded in the
    /// error log
    ///
    /// Attributes are parsed on first access, so a store that is good right
    /// after loading can turn bad once a malformed entity is read. Use
    /// [`EntityStore::structurally_good`] for the result of the load pass
    /// alone, or call [`EntityStore::materialize_all`] first.
    pub fn good(&self) -> bool {
        self.phase != Phase::Loading && !self.has_errors()
    }

    /// True when the header and the id/type pass recorded no errors
    ///
    /// Unlike [`EntityStore::good`] this does not change as attributes are
    /// materialized.
    pub fn structurally_good(&self) -> bool {
        self.phase != Phase::Loading && self.structural_errors.load(Ordering::Relaxed) == 0
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Recorded (entity, error) pairs, in the order they occurred
    ///
    /// Holds lexical, per-entity schema and materialization errors; the
    /// entity is `None` for file-level problems.
    pub fn errors(&self) -> Vec<(Option<EntityId>, ParseError)> {
        self.errors.lock().clone()
    }

    pub(crate) fn record_error(&self, entity: Option<EntityId>, error: ParseError) {
        self.structural_errors.fetch_add(1, Ordering::Relaxed);
        self.log_error(entity, error);
    }

    fn log_error(&self, entity: Option<EntityId>, error: ParseError) {
        match entity {
            Some(id) => warn!("{id}: {error}"),
            None => warn!("{error}"),
        }
        self.errors.lock().push((entity, error));
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All ids, ascending
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Highest id ever allocated or loaded
    pub fn max_id(&self) -> EntityId {
        EntityId(self.max_id)
    }

    /// Allocate a new id
    ///
    /// The counter only moves forward, so ids of removed entities are never
    /// handed out again. Fails once `#4294967295` has been used.
    pub fn fresh_id(&mut self) -> Result<EntityId> {
        self.max_id = self
            .max_id
            .checked_add(1)
            .ok_or_else(|| ParseError::format("entity id space exhausted"))?;
        Ok(EntityId(self.max_id))
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn instance_by_id(&self, id: EntityId) -> Option<&EntityInstance> {
        self.entities.get(&id)
    }

    pub fn instance_by_guid(&self, guid: &str) -> Option<&EntityInstance> {
        self.by_guid.get(guid).and_then(|id| self.entities.get(id))
    }

    /// Ids of entities of declaration `declaration`, in insertion order
    pub fn instances_by_type(&self, declaration: DeclarationId, include_subtypes: bool) -> &[EntityId] {
        let index = if include_subtypes {
            &self.by_type_closure
        } else {
            &self.by_type
        };
        index.get(&declaration).map_or(&[], Vec::as_slice)
    }

    /// Type query by name
    ///
    /// Fails with [`ParseError::UnknownSchema`] without an active schema and
    /// with [`ParseError::UnknownType`] when the schema lacks the type.
    pub fn instances_by_type_name(&self, type_name: &str, include_subtypes: bool) -> Result<&[EntityId]> {
        let schema = self.require_schema()?;
        let declaration = schema
            .declaration_by_name(type_name)
            .ok_or_else(|| ParseError::UnknownType(type_name.to_string()))?;
        Ok(self.instances_by_type(declaration.id(), include_subtypes))
    }

    /// Ids of every entity referencing `id`
    pub fn instances_by_reference(&self, id: EntityId) -> &[EntityId] {
        self.by_ref.get(&id).map_or(&[], |set| set.as_slice())
    }

    /// Declarations with at least one entity of exactly that type
    pub fn types(&self) -> Vec<DeclarationId> {
        let mut types: Vec<_> = self.by_type.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Declarations with at least one entity of that type or a subtype
    pub fn types_with_supertypes(&self) -> Vec<DeclarationId> {
        let mut types: Vec<_> = self.by_type_closure.keys().copied().collect();
        types.sort_unstable();
        types
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    /// Materialized attributes of `id`
    pub fn attributes(&self, id: EntityId) -> Result<Arc<[AttributeValue]>> {
        let instance = self.entities.get(&id).ok_or(ParseError::EntityNotFound(id))?;
        self.materialized(instance)
    }

    /// Materialize every entity; returns how many failed
    pub fn materialize_all(&self) -> usize {
        self.entities
            .values()
            .filter(|instance| self.materialized(instance).is_err())
            .count()
    }

    /// Number of times raw attribute bytes were parsed
    pub fn materialization_count(&self) -> usize {
        self.materializations.load(Ordering::Relaxed)
    }

    pub(crate) fn materialized(&self, instance: &EntityInstance) -> Result<Arc<[AttributeValue]>> {
        instance.attributes.get_or_materialize(|span| {
            self.materializations.fetch_add(1, Ordering::Relaxed);
            trace!("materializing {} {}", instance.id, instance.type_name);
            let result = self.parse_span(instance, span);
            if let Err(err) = &result {
                self.log_error(Some(instance.id), err.clone());
            }
            result
        })
    }

    fn parse_span(&self, instance: &EntityInstance, span: Span) -> Result<Arc<[AttributeValue]>> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ParseError::format("entity has a raw span but the store has no source"))?;
        let bytes = source.read_range(span.start, span.end)?;
        let declaration = match (&self.schema, instance.declaration) {
            (Some(schema), Some(id)) => Some(schema.declaration(id)),
            _ => None,
        };
        materialize::materialize(instance.id, &bytes, span.start, declaration).map(Arc::from)
    }

    /// Raw argument bytes of a loaded entity, `(` through `)`
    pub fn raw_arguments(&self, id: EntityId) -> Option<Cow<'_, [u8]>> {
        let span = self.entities.get(&id)?.attributes.raw_span()?;
        self.source.as_ref()?.read_range(span.start, span.end).ok()
    }

    /// References and guid of an entity, without requiring its attributes to
    /// conform to the schema
    fn structural_facts(&self, instance: &EntityInstance) -> Result<(Vec<EntityId>, Option<String>)> {
        if let Ok(values) = self.materialized(instance) {
            let guid = self.guid_of(instance.declaration, &values);
            return Ok((collect_references(&values), guid));
        }
        let span = instance
            .attributes
            .raw_span()
            .ok_or_else(|| ParseError::format("entity has no attributes"))?;
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ParseError::format("entity has a raw span but the store has no source"))?;
        let bytes = source.read_range(span.start, span.end)?;
        let guid_index = self.guid_index(instance.declaration);
        let scan = materialize::scan_arguments(&mut Lexer::with_base(&bytes, span.start), guid_index)?;
        Ok((scan.references, scan.guid))
    }

    fn guid_index(&self, declaration: Option<DeclarationId>) -> Option<usize> {
        self.schema.as_ref()?.guid_index(declaration?)
    }

    fn guid_of(&self, declaration: Option<DeclarationId>, values: &[AttributeValue]) -> Option<String> {
        let index = self.guid_index(declaration)?;
        values.get(index)?.as_string().map(str::to_string)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Depth-first walk over attribute references starting at `root`
    ///
    /// Every id is returned at most once, so cycles terminate. References are
    /// followed in attribute order. `max_depth < 0` is unbounded and
    /// `max_depth == 0` returns only the root. Ids that do not resolve are
    /// skipped; an unknown root yields an empty result.
    pub fn traverse(&self, root: EntityId, max_depth: i32) -> Vec<EntityId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![(root, 0i32)];
        while let Some((id, depth)) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(instance) = self.entities.get(&id) else {
                continue;
            };
            order.push(id);
            if max_depth >= 0 && depth >= max_depth {
                continue;
            }
            let references = match self.structural_facts(instance) {
                Ok((references, _)) => references,
                Err(_) => continue,
            };
            // Reversed so the first reference is visited first
            for reference in references.into_iter().rev() {
                if !seen.contains(&reference) {
                    stack.push((reference, depth + 1));
                }
            }
        }
        order
    }

    // ========================================================================
    // Inverse queries
    // ========================================================================

    /// Referencers of `id` whose type is `declaration` or a subtype,
    /// optionally only those holding the reference in attribute
    /// `attribute_index`
    pub fn get_inverse(
        &self,
        id: EntityId,
        declaration: DeclarationId,
        attribute_index: Option<usize>,
    ) -> Vec<EntityId> {
        let Some(schema) = &self.schema else {
            return Vec::new();
        };
        self.instances_by_reference(id)
            .iter()
            .copied()
            .filter(|referencer| {
                let Some(instance) = self.entities.get(referencer) else {
                    return false;
                };
                let is_a = instance
                    .declaration
                    .is_some_and(|d| schema.is_subtype_of(d, declaration));
                if !is_a {
                    return false;
                }
                match attribute_index {
                    None => true,
                    Some(index) => self
                        .materialized(instance)
                        .ok()
                        .and_then(|values| values.get(index).map(|v| v.contains_reference(id)))
                        .unwrap_or(false),
                }
            })
            .collect()
    }

    /// Evaluate a schema-declared inverse attribute (e.g. `IsDefinedBy`)
    pub fn inverse(&self, id: EntityId, name: &str) -> Result<Vec<EntityId>> {
        let instance = self.entities.get(&id).ok_or(ParseError::EntityNotFound(id))?;
        let schema = self.require_schema()?;
        let declaration = instance
            .declaration
            .map(|d| schema.declaration(d))
            .ok_or_else(|| ParseError::UnknownType(instance.type_name().to_string()))?;
        let inverse = declaration.inverse_attribute(name).ok_or_else(|| {
            ParseError::schema_mismatch(
                id,
                format!("{} has no inverse attribute {name}", declaration.name()),
            )
        })?;
        Ok(self.get_inverse(id, inverse.entity, Some(inverse.attribute_index)))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Add one entity, allocating a fresh id when none is given
    ///
    /// Rejects unknown or abstract types, an id that is zero or already
    /// present, attribute lists that do not fit the declaration, references
    /// to missing entities (a self-reference is fine) and guids already in
    /// use. On success all four indices include the entity.
    pub fn add_entity(&mut self, entity: NewEntity) -> Result<EntityId> {
        let NewEntity {
            id: requested,
            type_name,
            mut attributes,
        } = entity;

        if let Some(id) = requested {
            if id.0 == 0 {
                return Err(ParseError::format("entity ids must be positive"));
            }
            if self.entities.contains_key(&id) {
                return Err(ParseError::DuplicateId(id));
            }
        }
        let id = requested.unwrap_or(EntityId(self.max_id.saturating_add(1)));

        let declaration = match &self.schema {
            Some(schema) => {
                let declaration = schema
                    .declaration_by_name(&type_name)
                    .ok_or_else(|| ParseError::UnknownType(type_name.clone()))?;
                if declaration.is_abstract() {
                    return Err(ParseError::schema_mismatch(
                        id,
                        format!("{} is abstract", declaration.name()),
                    ));
                }
                materialize::conform(id, declaration, &mut attributes)?;
                Some(declaration.id())
            }
            None => None,
        };

        let references = collect_references(&attributes);
        if let Some(missing) = references
            .iter()
            .find(|r| **r != id && !self.entities.contains_key(*r))
        {
            return Err(ParseError::EntityNotFound(*missing));
        }

        let guid = self.guid_of(declaration, &attributes);
        if let Some(guid) = &guid {
            if let Some(existing) = self.by_guid.get(guid) {
                return Err(ParseError::DuplicateGuid {
                    guid: guid.clone(),
                    existing: *existing,
                });
            }
        }

        let id = match requested {
            Some(id) => id,
            None => self.fresh_id()?,
        };
        let type_name = self.intern(&type_name);
        self.insert(
            id,
            type_name,
            declaration,
            LazyAttributeList::parsed(attributes.into()),
            &references,
            guid,
        );
        if self.phase == Phase::Empty {
            self.phase = Phase::Loaded;
        }
        debug!("added {id}");
        Ok(id)
    }

    /// Add entities in order
    ///
    /// Entities before a failing one stay added. The failure is reported as
    /// [`ParseError::Batch`] with the input position of the rejected entity.
    pub fn add_entities(&mut self, entities: impl IntoIterator<Item = NewEntity>) -> Result<Vec<EntityId>> {
        let mut ids = Vec::new();
        for (position, entity) in entities.into_iter().enumerate() {
            let id = self.add_entity(entity).map_err(|source| ParseError::Batch {
                position,
                source: Box::new(source),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Remove an entity
    ///
    /// With [`RemovalPolicy::Restrict`] the removal fails while another entity
    /// references `id`. With [`RemovalPolicy::Detach`] those references are
    /// dropped first. References the entity itself held are removed from the
    /// inverse index.
    pub fn remove_entity(&mut self, id: EntityId, policy: RemovalPolicy) -> Result<()> {
        if !self.entities.contains_key(&id) {
            return Err(ParseError::EntityNotFound(id));
        }

        let referenced_by: Vec<EntityId> = self
            .instances_by_reference(id)
            .iter()
            .copied()
            .filter(|r| *r != id)
            .collect();
        if policy == RemovalPolicy::Restrict && !referenced_by.is_empty() {
            return Err(ParseError::DanglingReference {
                entity: id,
                referenced_by,
            });
        }

        let (references, guid) = match self.entities.get(&id) {
            Some(instance) => self.structural_facts(instance)?,
            None => return Err(ParseError::EntityNotFound(id)),
        };
        // Every rewrite is computed before the first one is applied
        let detached = referenced_by
            .into_iter()
            .map(|referencer| Ok((referencer, self.detached(referencer, id)?)))
            .collect::<Result<Vec<_>>>()?;
        for (referencer, values) in detached {
            self.replace_attributes(referencer, values)?;
        }
        let Some(instance) = self.entities.remove(&id) else {
            return Err(ParseError::EntityNotFound(id));
        };
        self.unindex_type(id, instance.declaration);
        if let Some(guid) = guid {
            if self.by_guid.get(&guid) == Some(&id) {
                self.by_guid.remove(&guid);
            }
        }
        for reference in references {
            self.unregister_inverse(id, reference);
        }
        debug_assert!(self.instances_by_reference(id).is_empty());
        self.by_ref.remove(&id);
        self.invalidate_caches();
        debug!("removed {id}");
        Ok(())
    }

    /// Replace attribute `index` of entity `id`
    ///
    /// The by-reference and by-guid indices follow the new value.
    pub fn set_attribute(&mut self, id: EntityId, index: usize, value: AttributeValue) -> Result<()> {
        let current = self.attributes(id)?;
        if index >= current.len() {
            return Err(ParseError::schema_mismatch(
                id,
                format!("attribute index {index} out of range ({} attributes)", current.len()),
            ));
        }
        if let Some(missing) = value
            .references()
            .into_iter()
            .find(|r| *r != id && !self.entities.contains_key(r))
        {
            return Err(ParseError::EntityNotFound(missing));
        }
        let mut values = current.to_vec();
        values[index] = value;
        self.replace_attributes(id, values)
    }

    /// Attributes of `referencer` with every reference to `target` dropped
    fn detached(&self, referencer: EntityId, target: EntityId) -> Result<Vec<AttributeValue>> {
        let mut values = self.attributes(referencer)?.to_vec();
        for value in &mut values {
            value.detach_reference(target);
        }
        Ok(values)
    }

    fn replace_attributes(&mut self, id: EntityId, values: Vec<AttributeValue>) -> Result<()> {
        let instance = self.entities.get(&id).ok_or(ParseError::EntityNotFound(id))?;
        let declaration = instance.declaration;
        let old = self.materialized(instance)?;

        let old_guid = self.guid_of(declaration, &old);
        let new_guid = self.guid_of(declaration, &values);
        if old_guid != new_guid {
            if let Some(guid) = &new_guid {
                if let Some(existing) = self.by_guid.get(guid) {
                    return Err(ParseError::DuplicateGuid {
                        guid: guid.clone(),
                        existing: *existing,
                    });
                }
            }
        }

        let old_refs: FxHashSet<EntityId> = collect_references(&old).into_iter().collect();
        let new_refs: Vec<EntityId> = collect_references(&values);

        if let Some(instance) = self.entities.get_mut(&id) {
            instance.attributes = LazyAttributeList::parsed(values.into());
        }

        if old_guid != new_guid {
            if let Some(guid) = old_guid {
                if self.by_guid.get(&guid) == Some(&id) {
                    self.by_guid.remove(&guid);
                }
            }
            if let Some(guid) = new_guid {
                self.by_guid.insert(guid, id);
            }
        }

        let new_set: FxHashSet<EntityId> = new_refs.iter().copied().collect();
        for gone in old_refs.difference(&new_set) {
            self.unregister_inverse(id, *gone);
        }
        // Registration keeps first-reference order
        for reference in new_refs {
            if !old_refs.contains(&reference) {
                self.register_inverse(id, reference);
            }
        }
        self.invalidate_caches();
        Ok(())
    }

    /// Record that `referencer` references `referenced`
    ///
    /// Index primitive for callers maintaining attributes outside
    /// [`EntityStore::set_attribute`]. `referencer` must be live.
    pub fn register_inverse(&mut self, referencer: EntityId, referenced: EntityId) {
        debug_assert!(
            self.entities.contains_key(&referencer),
            "register_inverse: referencer {referencer} is not in the store"
        );
        let set = self.by_ref.entry(referenced).or_default();
        if !set.contains(&referencer) {
            set.push(referencer);
        }
    }

    /// Forget that `referencer` references `referenced`
    ///
    /// Must only be called once `referencer` no longer holds the reference
    /// (or is gone); debug builds assert this.
    pub fn unregister_inverse(&mut self, referencer: EntityId, referenced: EntityId) {
        debug_assert!(
            !self.still_references(referencer, referenced),
            "unregister_inverse: {referencer} still references {referenced}"
        );
        if let Some(set) = self.by_ref.get_mut(&referenced) {
            set.retain(|id| *id != referencer);
            if set.is_empty() {
                self.by_ref.remove(&referenced);
            }
        }
    }

    fn still_references(&self, referencer: EntityId, referenced: EntityId) -> bool {
        self.entities
            .get(&referencer)
            .and_then(|instance| instance.attributes.get())
            .is_some_and(|values| values.iter().any(|v| v.contains_reference(referenced)))
    }

    fn intern(&mut self, type_name: &str) -> Arc<str> {
        let upper = type_name.to_ascii_uppercase();
        self.type_names
            .entry(upper)
            .or_insert_with_key(|name| Arc::from(name.as_str()))
            .clone()
    }

    fn insert(
        &mut self,
        id: EntityId,
        type_name: Arc<str>,
        declaration: Option<DeclarationId>,
        attributes: LazyAttributeList,
        references: &[EntityId],
        guid: Option<String>,
    ) {
        self.entities
            .insert(id, EntityInstance::new(id, type_name, declaration, attributes));
        if let Some(declaration) = declaration {
            self.by_type.entry(declaration).or_default().push(id);
            if let Some(schema) = &self.schema {
                for ancestor in schema.ancestors(declaration) {
                    self.by_type_closure.entry(ancestor).or_default().push(id);
                }
            }
        }
        if let Some(guid) = guid {
            self.by_guid.insert(guid, id);
        }
        for reference in references {
            self.register_inverse(id, *reference);
        }
        self.max_id = self.max_id.max(id.0);
        // Nothing is cached while loading
        if self.phase != Phase::Loading {
            self.invalidate_caches();
        }
    }

    fn unindex_type(&mut self, id: EntityId, declaration: Option<DeclarationId>) {
        let Some(declaration) = declaration else {
            return;
        };
        remove_from_index(&mut self.by_type, declaration, id);
        if let Some(schema) = &self.schema {
            for ancestor in schema.ancestors(declaration) {
                remove_from_index(&mut self.by_type_closure, ancestor, id);
            }
        }
    }

    fn invalidate_caches(&self) {
        self.unit_cache.lock().clear();
    }

    // ========================================================================
    // Loading
    // ========================================================================

    pub(crate) fn begin_load(&mut self) {
        self.phase = Phase::Loading;
    }

    pub(crate) fn resolve_declaration(&self, type_name: &str) -> Option<DeclarationId> {
        self.schema
            .as_ref()?
            .declaration_by_name(type_name)
            .map(|d| d.id())
    }

    pub(crate) fn guid_index_of(&self, declaration: Option<DeclarationId>) -> Option<usize> {
        self.guid_index(declaration)
    }

    /// Insert an entity found by the load-time scan
    ///
    /// Duplicate ids keep the first definition; a duplicate guid keeps the
    /// entity but leaves it out of the guid index. Both are recorded.
    pub(crate) fn insert_scanned(
        &mut self,
        id: EntityId,
        type_name: &str,
        declaration: Option<DeclarationId>,
        scan: ArgumentScan,
    ) {
        if id.0 == 0 {
            self.record_error(None, ParseError::format("entity id #0 is not allowed"));
            return;
        }
        if self.entities.contains_key(&id) {
            self.record_error(Some(id), ParseError::DuplicateId(id));
            return;
        }
        let guid = match scan.guid {
            Some(guid) => match self.by_guid.get(&guid) {
                Some(existing) => {
                    let existing = *existing;
                    self.record_error(Some(id), ParseError::DuplicateGuid { guid, existing });
                    None
                }
                None => Some(guid),
            },
            None => None,
        };
        let type_name = self.intern(type_name);
        self.insert(
            id,
            type_name,
            declaration,
            LazyAttributeList::unparsed(scan.span),
            &scan.references,
            guid,
        );
    }

    /// Close a load: attach the source for deferred parsing and report
    /// references to ids that never appeared
    pub(crate) fn finish_load(&mut self, source: ByteSource) {
        self.source = Some(source);
        let mut dangling: Vec<(EntityId, EntityId)> = self
            .by_ref
            .iter()
            .filter(|(target, _)| !self.entities.contains_key(*target))
            .flat_map(|(target, referencers)| referencers.iter().map(move |r| (*r, *target)))
            .collect();
        dangling.sort_unstable();
        for (referencer, target) in dangling {
            self.record_error(Some(referencer), ParseError::EntityNotFound(target));
        }
        self.phase = Phase::Loaded;
        debug!(
            "loaded {} entities of {} types ({} errors)",
            self.entities.len(),
            self.by_type.len(),
            self.errors.lock().len()
        );
    }

    // ========================================================================
    // Writer support
    // ========================================================================

    /// Live entities ordered by id, with their materialized attributes
    pub fn records(&self) -> impl Iterator<Item = EntityRecord<'_>> + '_ {
        self.ids().into_iter().filter_map(move |id| {
            let instance = self.entities.get(&id)?;
            Some(EntityRecord {
                id,
                type_name: instance.type_name(),
                attributes: self.materialized(instance),
            })
        })
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check every index against the primary mapping
    ///
    /// Materializes all entities. Keys of the inverse index may name ids
    /// that never resolved during a load; everything else must be live.
    ///
    /// # Panics
    /// Panics on the first violated invariant.
    pub fn assert_consistent(&self) {
        for (declaration, ids) in &self.by_type {
            for id in ids {
                let instance = self
                    .entities
                    .get(id)
                    .unwrap_or_else(|| panic!("by-type index holds dead id {id}"));
                assert_eq!(instance.declaration, Some(*declaration), "{id} indexed under wrong type");
            }
        }
        for (declaration, ids) in &self.by_type_closure {
            for id in ids {
                let instance = self
                    .entities
                    .get(id)
                    .unwrap_or_else(|| panic!("by-type-closure index holds dead id {id}"));
                let is_a = match (&self.schema, instance.declaration) {
                    (Some(schema), Some(d)) => schema.is_subtype_of(d, *declaration),
                    _ => false,
                };
                assert!(is_a, "{id} in closure of a type it does not derive from");
            }
        }
        for instance in self.entities.values() {
            if let (Some(schema), Some(declaration)) = (&self.schema, instance.declaration) {
                assert!(
                    self.instances_by_type(declaration, false).contains(&instance.id),
                    "{} missing from by-type index",
                    instance.id
                );
                for ancestor in schema.ancestors(declaration) {
                    assert!(
                        self.instances_by_type(ancestor, true).contains(&instance.id),
                        "{} missing from by-type-closure index",
                        instance.id
                    );
                }
            }
        }

        let mut guid_owners = FxHashSet::default();
        for (guid, id) in &self.by_guid {
            let instance = self
                .entities
                .get(id)
                .unwrap_or_else(|| panic!("by-guid index holds dead id {id}"));
            assert!(guid_owners.insert(*id), "{id} holds two guids");
            if let Ok((_, actual)) = self.structural_facts(instance) {
                assert_eq!(actual.as_deref(), Some(guid.as_str()), "stale guid for {id}");
            }
        }

        for (target, referencers) in &self.by_ref {
            for referencer in referencers {
                let instance = self
                    .entities
                    .get(referencer)
                    .unwrap_or_else(|| panic!("by-reference index holds dead id {referencer}"));
                if let Ok((references, _)) = self.structural_facts(instance) {
                    assert!(
                        references.contains(target),
                        "{referencer} listed as referencing {target} but does not"
                    );
                }
            }
        }
        for instance in self.entities.values() {
            assert!(instance.id.0 <= self.max_id, "{} above the id counter", instance.id);
            if let Ok((references, _)) = self.structural_facts(instance) {
                for reference in references {
                    assert!(
                        self.instances_by_reference(reference).contains(&instance.id),
                        "{} references {reference} but is not in its inverse set",
                        instance.id
                    );
                }
            }
        }
    }
}

fn remove_from_index(
    index: &mut FxHashMap<DeclarationId, Vec<EntityId>>,
    declaration: DeclarationId,
    id: EntityId,
) {
    if let Some(ids) = index.get_mut(&declaration) {
        ids.retain(|candidate| *candidate != id);
        if ids.is_empty() {
            index.remove(&declaration);
        }
    }
}

impl EntityResolver for EntityStore {
    fn get(&self, id: EntityId) -> Option<Arc<DecodedEntity>> {
        let instance = self.entities.get(&id)?;
        let attributes = self.materialized(instance).ok()?;
        Some(Arc::new(DecodedEntity {
            id,
            type_name: instance.type_name().to_string(),
            declaration: instance.declaration,
            attributes,
        }))
    }

    fn ids_by_type_name(&self, type_name: &str, include_subtypes: bool) -> Vec<EntityId> {
        self.instances_by_type_name(type_name, include_subtypes)
            .map(<[EntityId]>::to_vec)
            .unwrap_or_default()
    }

    fn all_ids(&self) -> Vec<EntityId> {
        self.ids()
    }

    fn entity_count(&self) -> usize {
        self.len()
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("schema", &self.schema.as_ref().map(|s| s.name()))
            .field("entities", &self.entities.len())
            .field("max_id", &self.max_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifc_graph_model::{EntityResolverExt, SchemaBuilder};

    fn schema() -> Arc<SchemaDefinition> {
        Arc::new(
            SchemaBuilder::new("GRAPH")
                .abstract_entity("Root", None, &[("GlobalId", false), ("Name", true)])
                .entity("Node", Some("Root"), &[("Next", true), ("Items", true)])
                .entity("SpecialNode", Some("Node"), &[])
                .entity("Rel", Some("Root"), &[("Relating", false), ("Related", false)])
                .entity("Point", None, &[("Coordinates", false)])
                .inverse("Node", "HasRels", "Rel", "Related", 0, None)
                .guid("Root", "GlobalId")
                .build()
                .unwrap(),
        )
    }

    fn s(value: &str) -> AttributeValue {
        AttributeValue::String(value.to_string())
    }

    fn r(id: u32) -> AttributeValue {
        AttributeValue::EntityRef(EntityId(id))
    }

    fn node(guid: &str, next: AttributeValue) -> NewEntity {
        NewEntity::new("Node", vec![s(guid), AttributeValue::Null, next])
    }

    fn decl(store: &EntityStore, name: &str) -> DeclarationId {
        store.schema().unwrap().declaration_by_name(name).unwrap().id()
    }

    #[test]
    fn test_new_store_is_empty_and_good() {
        let store = EntityStore::new(schema());
        assert_eq!(store.state(), StoreState::Empty);
        assert!(store.good());
        assert_eq!(store.header().schema_identifier(), Some("GRAPH"));
    }

    #[test]
    fn test_add_entity_updates_indices() {
        let mut store = EntityStore::new(schema());
        let a = store.add_entity(node("a", AttributeValue::Null)).unwrap();
        let b = store
            .add_entity(NewEntity::new("SpecialNode", vec![s("b"), s("B"), r(a.0)]))
            .unwrap();
        assert_eq!((a, b), (EntityId(1), EntityId(2)));
        assert_eq!(store.state(), StoreState::Loaded { has_errors: false });

        let node = decl(&store, "Node");
        let root = decl(&store, "Root");
        assert_eq!(store.instances_by_type(node, false), &[a]);
        assert_eq!(store.instances_by_type(node, true), &[a, b]);
        assert_eq!(store.instances_by_type(root, true), &[a, b]);
        assert!(store.instances_by_type(root, false).is_empty());
        assert_eq!(store.instances_by_reference(a), &[b]);
        assert_eq!(store.instance_by_guid("b").unwrap().id(), b);
        // Trailing optional attribute padded
        assert_eq!(store.attributes(a).unwrap().len(), 4);
        assert_eq!(store.types().len(), 2);
        assert_eq!(store.types_with_supertypes().len(), 3);
        store.assert_consistent();
    }

    #[test]
    fn test_add_entity_rejections() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(5u32)).unwrap();

        assert!(matches!(
            store.add_entity(node("x", AttributeValue::Null).with_id(5u32)),
            Err(ParseError::DuplicateId(EntityId(5)))
        ));
        assert!(matches!(
            store.add_entity(NewEntity::new("Nope", vec![])),
            Err(ParseError::UnknownType(_))
        ));
        assert!(matches!(
            store.add_entity(NewEntity::new("Root", vec![s("r")])),
            Err(ParseError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            store.add_entity(NewEntity::new("Point", vec![])),
            Err(ParseError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            store.add_entity(node("y", r(99))),
            Err(ParseError::EntityNotFound(EntityId(99)))
        ));
        assert!(store.add_entity(node("z", AttributeValue::Null).with_id(0u32)).is_err());
        assert_eq!(store.len(), 1);
        store.assert_consistent();
    }

    #[test]
    fn test_self_reference_is_allowed() {
        let mut store = EntityStore::new(schema());
        let id = store.add_entity(node("a", r(1))).unwrap();
        assert_eq!(store.instances_by_reference(id), &[id]);
        // A self-reference does not block removal
        store.remove_entity(id, RemovalPolicy::Restrict).unwrap();
        assert!(store.is_empty());
        store.assert_consistent();
    }

    #[test]
    fn test_duplicate_guid_keeps_first() {
        let mut store = EntityStore::new(schema());
        let first = store.add_entity(node("same", AttributeValue::Null)).unwrap();
        let err = store.add_entity(node("same", AttributeValue::Null)).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DuplicateGuid { ref guid, existing } if guid == "same" && existing == first
        ));
        assert_eq!(store.instance_by_guid("same").unwrap().id(), first);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fresh_ids_are_never_reused() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(10u32)).unwrap();
        let next = store.add_entity(node("b", AttributeValue::Null)).unwrap();
        assert_eq!(next, EntityId(11));
        store.remove_entity(next, RemovalPolicy::Restrict).unwrap();
        let again = store.add_entity(node("c", AttributeValue::Null)).unwrap();
        assert_eq!(again, EntityId(12));
        assert_eq!(store.fresh_id().unwrap(), EntityId(13));
        assert_eq!(store.max_id(), EntityId(13));
    }

    #[test]
    fn test_cycle_safe_traversal() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(1u32)).unwrap();
        store.add_entity(node("b", r(1)).with_id(2u32)).unwrap();
        store.set_attribute(EntityId(1), 2, r(2)).unwrap();

        assert_eq!(store.traverse(EntityId(1), -1), vec![EntityId(1), EntityId(2)]);
        assert_eq!(store.traverse(EntityId(2), -1), vec![EntityId(2), EntityId(1)]);
        assert_eq!(store.traverse(EntityId(1), 0), vec![EntityId(1)]);
        assert!(store.traverse(EntityId(42), -1).is_empty());
        store.assert_consistent();
    }

    #[test]
    fn test_traversal_order_follows_attributes() {
        let mut store = EntityStore::new(schema());
        for id in 1..=4u32 {
            store
                .add_entity(NewEntity::new("Point", vec![AttributeValue::List(vec![])]).with_id(id))
                .unwrap();
        }
        // Next = #3, Items = (#2, (#4, #1))
        store
            .add_entity(
                NewEntity::new(
                    "Node",
                    vec![
                        s("n"),
                        AttributeValue::Null,
                        r(3),
                        AttributeValue::List(vec![r(2), AttributeValue::List(vec![r(4), r(1)])]),
                    ],
                )
                .with_id(10u32),
            )
            .unwrap();
        let order: Vec<u32> = store.traverse(EntityId(10), 1).into_iter().map(|id| id.0).collect();
        assert_eq!(order, vec![10, 3, 2, 4, 1]);
    }

    #[test]
    fn test_dangling_removal() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(1u32)).unwrap();
        store.add_entity(node("b", r(1)).with_id(2u32)).unwrap();
        let node_decl = decl(&store, "Node");

        let err = store.remove_entity(EntityId(1), RemovalPolicy::Restrict).unwrap_err();
        assert!(matches!(
            err,
            ParseError::DanglingReference { entity: EntityId(1), ref referenced_by } if referenced_by == &[EntityId(2)]
        ));

        store.remove_entity(EntityId(2), RemovalPolicy::Restrict).unwrap();
        store.remove_entity(EntityId(1), RemovalPolicy::Restrict).unwrap();
        assert!(store.instance_by_id(EntityId(1)).is_none());
        assert!(store.instance_by_guid("a").is_none());
        assert!(!store.instances_by_type(node_decl, true).contains(&EntityId(1)));
        assert!(store.instances_by_reference(EntityId(1)).is_empty());
        store.assert_consistent();
    }

    #[test]
    fn test_detach_removal_clears_references() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(1u32)).unwrap();
        store.add_entity(node("b", AttributeValue::Null).with_id(2u32)).unwrap();
        store
            .add_entity(
                NewEntity::new(
                    "Node",
                    vec![s("c"), AttributeValue::Null, r(1), AttributeValue::List(vec![r(1), r(2)])],
                )
                .with_id(3u32),
            )
            .unwrap();

        store.remove_entity(EntityId(1), RemovalPolicy::Detach).unwrap();
        let values = store.attributes(EntityId(3)).unwrap();
        assert!(values[2].is_null());
        assert_eq!(values[3], AttributeValue::List(vec![r(2)]));
        assert_eq!(store.instances_by_reference(EntityId(2)), &[EntityId(3)]);
        store.assert_consistent();
    }

    #[test]
    fn test_set_attribute_moves_references_and_guid() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(1u32)).unwrap();
        store.add_entity(node("b", AttributeValue::Null).with_id(2u32)).unwrap();
        store.add_entity(node("c", r(1)).with_id(3u32)).unwrap();

        store.set_attribute(EntityId(3), 2, r(2)).unwrap();
        assert!(store.instances_by_reference(EntityId(1)).is_empty());
        assert_eq!(store.instances_by_reference(EntityId(2)), &[EntityId(3)]);

        store.set_attribute(EntityId(3), 0, s("renamed")).unwrap();
        assert!(store.instance_by_guid("c").is_none());
        assert_eq!(store.instance_by_guid("renamed").unwrap().id(), EntityId(3));

        assert!(matches!(
            store.set_attribute(EntityId(3), 0, s("a")),
            Err(ParseError::DuplicateGuid { .. })
        ));
        assert!(matches!(
            store.set_attribute(EntityId(3), 9, AttributeValue::Null),
            Err(ParseError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            store.set_attribute(EntityId(3), 2, r(77)),
            Err(ParseError::EntityNotFound(EntityId(77)))
        ));
        store.assert_consistent();
    }

    #[test]
    fn test_inverse_attribute_lookup() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(1u32)).unwrap();
        store.add_entity(node("b", r(1)).with_id(2u32)).unwrap();
        // Rel references #1 as Related (index 3) and #2 as Relating (index 2)
        store
            .add_entity(NewEntity::new("Rel", vec![s("r"), AttributeValue::Null, r(2), r(1)]).with_id(3u32))
            .unwrap();

        assert_eq!(store.inverse(EntityId(1), "HasRels").unwrap(), vec![EntityId(3)]);
        assert!(store.inverse(EntityId(2), "HasRels").unwrap().is_empty());
        let rel = decl(&store, "Rel");
        assert_eq!(store.get_inverse(EntityId(2), rel, None), vec![EntityId(3)]);
        assert_eq!(store.instances_by_reference(EntityId(1)), &[EntityId(2), EntityId(3)]);
        assert!(matches!(
            store.inverse(EntityId(1), "Missing"),
            Err(ParseError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_insert_reports_position() {
        let mut store = EntityStore::new(schema());
        let err = store
            .add_entities(vec![
                node("a", AttributeValue::Null),
                node("b", AttributeValue::Null),
                node("a", AttributeValue::Null),
                node("c", AttributeValue::Null),
            ])
            .unwrap_err();
        assert!(matches!(err, ParseError::Batch { position: 2, .. }));
        // Entities before the failure remain
        assert_eq!(store.len(), 2);
        store.assert_consistent();
    }

    #[test]
    fn test_type_queries_by_name() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null)).unwrap();
        assert_eq!(store.instances_by_type_name("root", true).unwrap().len(), 1);
        assert!(matches!(
            store.instances_by_type_name("IfcWall", true),
            Err(ParseError::UnknownType(_))
        ));
        assert_eq!(store.ids_by_type_name("node", false), vec![EntityId(1)]);
        assert!(store.exists(EntityId(1)));
        assert_eq!(store.get(EntityId(1)).unwrap().type_name, "NODE");
    }

    #[test]
    fn test_records_are_ordered_by_id() {
        let mut store = EntityStore::new(schema());
        store.add_entity(node("a", AttributeValue::Null).with_id(9u32)).unwrap();
        store.add_entity(node("b", AttributeValue::Null).with_id(3u32)).unwrap();
        let ids: Vec<_> = store.records().map(|record| record.id).collect();
        assert_eq!(ids, vec![EntityId(3), EntityId(9)]);
    }
}
