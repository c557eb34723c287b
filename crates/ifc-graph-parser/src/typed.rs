// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to store entities
//!
//! Marker types name schema classes at compile time; the check that a class
//! exists happens against the store's active schema at run time, so one
//! marker serves every schema version that declares the class.
//!
//! ```
//! use ifc_graph_parser::typed::IfcWall;
//! use ifc_graph_parser::StepLoader;
//!
//! let store = StepLoader::new().load_str("ISO-10303-21;
//! HEADER;
//! FILE_DESCRIPTION((''),'2;1');
//! FILE_NAME('','',(''),(''),'','','');
//! FILE_SCHEMA(('IFC2X3'));
//! ENDSEC;
//! DATA;
//! #1=IFCWALL('3vB2YO$MX4xv5uCqZZG05x',$,'Wall',$,$,$,$,$);
//! ENDSEC;
//! END-ISO-10303-21;
//! ").unwrap();
//! let walls = store.instances::<IfcWall>(true).unwrap();
//! assert_eq!(walls[0].attribute("Name").unwrap().as_string(), Some("Wall"));
//! ```

use crate::entity::EntityInstance;
use crate::store::EntityStore;
use ifc_graph_model::{AttributeValue, DeclarationId, EntityId, ParseError, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A schema class known by name at compile time
pub trait EntityClass {
    /// Declared class name
    const NAME: &'static str;
}

macro_rules! entity_classes {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name;

            impl EntityClass for $name {
                const NAME: &'static str = stringify!($name);
            }
        )*
    };
}

entity_classes!(
    IfcRoot,
    IfcObjectDefinition,
    IfcObject,
    IfcProduct,
    IfcElement,
    IfcBuildingElement,
    IfcWall,
    IfcWallStandardCase,
    IfcSlab,
    IfcBeam,
    IfcColumn,
    IfcDoor,
    IfcWindow,
    IfcSpatialElement,
    IfcSpatialStructureElement,
    IfcSite,
    IfcBuilding,
    IfcBuildingStorey,
    IfcProject,
    IfcRelationship,
    IfcRelAggregates,
    IfcRelContainedInSpatialStructure,
    IfcRelDefinesByProperties,
    IfcPropertySet,
    IfcPropertySingleValue,
    IfcUnitAssignment,
    IfcSIUnit,
    IfcCartesianPoint,
);

/// An entity known to be a `T` (or a subtype of it)
pub struct Typed<'s, T> {
    store: &'s EntityStore,
    instance: &'s EntityInstance,
    class: PhantomData<T>,
}

impl<T> Clone for Typed<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Typed<'_, T> {}

impl<T: EntityClass> fmt::Debug for Typed<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>({})", T::NAME, self.instance.type_name(), self.instance.id())
    }
}

impl<'s, T: EntityClass> Typed<'s, T> {
    pub fn id(&self) -> EntityId {
        self.instance.id()
    }

    pub fn instance(&self) -> &'s EntityInstance {
        self.instance
    }

    pub fn attributes(&self) -> Result<Arc<[AttributeValue]>> {
        self.store.attributes(self.id())
    }

    /// Attribute by declared name, searched on the entity's actual type
    pub fn attribute(&self, name: &str) -> Result<AttributeValue> {
        let schema = self.store.require_schema()?;
        let declaration = self
            .instance
            .declaration()
            .map(|d| schema.declaration(d))
            .ok_or_else(|| ParseError::UnknownType(self.instance.type_name().to_string()))?;
        let index = declaration.attribute_index(name).ok_or_else(|| {
            ParseError::schema_mismatch(
                self.id(),
                format!("{} has no attribute {name}", declaration.name()),
            )
        })?;
        let values = self.attributes()?;
        values.get(index).cloned().ok_or_else(|| {
            ParseError::schema_mismatch(self.id(), format!("attribute {name} missing"))
        })
    }

    /// View as another class, if the entity is one
    pub fn cast<U: EntityClass>(&self) -> Option<Typed<'s, U>> {
        self.store.instance_as::<U>(self.id())
    }
}

impl EntityStore {
    fn class_declaration<T: EntityClass>(&self) -> Result<DeclarationId> {
        self.require_schema()?
            .declaration_by_name(T::NAME)
            .map(|d| d.id())
            .ok_or_else(|| ParseError::UnknownType(T::NAME.to_string()))
    }

    /// All entities of class `T`
    ///
    /// Fails with [`ParseError::UnknownType`] when the active schema does not
    /// declare `T`.
    pub fn instances<T: EntityClass>(&self, include_subtypes: bool) -> Result<Vec<Typed<'_, T>>> {
        let declaration = self.class_declaration::<T>()?;
        Ok(self
            .instances_by_type(declaration, include_subtypes)
            .iter()
            .filter_map(|id| self.instance_by_id(*id))
            .map(|instance| Typed {
                store: self,
                instance,
                class: PhantomData,
            })
            .collect())
    }

    /// Entity `id` as a `T`, `None` when missing or of another class
    pub fn instance_as<T: EntityClass>(&self, id: EntityId) -> Option<Typed<'_, T>> {
        let declaration = self.class_declaration::<T>().ok()?;
        let instance = self.instance_by_id(id)?;
        let schema = self.schema()?;
        let is_a = instance
            .declaration()
            .is_some_and(|d| schema.is_subtype_of(d, declaration));
        is_a.then_some(Typed {
            store: self,
            instance,
            class: PhantomData,
        })
    }
}
