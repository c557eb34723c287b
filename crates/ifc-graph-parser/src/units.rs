// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Unit lookup through the project's unit assignment

use crate::store::EntityStore;
use ifc_graph_model::{AttributeValue, DecodedEntity, EntityId, EntityResolver};

/// IfcProject.UnitsInContext
const PROJECT_UNITS: usize = 8;
/// Nesting limit for conversion-based units defined in terms of each other
const MAX_UNIT_DEPTH: usize = 8;

/// Unit entity and its factor to SI base units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Unit {
    pub entity: EntityId,
    pub scale: f64,
}

impl EntityStore {
    /// Project unit of `category` (e.g. `LENGTHUNIT`, `.AREAUNIT.`)
    ///
    /// Cached, misses included, until the next mutation.
    pub fn get_unit(&self, category: &str) -> Option<Unit> {
        let key = category.trim_matches('.').to_ascii_uppercase();
        if let Some(cached) = self.unit_cache.lock().get(&key) {
            return *cached;
        }
        let unit = find_unit(self, &key);
        self.unit_cache.lock().insert(key, unit);
        unit
    }

    /// Factor converting project lengths to metres; 1.0 when undeclared
    pub fn length_unit_scale(&self) -> f64 {
        self.get_unit("LENGTHUNIT").map_or(1.0, |unit| unit.scale)
    }
}

/// Search IfcProject → IfcUnitAssignment for a unit of `category`
pub fn find_unit(resolver: &dyn EntityResolver, category: &str) -> Option<Unit> {
    let project = resolver
        .ids_by_type_name("IfcProject", true)
        .into_iter()
        .find_map(|id| resolver.get(id))?;
    let assignment = resolver.get(project.get_ref(PROJECT_UNITS)?)?;
    // IfcUnitAssignment.Units
    let units = assignment.get_refs(0)?;
    units.into_iter().find_map(|id| {
        let unit = resolver.get(id)?;
        if unit_type(&unit)? != category {
            return None;
        }
        let scale = unit_scale(&unit, resolver, 0)?;
        Some(Unit { entity: id, scale })
    })
}

fn unit_type(unit: &DecodedEntity) -> Option<&str> {
    match unit.type_name.as_str() {
        "IFCSIUNIT" | "IFCCONVERSIONBASEDUNIT" | "IFCCONTEXTDEPENDENTUNIT" | "IFCDERIVEDUNIT" => {
            unit.get_enum(1)
        }
        _ => None,
    }
}

/// Scale of a unit entity relative to SI
fn unit_scale(unit: &DecodedEntity, resolver: &dyn EntityResolver, depth: usize) -> Option<f64> {
    if depth > MAX_UNIT_DEPTH {
        return None;
    }
    match unit.type_name.as_str() {
        "IFCSIUNIT" => si_unit_scale(unit),
        "IFCCONVERSIONBASEDUNIT" => conversion_unit_scale(unit, resolver, depth),
        "IFCDERIVEDUNIT" => derived_unit_scale(unit, resolver, depth),
        // No defined relation to SI
        "IFCCONTEXTDEPENDENTUNIT" => Some(1.0),
        _ => None,
    }
}

/// IFCSIUNIT(*, UnitType, Prefix, Name)
///
/// The prefix applies per dimension: a `MILLI` `SQUARE_METRE` is 1e-6 m².
fn si_unit_scale(unit: &DecodedEntity) -> Option<f64> {
    let name = unit.get_enum(3)?;
    let prefix = match unit.get(2) {
        Some(AttributeValue::Enum(prefix)) => prefix_scale(prefix)?,
        _ => 1.0,
    };
    Some(prefix.powi(dimension_power(name)))
}

fn prefix_scale(prefix: &str) -> Option<f64> {
    Some(match prefix {
        "EXA" => 1e18,
        "PETA" => 1e15,
        "TERA" => 1e12,
        "GIGA" => 1e9,
        "MEGA" => 1e6,
        "KILO" => 1e3,
        "HECTO" => 1e2,
        "DECA" => 1e1,
        "DECI" => 1e-1,
        "CENTI" => 1e-2,
        "MILLI" => 1e-3,
        "MICRO" => 1e-6,
        "NANO" => 1e-9,
        "PICO" => 1e-12,
        "FEMTO" => 1e-15,
        "ATTO" => 1e-18,
        _ => return None,
    })
}

fn dimension_power(name: &str) -> i32 {
    if name.starts_with("SQUARE_") {
        2
    } else if name.starts_with("CUBIC_") {
        3
    } else {
        1
    }
}

/// IFCCONVERSIONBASEDUNIT(Dimensions, UnitType, Name, ConversionFactor)
fn conversion_unit_scale(
    unit: &DecodedEntity,
    resolver: &dyn EntityResolver,
    depth: usize,
) -> Option<f64> {
    let factor = resolver.get(unit.get_ref(3)?)?;
    // IFCMEASUREWITHUNIT(ValueComponent, UnitComponent)
    if factor.type_name != "IFCMEASUREWITHUNIT" {
        return None;
    }
    let value = measure_value(factor.get(0)?)?;
    let base = resolver.get(factor.get_ref(1)?)?;
    let base_scale = unit_scale(&base, resolver, depth + 1).unwrap_or(1.0);
    Some(value * base_scale)
}

/// IFCDERIVEDUNIT(Elements, UnitType, UserDefinedType)
///
/// Product of the element unit scales raised to their exponents.
fn derived_unit_scale(
    unit: &DecodedEntity,
    resolver: &dyn EntityResolver,
    depth: usize,
) -> Option<f64> {
    let mut scale = 1.0;
    for element_id in unit.get_refs(0)? {
        // IFCDERIVEDUNITELEMENT(Unit, Exponent)
        let element = resolver.get(element_id)?;
        let exponent = element.get(1)?.as_integer()?;
        let named = resolver.get(element.get_ref(0)?)?;
        scale *= unit_scale(&named, resolver, depth + 1)?.powi(i32::try_from(exponent).ok()?);
    }
    Some(scale)
}

fn measure_value(attr: &AttributeValue) -> Option<f64> {
    match attr {
        AttributeValue::Float(f) => Some(*f),
        AttributeValue::Integer(i) => Some(*i as f64),
        AttributeValue::TypedValue(_, args) => args.first().and_then(measure_value),
        _ => None,
    }
}

/// Common length scales to metres
pub mod scales {
    pub const METRE: f64 = 1.0;
    pub const MILLIMETRE: f64 = 0.001;
    pub const CENTIMETRE: f64 = 0.01;
    pub const INCH: f64 = 0.0254;
    pub const FOOT: f64 = 0.3048;
}
