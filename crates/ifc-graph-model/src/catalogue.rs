// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in schema catalogues
//!
//! Hand-maintained subsets of the IFC2X3 and IFC4 schemas covering the
//! kernel (root, object, product, relationship), the spatial structure, common
//! building elements, properties, units, actors and the geometry/topology
//! items most files carry. Attribute order follows the published EXPRESS
//! definitions so positional access is correct for the covered types.

use crate::{Result, SchemaBuilder, SchemaDefinition};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Optional / required attribute flags, for readability below
const OPT: bool = true;
const REQ: bool = false;

static IFC2X3: Lazy<Result<Arc<SchemaDefinition>>> = Lazy::new(|| ifc2x3().map(Arc::new));
static IFC4: Lazy<Result<Arc<SchemaDefinition>>> = Lazy::new(|| ifc4().map(Arc::new));

/// All built-in catalogues that built successfully
pub fn builtin_schemas() -> Vec<Arc<SchemaDefinition>> {
    [&IFC2X3, &IFC4]
        .into_iter()
        .filter_map(|schema| Lazy::force(schema).as_ref().ok().cloned())
        .collect()
}

/// Built-in catalogue by exact name
pub fn builtin(name: &str) -> Option<Arc<SchemaDefinition>> {
    builtin_schemas()
        .into_iter()
        .find(|schema| schema.name().eq_ignore_ascii_case(name))
}

/// Actors, units, geometry and topology (identical in both versions apart
/// from the owner history)
fn resources(builder: SchemaBuilder, ifc4: bool) -> SchemaBuilder {
    builder
        // Actors
        .entity(
            "IfcPerson",
            None,
            &[
                ("Identification", OPT),
                ("FamilyName", OPT),
                ("GivenName", OPT),
                ("MiddleNames", OPT),
                ("PrefixTitles", OPT),
                ("SuffixTitles", OPT),
                ("Roles", OPT),
                ("Addresses", OPT),
            ],
        )
        .entity(
            "IfcOrganization",
            None,
            &[
                ("Identification", OPT),
                ("Name", REQ),
                ("Description", OPT),
                ("Roles", OPT),
                ("Addresses", OPT),
            ],
        )
        .entity(
            "IfcPersonAndOrganization",
            None,
            &[
                ("ThePerson", REQ),
                ("TheOrganization", REQ),
                ("Roles", OPT),
            ],
        )
        .entity(
            "IfcApplication",
            None,
            &[
                ("ApplicationDeveloper", REQ),
                ("Version", REQ),
                ("ApplicationFullName", REQ),
                ("ApplicationIdentifier", REQ),
            ],
        )
        .entity(
            "IfcOwnerHistory",
            None,
            &[
                ("OwningUser", REQ),
                ("OwningApplication", REQ),
                ("State", OPT),
                ("ChangeAction", if ifc4 { OPT } else { REQ }),
                ("LastModifiedDate", OPT),
                ("LastModifyingUser", OPT),
                ("LastModifyingApplication", OPT),
                ("CreationDate", REQ),
            ],
        )
        // Units
        .entity(
            "IfcDimensionalExponents",
            None,
            &[
                ("LengthExponent", REQ),
                ("MassExponent", REQ),
                ("TimeExponent", REQ),
                ("ElectricCurrentExponent", REQ),
                ("ThermodynamicTemperatureExponent", REQ),
                ("AmountOfSubstanceExponent", REQ),
                ("LuminousIntensityExponent", REQ),
            ],
        )
        .abstract_entity("IfcNamedUnit", None, &[("Dimensions", REQ), ("UnitType", REQ)])
        .entity("IfcSIUnit", Some("IfcNamedUnit"), &[("Prefix", OPT), ("Name", REQ)])
        .entity(
            "IfcConversionBasedUnit",
            Some("IfcNamedUnit"),
            &[("Name", REQ), ("ConversionFactor", REQ)],
        )
        .entity("IfcContextDependentUnit", Some("IfcNamedUnit"), &[("Name", REQ)])
        .entity(
            "IfcDerivedUnit",
            None,
            &[("Elements", REQ), ("UnitType", REQ), ("UserDefinedType", OPT)],
        )
        .entity("IfcDerivedUnitElement", None, &[("Unit", REQ), ("Exponent", REQ)])
        .entity("IfcMonetaryUnit", None, &[("Currency", REQ)])
        .entity("IfcUnitAssignment", None, &[("Units", REQ)])
        .entity(
            "IfcMeasureWithUnit",
            None,
            &[("ValueComponent", REQ), ("UnitComponent", REQ)],
        )
        // Geometry
        .abstract_entity("IfcRepresentationItem", None, &[])
        .abstract_entity("IfcGeometricRepresentationItem", Some("IfcRepresentationItem"), &[])
        .abstract_entity("IfcPoint", Some("IfcGeometricRepresentationItem"), &[])
        .entity("IfcCartesianPoint", Some("IfcPoint"), &[("Coordinates", REQ)])
        .entity(
            "IfcDirection",
            Some("IfcGeometricRepresentationItem"),
            &[("DirectionRatios", REQ)],
        )
        .abstract_entity(
            "IfcPlacement",
            Some("IfcGeometricRepresentationItem"),
            &[("Location", REQ)],
        )
        .entity(
            "IfcAxis2Placement2D",
            Some("IfcPlacement"),
            &[("RefDirection", OPT)],
        )
        .entity(
            "IfcAxis2Placement3D",
            Some("IfcPlacement"),
            &[("Axis", OPT), ("RefDirection", OPT)],
        )
        .abstract_entity("IfcObjectPlacement", None, &[])
        .entity(
            "IfcLocalPlacement",
            Some("IfcObjectPlacement"),
            &[("PlacementRelTo", OPT), ("RelativePlacement", REQ)],
        )
        .entity(
            "IfcShellBasedSurfaceModel",
            Some("IfcGeometricRepresentationItem"),
            &[("SbsmBoundary", REQ)],
        )
        .entity(
            "IfcExtrudedAreaSolid",
            Some("IfcGeometricRepresentationItem"),
            &[
                ("SweptArea", REQ),
                ("Position", OPT),
                ("ExtrudedDirection", REQ),
                ("Depth", REQ),
            ],
        )
        .entity(
            "IfcPolyline",
            Some("IfcGeometricRepresentationItem"),
            &[("Points", REQ)],
        )
        // Topology
        .abstract_entity("IfcTopologicalRepresentationItem", Some("IfcRepresentationItem"), &[])
        .abstract_entity("IfcLoop", Some("IfcTopologicalRepresentationItem"), &[])
        .entity("IfcPolyLoop", Some("IfcLoop"), &[("Polygon", REQ)])
        .entity(
            "IfcFaceBound",
            Some("IfcTopologicalRepresentationItem"),
            &[("Bound", REQ), ("Orientation", REQ)],
        )
        .entity("IfcFaceOuterBound", Some("IfcFaceBound"), &[])
        .entity("IfcFace", Some("IfcTopologicalRepresentationItem"), &[("Bounds", REQ)])
        .entity(
            "IfcConnectedFaceSet",
            Some("IfcTopologicalRepresentationItem"),
            &[("CfsFaces", REQ)],
        )
        .entity("IfcOpenShell", Some("IfcConnectedFaceSet"), &[])
        .entity("IfcClosedShell", Some("IfcConnectedFaceSet"), &[])
        // Representation
        .entity(
            "IfcRepresentationContext",
            None,
            &[("ContextIdentifier", OPT), ("ContextType", OPT)],
        )
        .entity(
            "IfcGeometricRepresentationContext",
            Some("IfcRepresentationContext"),
            &[
                ("CoordinateSpaceDimension", REQ),
                ("Precision", OPT),
                ("WorldCoordinateSystem", REQ),
                ("TrueNorth", OPT),
            ],
        )
        .abstract_entity(
            "IfcRepresentation",
            None,
            &[
                ("ContextOfItems", REQ),
                ("RepresentationIdentifier", OPT),
                ("RepresentationType", OPT),
                ("Items", REQ),
            ],
        )
        .entity("IfcShapeModel", Some("IfcRepresentation"), &[])
        .entity("IfcShapeRepresentation", Some("IfcShapeModel"), &[])
        .entity(
            "IfcProductRepresentation",
            None,
            &[("Name", OPT), ("Description", OPT), ("Representations", REQ)],
        )
        .entity("IfcProductDefinitionShape", Some("IfcProductRepresentation"), &[])
}

/// Kernel entities shared by both versions, down to IfcProduct
fn kernel(builder: SchemaBuilder, ifc4: bool) -> SchemaBuilder {
    builder
        .abstract_entity(
            "IfcRoot",
            None,
            &[
                ("GlobalId", REQ),
                ("OwnerHistory", if ifc4 { OPT } else { REQ }),
                ("Name", OPT),
                ("Description", OPT),
            ],
        )
        .abstract_entity("IfcObjectDefinition", Some("IfcRoot"), &[])
        .abstract_entity("IfcObject", Some("IfcObjectDefinition"), &[("ObjectType", OPT)])
        .abstract_entity(
            "IfcProduct",
            Some("IfcObject"),
            &[("ObjectPlacement", OPT), ("Representation", OPT)],
        )
        .abstract_entity("IfcElement", Some("IfcProduct"), &[("Tag", OPT)])
        .abstract_entity("IfcBuildingElement", Some("IfcElement"), &[])
        .abstract_entity("IfcRelationship", Some("IfcRoot"), &[])
        .abstract_entity("IfcRelConnects", Some("IfcRelationship"), &[])
        .entity(
            "IfcRelContainedInSpatialStructure",
            Some("IfcRelConnects"),
            &[("RelatedElements", REQ), ("RelatingStructure", REQ)],
        )
        .abstract_entity("IfcRelDefines", Some("IfcRelationship"), &[])
        .abstract_entity("IfcPropertyDefinition", Some("IfcRoot"), &[])
        .abstract_entity("IfcPropertySetDefinition", Some("IfcPropertyDefinition"), &[])
        .entity(
            "IfcPropertySet",
            Some("IfcPropertySetDefinition"),
            &[("HasProperties", REQ)],
        )
}

fn ifc2x3() -> Result<SchemaDefinition> {
    let builder = kernel(resources(SchemaBuilder::new("IFC2X3"), false), false)
        .entity("IfcWall", Some("IfcBuildingElement"), &[])
        .entity("IfcWallStandardCase", Some("IfcWall"), &[])
        .entity("IfcSlab", Some("IfcBuildingElement"), &[("PredefinedType", OPT)])
        .entity("IfcBeam", Some("IfcBuildingElement"), &[])
        .entity("IfcColumn", Some("IfcBuildingElement"), &[])
        .entity(
            "IfcDoor",
            Some("IfcBuildingElement"),
            &[("OverallHeight", OPT), ("OverallWidth", OPT)],
        )
        .entity(
            "IfcWindow",
            Some("IfcBuildingElement"),
            &[("OverallHeight", OPT), ("OverallWidth", OPT)],
        )
        .entity(
            "IfcBuildingElementProxy",
            Some("IfcBuildingElement"),
            &[("CompositionType", OPT)],
        )
        .abstract_entity(
            "IfcSpatialStructureElement",
            Some("IfcProduct"),
            &[("LongName", OPT), ("CompositionType", REQ)],
        )
        .entity(
            "IfcSite",
            Some("IfcSpatialStructureElement"),
            &[
                ("RefLatitude", OPT),
                ("RefLongitude", OPT),
                ("RefElevation", OPT),
                ("LandTitleNumber", OPT),
                ("SiteAddress", OPT),
            ],
        )
        .entity(
            "IfcBuilding",
            Some("IfcSpatialStructureElement"),
            &[
                ("ElevationOfRefHeight", OPT),
                ("ElevationOfTerrain", OPT),
                ("BuildingAddress", OPT),
            ],
        )
        .entity(
            "IfcBuildingStorey",
            Some("IfcSpatialStructureElement"),
            &[("Elevation", OPT)],
        )
        .entity(
            "IfcProject",
            Some("IfcObject"),
            &[
                ("LongName", OPT),
                ("Phase", OPT),
                ("RepresentationContexts", REQ),
                ("UnitsInContext", REQ),
            ],
        )
        .abstract_entity(
            "IfcRelDecomposes",
            Some("IfcRelationship"),
            &[("RelatingObject", REQ), ("RelatedObjects", REQ)],
        )
        .entity("IfcRelAggregates", Some("IfcRelDecomposes"), &[])
        .entity(
            "IfcRelDefinesByProperties",
            Some("IfcRelDefines"),
            &[("RelatedObjects", REQ), ("RelatingPropertyDefinition", REQ)],
        )
        .abstract_entity("IfcProperty", None, &[("Name", REQ), ("Description", OPT)])
        .abstract_entity("IfcSimpleProperty", Some("IfcProperty"), &[])
        .entity(
            "IfcPropertySingleValue",
            Some("IfcSimpleProperty"),
            &[("NominalValue", OPT), ("Unit", OPT)],
        )
        .inverse("IfcObjectDefinition", "IsDecomposedBy", "IfcRelDecomposes", "RelatingObject", 0, None)
        .inverse("IfcObjectDefinition", "Decomposes", "IfcRelDecomposes", "RelatedObjects", 0, Some(1))
        .inverse("IfcObject", "IsDefinedBy", "IfcRelDefinesByProperties", "RelatedObjects", 0, None)
        .inverse(
            "IfcElement",
            "ContainedInStructure",
            "IfcRelContainedInSpatialStructure",
            "RelatedElements",
            0,
            Some(1),
        )
        .inverse(
            "IfcSpatialStructureElement",
            "ContainsElements",
            "IfcRelContainedInSpatialStructure",
            "RelatingStructure",
            0,
            None,
        )
        .guid("IfcRoot", "GlobalId");
    builder.build()
}

fn ifc4() -> Result<SchemaDefinition> {
    let builder = kernel(resources(SchemaBuilder::new("IFC4"), true), true)
        .entity("IfcWall", Some("IfcBuildingElement"), &[("PredefinedType", OPT)])
        .entity("IfcWallStandardCase", Some("IfcWall"), &[])
        .entity("IfcSlab", Some("IfcBuildingElement"), &[("PredefinedType", OPT)])
        .entity("IfcBeam", Some("IfcBuildingElement"), &[("PredefinedType", OPT)])
        .entity("IfcColumn", Some("IfcBuildingElement"), &[("PredefinedType", OPT)])
        .entity(
            "IfcDoor",
            Some("IfcBuildingElement"),
            &[
                ("OverallHeight", OPT),
                ("OverallWidth", OPT),
                ("PredefinedType", OPT),
                ("OperationType", OPT),
                ("UserDefinedOperationType", OPT),
            ],
        )
        .entity(
            "IfcWindow",
            Some("IfcBuildingElement"),
            &[
                ("OverallHeight", OPT),
                ("OverallWidth", OPT),
                ("PredefinedType", OPT),
                ("PartitioningType", OPT),
                ("UserDefinedPartitioningType", OPT),
            ],
        )
        .entity(
            "IfcBuildingElementProxy",
            Some("IfcBuildingElement"),
            &[("PredefinedType", OPT)],
        )
        .abstract_entity("IfcSpatialElement", Some("IfcProduct"), &[("LongName", OPT)])
        .abstract_entity(
            "IfcSpatialStructureElement",
            Some("IfcSpatialElement"),
            &[("CompositionType", OPT)],
        )
        .entity(
            "IfcSite",
            Some("IfcSpatialStructureElement"),
            &[
                ("RefLatitude", OPT),
                ("RefLongitude", OPT),
                ("RefElevation", OPT),
                ("LandTitleNumber", OPT),
                ("SiteAddress", OPT),
            ],
        )
        .entity(
            "IfcBuilding",
            Some("IfcSpatialStructureElement"),
            &[
                ("ElevationOfRefHeight", OPT),
                ("ElevationOfTerrain", OPT),
                ("BuildingAddress", OPT),
            ],
        )
        .entity(
            "IfcBuildingStorey",
            Some("IfcSpatialStructureElement"),
            &[("Elevation", OPT)],
        )
        .abstract_entity(
            "IfcContext",
            Some("IfcObjectDefinition"),
            &[
                ("ObjectType", OPT),
                ("LongName", OPT),
                ("Phase", OPT),
                ("RepresentationContexts", OPT),
                ("UnitsInContext", OPT),
            ],
        )
        .entity("IfcProject", Some("IfcContext"), &[])
        .abstract_entity("IfcRelDecomposes", Some("IfcRelationship"), &[])
        .entity(
            "IfcRelAggregates",
            Some("IfcRelDecomposes"),
            &[("RelatingObject", REQ), ("RelatedObjects", REQ)],
        )
        .entity(
            "IfcRelDefinesByProperties",
            Some("IfcRelDefines"),
            &[("RelatedObjects", REQ), ("RelatingPropertyDefinition", REQ)],
        )
        .abstract_entity("IfcPropertyAbstraction", None, &[])
        .abstract_entity(
            "IfcProperty",
            Some("IfcPropertyAbstraction"),
            &[("Name", REQ), ("Description", OPT)],
        )
        .abstract_entity("IfcSimpleProperty", Some("IfcProperty"), &[])
        .entity(
            "IfcPropertySingleValue",
            Some("IfcSimpleProperty"),
            &[("NominalValue", OPT), ("Unit", OPT)],
        )
        .inverse("IfcObjectDefinition", "IsDecomposedBy", "IfcRelAggregates", "RelatingObject", 0, None)
        .inverse("IfcObjectDefinition", "Decomposes", "IfcRelAggregates", "RelatedObjects", 0, Some(1))
        .inverse("IfcObject", "IsDefinedBy", "IfcRelDefinesByProperties", "RelatedObjects", 0, None)
        .inverse(
            "IfcElement",
            "ContainedInStructure",
            "IfcRelContainedInSpatialStructure",
            "RelatedElements",
            0,
            Some(1),
        )
        .inverse(
            "IfcSpatialElement",
            "ContainsElements",
            "IfcRelContainedInSpatialStructure",
            "RelatingStructure",
            0,
            None,
        )
        .guid("IfcRoot", "GlobalId");
    builder.build()
}
