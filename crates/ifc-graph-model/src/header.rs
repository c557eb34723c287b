// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header section records
//!
//! The header is a fixed block of three records parsed once per file. It is
//! not indexed; the store only consults [`FileSchema`] to pick a catalogue.

use serde::{Deserialize, Serialize};

/// Default view definition written for newly created models
pub const DEFAULT_VIEW_DEFINITION: &str = "ViewDefinition [CoordinationView]";

/// Default implementation level written for newly created models
pub const DEFAULT_IMPLEMENTATION_LEVEL: &str = "2;1";

/// `FILE_DESCRIPTION((description, ...), implementation_level)`
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileDescription {
    pub description: Vec<String>,
    pub implementation_level: String,
}

/// `FILE_NAME(name, time_stamp, (author), (organization),
/// preprocessor_version, originating_system, authorization)`
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileName {
    pub name: String,
    pub time_stamp: String,
    pub author: Vec<String>,
    pub organization: Vec<String>,
    pub preprocessor_version: String,
    pub originating_system: String,
    pub authorization: String,
}

/// `FILE_SCHEMA(('IFC4'))`
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileSchema {
    pub schema_identifiers: Vec<String>,
}

/// Parsed header section
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    pub description: FileDescription,
    pub name: FileName,
    pub schema: FileSchema,
}

impl Header {
    /// Header for a new model of `schema`, stamped with `time_stamp`
    pub fn new(schema: impl Into<String>, time_stamp: impl Into<String>) -> Self {
        Header {
            description: FileDescription {
                description: vec![DEFAULT_VIEW_DEFINITION.to_string()],
                implementation_level: DEFAULT_IMPLEMENTATION_LEVEL.to_string(),
            },
            name: FileName {
                time_stamp: time_stamp.into(),
                ..FileName::default()
            },
            schema: FileSchema {
                schema_identifiers: vec![schema.into()],
            },
        }
    }

    /// First schema identifier, which selects the catalogue
    pub fn schema_identifier(&self) -> Option<&str> {
        self.schema
            .schema_identifiers
            .first()
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_header_defaults() {
        let header = Header::new("IFC4", "2024-01-01T00:00:00");
        assert_eq!(header.schema_identifier(), Some("IFC4"));
        assert_eq!(header.description.implementation_level, "2;1");
        assert_eq!(
            header.description.description,
            vec!["ViewDefinition [CoordinationView]".to_string()]
        );
        assert_eq!(header.name.time_stamp, "2024-01-01T00:00:00");
    }

    #[test]
    fn test_empty_header_has_no_schema() {
        assert_eq!(Header::default().schema_identifier(), None);
    }
}
