// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Header section parsing and serialization

use crate::charset::encode_string;
use ifc_graph_model::{AttributeValue, Header, ParseError, Result};
use std::io::{self, Write};

/// Current local time in the `FILE_NAME` time stamp format
pub fn create_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Header for a new model of `schema`, stamped now
pub fn default_header(schema: &str) -> Header {
    Header::new(schema, create_timestamp())
}

/// Apply one header record to `header`
///
/// Returns `false` for records this crate does not interpret (e.g.
/// `FILE_POPULATION`), which the caller may skip.
pub fn apply_header_record(
    header: &mut Header,
    keyword: &str,
    args: &[AttributeValue],
) -> Result<bool> {
    match keyword.to_ascii_uppercase().as_str() {
        "FILE_DESCRIPTION" => {
            expect_count(keyword, args, 2)?;
            header.description.description = string_list(keyword, &args[0])?;
            header.description.implementation_level = string(keyword, &args[1])?;
        }
        "FILE_NAME" => {
            expect_count(keyword, args, 7)?;
            let name = &mut header.name;
            name.name = string(keyword, &args[0])?;
            name.time_stamp = string(keyword, &args[1])?;
            name.author = string_list(keyword, &args[2])?;
            name.organization = string_list(keyword, &args[3])?;
            name.preprocessor_version = string(keyword, &args[4])?;
            name.originating_system = string(keyword, &args[5])?;
            name.authorization = string(keyword, &args[6])?;
        }
        "FILE_SCHEMA" => {
            expect_count(keyword, args, 1)?;
            header.schema.schema_identifiers = string_list(keyword, &args[0])?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn expect_count(keyword: &str, args: &[AttributeValue], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(ParseError::InvalidHeader(format!(
            "{keyword} expects {count} arguments, found {}",
            args.len()
        )));
    }
    Ok(())
}

fn string(keyword: &str, value: &AttributeValue) -> Result<String> {
    match value {
        AttributeValue::String(s) => Ok(s.clone()),
        AttributeValue::Null => Ok(String::new()),
        other => Err(ParseError::InvalidHeader(format!(
            "{keyword}: expected a string, found {other:?}"
        ))),
    }
}

fn string_list(keyword: &str, value: &AttributeValue) -> Result<Vec<String>> {
    match value {
        AttributeValue::List(items) => items.iter().map(|item| string(keyword, item)).collect(),
        AttributeValue::Null => Ok(Vec::new()),
        other => Err(ParseError::InvalidHeader(format!(
            "{keyword}: expected a list of strings, found {other:?}"
        ))),
    }
}

/// Write the `ISO-10303-21;` line and the complete header section
pub fn write_header(header: &Header, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "ISO-10303-21;")?;
    writeln!(out, "HEADER;")?;
    writeln!(
        out,
        "FILE_DESCRIPTION({},{});",
        list(&header.description.description),
        encode_string(&header.description.implementation_level)
    )?;
    let name = &header.name;
    writeln!(
        out,
        "FILE_NAME({},{},{},{},{},{},{});",
        encode_string(&name.name),
        encode_string(&name.time_stamp),
        list(&name.author),
        list(&name.organization),
        encode_string(&name.preprocessor_version),
        encode_string(&name.originating_system),
        encode_string(&name.authorization)
    )?;
    writeln!(out, "FILE_SCHEMA({});", list(&header.schema.schema_identifiers))?;
    writeln!(out, "ENDSEC;")
}

fn list(items: &[String]) -> String {
    let encoded: Vec<String> = items.iter().map(|s| encode_string(s)).collect();
    format!("({})", encoded.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::parse_arguments;

    fn apply(header: &mut Header, record: &str) -> Result<bool> {
        let open = record.find('(').unwrap();
        let args = parse_arguments(record[open..].as_bytes(), 0)?;
        apply_header_record(header, &record[..open], &args)
    }

    #[test]
    fn test_parse_header_records() {
        let mut header = Header::default();
        assert!(apply(
            &mut header,
            "FILE_DESCRIPTION(('ViewDefinition [CoordinationView]'),'2;1')"
        )
        .unwrap());
        assert!(apply(
            &mut header,
            "FILE_NAME('test.ifc','2024-01-01T00:00:00',('Author'),('Org'),'Preprocessor','App','')"
        )
        .unwrap());
        assert!(apply(&mut header, "FILE_SCHEMA(('IFC2X3'))").unwrap());
        assert!(!apply(&mut header, "FILE_POPULATION('IFC2X3',$,$)").unwrap());

        assert_eq!(header.schema_identifier(), Some("IFC2X3"));
        assert_eq!(header.name.name, "test.ifc");
        assert_eq!(header.name.author, vec!["Author".to_string()]);
        assert_eq!(header.name.originating_system, "App");
        assert_eq!(header.description.implementation_level, "2;1");
    }

    #[test]
    fn test_malformed_records_are_header_errors() {
        let mut header = Header::default();
        assert!(matches!(
            apply(&mut header, "FILE_SCHEMA('IFC4')"),
            Err(ParseError::InvalidHeader(_))
        ));
        assert!(matches!(
            apply(&mut header, "FILE_DESCRIPTION(('a'))"),
            Err(ParseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_written_header_parses_back() {
        let mut header = default_header("IFC4");
        header.name.author = vec!["Jörg".to_string()];
        let mut out = Vec::new();
        write_header(&header, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("ISO-10303-21;\nHEADER;\n"));
        assert!(text.contains("FILE_SCHEMA(('IFC4'));"));

        let mut parsed = Header::default();
        for line in text.lines().filter(|l| l.starts_with("FILE_")) {
            apply(&mut parsed, line.trim_end_matches(';')).unwrap();
        }
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_timestamp_format() {
        let stamp = create_timestamp();
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[10..11], "T");
    }
}
