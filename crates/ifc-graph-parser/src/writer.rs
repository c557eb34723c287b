// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Physical file writer

use crate::charset::encode_string;
use crate::header::write_header;
use crate::store::EntityStore;
use ifc_graph_model::{AttributeValue, Result};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Serializes an [`EntityStore`] as an ISO-10303-21 file
///
/// Entities are written in id order. Entities whose attributes fail to
/// materialize are copied from their raw source bytes.
pub struct StepWriter<'s> {
    store: &'s EntityStore,
}

impl<'s> StepWriter<'s> {
    pub fn new(store: &'s EntityStore) -> Self {
        Self { store }
    }

    pub fn write(&self, out: &mut impl Write) -> io::Result<()> {
        write_header(self.store.header(), out)?;
        writeln!(out, "DATA;")?;
        let mut written = 0usize;
        for record in self.store.records() {
            match &record.attributes {
                Ok(values) => {
                    write!(out, "#{}={}(", record.id.0, record.type_name)?;
                    write_list(out, values)?;
                    writeln!(out, ");")?;
                }
                Err(err) => match self.store.raw_arguments(record.id) {
                    Some(raw) => {
                        warn!("{}: writing raw arguments ({err})", record.id);
                        write!(out, "#{}={}", record.id.0, record.type_name)?;
                        out.write_all(&raw)?;
                        writeln!(out, ";")?;
                    }
                    None => {
                        warn!("{}: skipped, attributes unavailable ({err})", record.id);
                        continue;
                    }
                },
            }
            written += 1;
        }
        writeln!(out, "ENDSEC;")?;
        writeln!(out, "END-ISO-10303-21;")?;
        debug!("wrote {written} entities");
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    pub fn write_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

fn write_list(out: &mut impl Write, values: &[AttributeValue]) -> io::Result<()> {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        write_value(out, value)?;
    }
    Ok(())
}

/// Encode one attribute value
pub fn write_value(out: &mut impl Write, value: &AttributeValue) -> io::Result<()> {
    match value {
        AttributeValue::Null => out.write_all(b"$"),
        AttributeValue::Derived => out.write_all(b"*"),
        AttributeValue::EntityRef(id) => write!(out, "#{}", id.0),
        AttributeValue::Logical(value) => write!(out, ".{}.", value.letter()),
        AttributeValue::Integer(i) => write!(out, "{i}"),
        AttributeValue::Float(f) => out.write_all(format_real(*f).as_bytes()),
        AttributeValue::String(s) => out.write_all(encode_string(s).as_bytes()),
        AttributeValue::Binary(digits) => write!(out, "\"{digits}\""),
        AttributeValue::Enum(tag) => write!(out, ".{tag}."),
        AttributeValue::List(items) => {
            out.write_all(b"(")?;
            write_list(out, items)?;
            out.write_all(b")")
        }
        AttributeValue::TypedValue(name, args) => {
            write!(out, "{name}(")?;
            write_list(out, args)?;
            out.write_all(b")")
        }
    }
}

/// Format a real so it always reads back as a real: `1.0`, `0.5`, `1.E-7`
///
/// Non-finite values have no encoding and are written as `0.`.
pub fn format_real(value: f64) -> String {
    if !value.is_finite() {
        warn!("non-finite real {value} written as 0.");
        return "0.".to_string();
    }
    let text = format!("{value:?}");
    match text.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => format!("{mantissa}E{exponent}"),
        Some((mantissa, exponent)) => format!("{mantissa}.E{exponent}"),
        None => text,
    }
}
