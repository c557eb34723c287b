// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! String escape decoding and encoding
//!
//! Physical files are 7-bit; everything else travels in escape sequences:
//! `''` and `\\` for the delimiters, `\S\c` for the upper half of the active
//! ISO 8859 page, `\X\hh` for a single 8-bit code, `\X2\` and `\X4\` for
//! UCS-2 / UCS-4 runs closed by `\X0\`. Page switches (`\P?\`) are accepted
//! and ignored.

use ifc_graph_model::LexError;

/// Decode the body of a string token (the bytes between the quotes)
///
/// `offset` is the absolute position of the first body byte, used for
/// error reporting.
pub fn decode_string(raw: &[u8], offset: u64) -> Result<String, LexError> {
    // Fast path: nothing to unescape
    if !raw.iter().any(|&b| b == b'\\' || b == b'\'') {
        return Ok(bytes_to_string(raw.to_vec()));
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'\'' => {
                if raw.get(i + 1) != Some(&b'\'') {
                    return Err(LexError::new(offset + i as u64, "unescaped quote in string"));
                }
                out.push(b'\'');
                i += 2;
            }
            b'\\' => i = decode_escape(raw, i, offset, &mut out)?,
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    Ok(bytes_to_string(out))
}

/// Decode one escape starting at `raw[start] == b'\\'`, returning the index
/// of the first byte after it
fn decode_escape(
    raw: &[u8],
    start: usize,
    offset: u64,
    out: &mut Vec<u8>,
) -> Result<usize, LexError> {
    let at = |i: usize| offset + i as u64;
    let rest = &raw[start + 1..];

    if rest.first() == Some(&b'\\') {
        out.push(b'\\');
        return Ok(start + 2);
    }
    if let Some(tail) = rest.strip_prefix(b"S\\") {
        let c = *tail
            .first()
            .ok_or_else(|| LexError::new(at(start), "truncated \\S\\ escape"))?;
        if !(0x20..0x7f).contains(&c) {
            return Err(LexError::new(at(start), "\\S\\ escape needs a printable character"));
        }
        push_char(out, char::from(c + 0x80));
        return Ok(start + 4);
    }
    if rest.first() == Some(&b'P') {
        if rest.len() >= 3 && rest[1].is_ascii_uppercase() && rest[2] == b'\\' {
            return Ok(start + 4);
        }
        return Err(LexError::new(at(start), "malformed \\P\\ page switch"));
    }
    if let Some(tail) = rest.strip_prefix(b"X\\") {
        let code = hex_value(tail.get(..2), at(start + 3))?;
        push_char(out, char::from(code as u8));
        return Ok(start + 5);
    }
    if let Some(tail) = rest.strip_prefix(b"X2\\") {
        let (units, used) = hex_run(tail, 4, at(start + 4))?;
        let decoded: String = char::decode_utf16(units.into_iter().map(|u| u as u16))
            .collect::<Result<_, _>>()
            .map_err(|_| LexError::new(at(start), "invalid UTF-16 in \\X2\\ escape"))?;
        out.extend_from_slice(decoded.as_bytes());
        return Ok(start + 4 + used);
    }
    if let Some(tail) = rest.strip_prefix(b"X4\\") {
        let (points, used) = hex_run(tail, 8, at(start + 4))?;
        for point in points {
            let c = char::from_u32(point)
                .ok_or_else(|| LexError::new(at(start), "invalid code point in \\X4\\ escape"))?;
            push_char(out, c);
        }
        return Ok(start + 4 + used);
    }
    Err(LexError::new(at(start), "invalid escape sequence"))
}

/// Parse fixed-width hex groups up to the closing `\X0\`
///
/// Returns the values and the number of bytes consumed including the
/// terminator.
fn hex_run(tail: &[u8], width: usize, offset: u64) -> Result<(Vec<u32>, usize), LexError> {
    let mut values = Vec::new();
    let mut i = 0;
    loop {
        if tail[i..].starts_with(b"\\X0\\") {
            return Ok((values, i + 4));
        }
        if i + width > tail.len() {
            return Err(LexError::new(offset + i as u64, "unterminated extended escape"));
        }
        values.push(hex_value(Some(&tail[i..i + width]), offset + i as u64)?);
        i += width;
    }
}

fn hex_value(digits: Option<&[u8]>, offset: u64) -> Result<u32, LexError> {
    let digits = digits.ok_or_else(|| LexError::new(offset, "truncated hex escape"))?;
    digits.iter().try_fold(0u32, |acc, &d| {
        let v = (d as char)
            .to_digit(16)
            .ok_or_else(|| LexError::new(offset, "invalid hex digit in escape"))?;
        Ok((acc << 4) | v)
    })
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Non-conforming files sometimes carry raw UTF-8 or Latin-1; keep UTF-8 when
/// valid and fall back to Latin-1 otherwise
fn bytes_to_string(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(err) => err.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Encode a string as a quoted string token
pub fn encode_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            ' '..='~' => out.push(c),
            _ => {
                // Group the run of non-printable characters into one escape
                let wide = c as u32 > 0xFFFF;
                out.push_str(if wide { "\\X4\\" } else { "\\X2\\" });
                let mut next = Some(c);
                while let Some(c) = next {
                    if wide {
                        out.push_str(&format!("{:08X}", c as u32));
                    } else {
                        out.push_str(&format!("{:04X}", c as u32));
                    }
                    next = chars
                        .next_if(|n| !(' '..='~').contains(n) && (*n as u32 > 0xFFFF) == wide);
                }
                out.push_str("\\X0\\");
            }
        }
    }
    out.push('\'');
    out
}
