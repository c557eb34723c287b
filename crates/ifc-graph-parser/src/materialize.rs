// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute materialization
//!
//! Turns the raw `( ... )` argument list of a statement into attribute
//! values, and checks them against the declared attribute list. The loader
//! only runs the cheaper [`scan_arguments`] pass; full materialization happens
//! on first access.

use crate::charset::decode_string;
use crate::lexer::{Lexer, Span, Token, TokenKind};
use ifc_graph_model::{AttributeValue, EntityDeclaration, EntityId, LexError, ParseError, Result};

type LexResult<T> = std::result::Result<T, LexError>;

/// Parse a parenthesized argument list
///
/// `bytes` must start (after optional whitespace) with `(`; anything after the
/// matching `)` is an error.
pub fn parse_arguments(bytes: &[u8], base: u64) -> LexResult<Vec<AttributeValue>> {
    let mut lexer = Lexer::with_base(bytes, base);
    let open = lexer.expect_token()?;
    if open.kind != TokenKind::OpenParen {
        return Err(unexpected(&open, "'('"));
    }
    let values = parse_list(&mut lexer)?;
    if let Some(extra) = lexer.next_token()? {
        return Err(unexpected(&extra, "end of argument list"));
    }
    Ok(values)
}

/// Parse list members after the opening parenthesis, through the closing one
fn parse_list(lexer: &mut Lexer<'_>) -> LexResult<Vec<AttributeValue>> {
    let mut values = Vec::new();
    let mut token = lexer.expect_token()?;
    if token.kind == TokenKind::CloseParen {
        return Ok(values);
    }
    loop {
        values.push(parse_value(lexer, token)?);
        let separator = lexer.expect_token()?;
        match separator.kind {
            TokenKind::Comma => token = lexer.expect_token()?,
            TokenKind::CloseParen => return Ok(values),
            _ => return Err(unexpected(&separator, "',' or ')'")),
        }
    }
}

fn parse_value(lexer: &mut Lexer<'_>, token: Token<'_>) -> LexResult<AttributeValue> {
    Ok(match token.kind {
        TokenKind::Omitted => AttributeValue::Null,
        TokenKind::Derived => AttributeValue::Derived,
        TokenKind::EntityName(id) => AttributeValue::EntityRef(EntityId(id)),
        TokenKind::Integer(i) => AttributeValue::Integer(i),
        TokenKind::Real(f) => AttributeValue::Float(f),
        TokenKind::String(body) => {
            AttributeValue::String(decode_string(body, token.span.start + 1)?)
        }
        TokenKind::Binary(digits) => AttributeValue::Binary(digits.to_string()),
        TokenKind::Enumeration(tag) => AttributeValue::Enum(tag.to_string()),
        TokenKind::Logical(value) => AttributeValue::Logical(value),
        TokenKind::OpenParen => AttributeValue::List(parse_list(lexer)?),
        TokenKind::Keyword(name) => {
            // Typed value: IFCLABEL('text')
            let open = lexer.expect_token()?;
            if open.kind != TokenKind::OpenParen {
                return Err(unexpected(&open, "'(' after type name"));
            }
            AttributeValue::TypedValue(name.to_ascii_uppercase(), parse_list(lexer)?)
        }
        _ => return Err(unexpected(&token, "an attribute value")),
    })
}

fn unexpected(token: &Token<'_>, expected: &str) -> LexError {
    LexError::new(
        token.span.start,
        format!("expected {expected}, found {:?}", token.kind),
    )
}

/// Result of the load-time argument scan
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArgumentScan {
    /// Span of the argument list, `(` through `)`
    pub span: Span,
    /// Every `#id` in the list, nested aggregates included, in order
    pub references: Vec<EntityId>,
    /// Decoded string at the requested top-level position
    pub guid: Option<String>,
    /// Number of top-level arguments
    pub count: usize,
}

/// Scan an argument list token by token without building values
///
/// The lexer must be positioned before the opening parenthesis. Only the
/// string at top-level position `guid_index` is decoded.
pub fn scan_arguments(
    lexer: &mut Lexer<'_>,
    guid_index: Option<usize>,
) -> LexResult<ArgumentScan> {
    let open = lexer.expect_token()?;
    if open.kind != TokenKind::OpenParen {
        return Err(unexpected(&open, "'('"));
    }

    let mut scan = ArgumentScan::default();
    let mut depth = 1usize;
    let mut index = 0usize;
    let mut empty = true;
    loop {
        let token = lexer.expect_token()?;
        match token.kind {
            TokenKind::OpenParen => depth += 1,
            TokenKind::CloseParen => {
                depth -= 1;
                if depth == 0 {
                    scan.span = Span::new(open.span.start, token.span.end);
                    scan.count = if empty { 0 } else { index + 1 };
                    return Ok(scan);
                }
            }
            TokenKind::Comma if depth == 1 => index += 1,
            TokenKind::EntityName(id) => scan.references.push(EntityId(id)),
            TokenKind::String(body) if depth == 1 && Some(index) == guid_index => {
                scan.guid = Some(decode_string(body, token.span.start + 1)?);
            }
            TokenKind::Semicolon | TokenKind::Equals => {
                return Err(unexpected(&token, "an attribute value"))
            }
            _ => {}
        }
        empty = false;
    }
}

/// Check the attribute count against a declaration
///
/// Fewer values than declared is accepted when every missing trailing
/// attribute is optional.
pub fn check_arity(id: EntityId, declaration: &EntityDeclaration, count: usize) -> Result<()> {
    let declared = declaration.attributes();
    if count > declared.len() {
        return Err(ParseError::schema_mismatch(
            id,
            format!(
                "{} has {} attributes, found {count}",
                declaration.name(),
                declared.len()
            ),
        ));
    }
    if let Some(missing) = declared[count..].iter().find(|a| !a.optional) {
        return Err(ParseError::schema_mismatch(
            id,
            format!(
                "{} has {} attributes, found {count}; required attribute {} is missing",
                declaration.name(),
                declared.len(),
                missing.name
            ),
        ));
    }
    Ok(())
}

/// Check the values against a declaration and pad omitted trailing optional
/// attributes with `$`
pub fn conform(
    id: EntityId,
    declaration: &EntityDeclaration,
    values: &mut Vec<AttributeValue>,
) -> Result<()> {
    check_arity(id, declaration, values.len())?;
    values.resize(declaration.attribute_count(), AttributeValue::Null);
    Ok(())
}

/// Materialize the raw argument list of entity `id`
///
/// Without a declaration (unknown type or schema) the values are returned as
/// written.
pub fn materialize(
    id: EntityId,
    raw: &[u8],
    base: u64,
    declaration: Option<&EntityDeclaration>,
) -> Result<Vec<AttributeValue>> {
    let mut values = parse_arguments(raw, base)?;
    if let Some(declaration) = declaration {
        conform(id, declaration, &mut values)?;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ifc_graph_model::{Logical, SchemaBuilder, SchemaDefinition};

    fn schema() -> SchemaDefinition {
        SchemaBuilder::new("TEST")
            .entity("Point", None, &[("X", false), ("Y", false), ("Label", true)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_nested_values() {
        let values =
            parse_arguments(b"('a''b',$,*,#7,.T.,.X.,((1,2.5),()),IFCLABEL('w'),\"1F\")", 0)
                .unwrap();
        assert_eq!(
            values,
            vec![
                AttributeValue::String("a'b".into()),
                AttributeValue::Null,
                AttributeValue::Derived,
                AttributeValue::EntityRef(EntityId(7)),
                AttributeValue::Logical(Logical::True),
                AttributeValue::Enum("X".into()),
                AttributeValue::List(vec![
                    AttributeValue::List(vec![
                        AttributeValue::Integer(1),
                        AttributeValue::Float(2.5)
                    ]),
                    AttributeValue::List(vec![]),
                ]),
                AttributeValue::TypedValue(
                    "IFCLABEL".into(),
                    vec![AttributeValue::String("w".into())]
                ),
                AttributeValue::Binary("1F".into()),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(b"(1,,2)", 0).is_err());
        assert!(parse_arguments(b"(1 2)", 0).is_err());
        assert!(parse_arguments(b"(1,2", 0).is_err());
        assert!(parse_arguments(b"(1) x", 0).is_err());
        let err = parse_arguments(b"('\\Q')", 40).unwrap_err();
        assert_eq!(err.offset, 42);
    }

    #[test]
    fn test_scan_collects_references_and_guid() {
        let mut lexer = Lexer::with_base(b"('2O2Fr$t4X7Zf8NOew3FLOH',#5,$,(#6,(#7)),'x')", 10);
        let scan = scan_arguments(&mut lexer, Some(0)).unwrap();
        assert_eq!(scan.references, vec![EntityId(5), EntityId(6), EntityId(7)]);
        assert_eq!(scan.guid.as_deref(), Some("2O2Fr$t4X7Zf8NOew3FLOH"));
        assert_eq!(scan.count, 5);
        assert_eq!(scan.span, Span::new(10, 55));

        let mut lexer = Lexer::new(b"()");
        assert_eq!(scan_arguments(&mut lexer, None).unwrap().count, 0);
    }

    #[test]
    fn test_arity_accounts_for_optional_trailing() {
        let schema = schema();
        let point = schema.declaration_by_name("Point").unwrap();

        let values = materialize(EntityId(1), b"(1.,2.)", 0, Some(point)).unwrap();
        assert_eq!(values.len(), 3);
        assert!(values[2].is_null());

        let err = materialize(EntityId(1), b"(1.)", 0, Some(point)).unwrap_err();
        assert!(matches!(err, ParseError::SchemaMismatch { entity: EntityId(1), .. }));

        let err = materialize(EntityId(1), b"(1.,2.,'a',4)", 0, Some(point)).unwrap_err();
        assert!(matches!(err, ParseError::SchemaMismatch { .. }));

        // Untyped entities keep whatever was written
        assert_eq!(materialize(EntityId(1), b"(1)", 0, None).unwrap().len(), 1);
    }
}
