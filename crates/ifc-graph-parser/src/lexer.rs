// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Token source for the physical file grammar
//!
//! The lexer works on a byte window of the file together with the absolute
//! offset of that window, so spans it reports can be used to re-read the
//! same bytes later from any [`crate::ByteSource`].

use ifc_graph_model::{LexError, Logical};
use memchr::{memchr, memmem};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize},
    IResult, Parser,
};

/// Absolute byte offset in the source
pub type Position = u64;

/// Half-open range of absolute byte offsets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Self {
        debug_assert!(start <= end);
        Span { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Lexical token kinds
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind<'a> {
    /// Standard or user-defined keyword (`IFCWALL`, `FILE_NAME`, `ISO-10303-21`)
    Keyword(&'a str),
    /// Entity instance name (`#123`)
    EntityName(u32),
    Integer(i64),
    Real(f64),
    /// String body between the quotes, escapes not yet decoded
    String(&'a [u8]),
    /// Hex digits of a binary literal (`"0FF"` without the quotes)
    Binary(&'a str),
    /// Enumeration tag without the dots
    Enumeration(&'a str),
    Logical(Logical),
    /// `$`
    Omitted,
    /// `*`
    Derived,
    OpenParen,
    CloseParen,
    Comma,
    Equals,
    Semicolon,
}

/// A token and where it came from
#[derive(Clone, Debug, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// Streaming lexer over a window of the source
///
/// ```
/// use ifc_graph_parser::{Lexer, TokenKind};
///
/// let mut lexer = Lexer::with_base(b"#12=IFCWALL($);", 100);
/// let first = lexer.next_token().unwrap().unwrap();
/// assert_eq!(first.kind, TokenKind::EntityName(12));
/// assert_eq!(first.span.start, 100);
/// ```
pub struct Lexer<'a> {
    input: &'a [u8],
    base: Position,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Lex a buffer whose first byte sits at offset 0
    pub fn new(input: &'a [u8]) -> Self {
        Self::with_base(input, 0)
    }

    /// Lex a window whose first byte sits at absolute offset `base`
    pub fn with_base(input: &'a [u8], base: Position) -> Self {
        Lexer {
            input,
            base,
            pos: 0,
        }
    }

    /// Absolute offset of the next unread byte
    pub fn position(&self) -> Position {
        self.base + self.pos as u64
    }

    /// Move to an absolute offset inside the window
    pub fn seek(&mut self, position: Position) -> Result<(), LexError> {
        let end = self.base + self.input.len() as u64;
        if position < self.base || position > end {
            return Err(LexError::new(
                position,
                format!("seek outside of window {}..{}", self.base, end),
            ));
        }
        self.pos = (position - self.base) as usize;
        Ok(())
    }

    /// Bytes of the window covered by `span`
    pub fn slice(&self, span: Span) -> &'a [u8] {
        let start = (span.start - self.base) as usize;
        let end = (span.end - self.base) as usize;
        &self.input[start..end]
    }

    /// Next token, or `None` at the end of the window
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        self.skip_trivia()?;
        let Some(&first) = self.input.get(self.pos) else {
            return Ok(None);
        };
        let start = self.pos;
        let kind = match first {
            b'(' => self.punct(TokenKind::OpenParen),
            b')' => self.punct(TokenKind::CloseParen),
            b',' => self.punct(TokenKind::Comma),
            b'=' => self.punct(TokenKind::Equals),
            b';' => self.punct(TokenKind::Semicolon),
            b'$' => self.punct(TokenKind::Omitted),
            b'*' => self.punct(TokenKind::Derived),
            b'#' => self.entity_name()?,
            b'\'' => self.string()?,
            b'"' => self.binary()?,
            b'.' => self.enumeration()?,
            b'+' | b'-' | b'0'..=b'9' => self.number()?,
            b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'!' => self.keyword()?,
            other => {
                return Err(self.error_at(start, format!("unexpected character {:?}", other as char)))
            }
        };
        Ok(Some(Token {
            kind,
            span: Span::new(self.base + start as u64, self.position()),
        }))
    }

    /// Next token, failing at the end of the window
    pub fn expect_token(&mut self) -> Result<Token<'a>, LexError> {
        let at = self.position();
        self.next_token()?
            .ok_or_else(|| LexError::new(at, "unexpected end of input"))
    }

    /// Peek at the next token without consuming it
    pub fn peek_token(&mut self) -> Result<Option<Token<'a>>, LexError> {
        let saved = self.pos;
        let token = self.next_token();
        self.pos = saved;
        token
    }

    fn error_at(&self, index: usize, message: impl Into<String>) -> LexError {
        LexError::new(self.base + index as u64, message)
    }

    fn punct(&mut self, kind: TokenKind<'a>) -> TokenKind<'a> {
        self.pos += 1;
        kind
    }

    /// Whitespace and `/* ... */` comments
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            while self
                .input
                .get(self.pos)
                .is_some_and(|b| b.is_ascii_whitespace())
            {
                self.pos += 1;
            }
            if !self.input[self.pos..].starts_with(b"/*") {
                return Ok(());
            }
            let body = &self.input[self.pos + 2..];
            match memmem::find(body, b"*/") {
                Some(end) => self.pos += 2 + end + 2,
                None => return Err(self.error_at(self.pos, "unterminated comment")),
            }
        }
    }

    fn entity_name(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let digits = &self.input[start + 1..];
        let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
        if len == 0 {
            return Err(self.error_at(start, "expected digits after '#'"));
        }
        let id: u32 = lexical_core::parse(&digits[..len])
            .map_err(|_| self.error_at(start, "entity instance name out of range"))?;
        self.pos += 1 + len;
        Ok(TokenKind::EntityName(id))
    }

    fn string(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let mut i = start + 1;
        loop {
            let Some(quote) = memchr(b'\'', &self.input[i..]) else {
                return Err(self.error_at(start, "unterminated string"));
            };
            i += quote;
            // '' is an escaped quote inside the string
            if self.input.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            self.pos = i + 1;
            return Ok(TokenKind::String(&self.input[start + 1..i]));
        }
    }

    fn binary(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let body = &self.input[start + 1..];
        let Some(end) = memchr(b'"', body) else {
            return Err(self.error_at(start, "unterminated binary"));
        };
        let digits = &body[..end];
        // First digit counts the unused bits of the leading hex digit
        let valid = digits.first().is_some_and(|d| (b'0'..=b'3').contains(d))
            && digits.iter().all(u8::is_ascii_hexdigit);
        if !valid {
            return Err(self.error_at(start, "malformed binary literal"));
        }
        self.pos = start + 1 + end + 1;
        Ok(TokenKind::Binary(ascii(digits)))
    }

    fn enumeration(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let body = &self.input[start + 1..];
        let len = body
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if len == 0 || body.get(len) != Some(&b'.') {
            return Err(self.error_at(start, "malformed enumeration"));
        }
        self.pos = start + 1 + len + 1;
        let tag = ascii(&body[..len]);
        Ok(match tag {
            "T" => TokenKind::Logical(Logical::True),
            "F" => TokenKind::Logical(Logical::False),
            "U" => TokenKind::Logical(Logical::Unknown),
            _ => TokenKind::Enumeration(tag),
        })
    }

    fn number(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let (_, text) = number_text(&self.input[start..])
            .map_err(|_| self.error_at(start, "malformed number"))?;
        self.pos += text.len();
        let is_real = text.iter().any(|b| matches!(b, b'.' | b'e' | b'E'));
        let text = text.strip_prefix(b"+").unwrap_or(text);
        if is_real {
            lexical_core::parse::<f64>(text)
                .map(TokenKind::Real)
                .map_err(|_| self.error_at(start, "malformed real"))
        } else {
            lexical_core::parse::<i64>(text)
                .map(TokenKind::Integer)
                .map_err(|_| self.error_at(start, "integer out of range"))
        }
    }

    fn keyword(&mut self) -> Result<TokenKind<'a>, LexError> {
        let start = self.pos;
        let (_, text) = keyword_text(&self.input[start..])
            .map_err(|_| self.error_at(start, "malformed keyword"))?;
        self.pos += text.len();
        Ok(TokenKind::Keyword(ascii(text)))
    }
}

/// `[+-]digits[.digits][(E|e)[+-]digits]`
fn number_text(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize((
        opt(one_of("+-")),
        digit1,
        opt((char('.'), digit0)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

/// Keyword characters; `-` is allowed after the first character
fn keyword_text(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize((
        opt(char('!')),
        take_while1(|c: u8| c.is_ascii_alphabetic() || c == b'_'),
        opt(take_while1(|c: u8| {
            c.is_ascii_alphanumeric() || c == b'_' || c == b'-'
        })),
    ))
    .parse(input)
}

/// Token bodies checked above only contain ASCII
fn ascii(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes).unwrap_or_default()
}
