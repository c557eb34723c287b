// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming statement splitter
//!
//! Splits a physical file into top-level `...;` statements without holding
//! more than one statement in memory. Semicolons inside strings and comments
//! do not end a statement.

use memchr::{memchr, memchr3};
use std::io::{self, BufRead};

/// One top-level statement
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    /// Absolute offset of `text[0]`
    pub offset: u64,
    /// Statement bytes including the terminating `;`, leading whitespace
    /// stripped
    pub text: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Code,
    /// Saw `/` in code, a `*` opens a comment
    Slash,
    Quoted,
    Comment,
    /// Saw `*` in a comment, a `/` closes it
    CommentStar,
}

/// Reads statements from any buffered reader
///
/// ```
/// use ifc_graph_parser::StatementReader;
///
/// let mut reader = StatementReader::new(&b"HEADER; #1=X('a;b');"[..]);
/// assert_eq!(reader.next_statement().unwrap().unwrap().text, b"HEADER;");
/// let second = reader.next_statement().unwrap().unwrap();
/// assert_eq!(second.offset, 8);
/// assert_eq!(second.text, b"#1=X('a;b');");
/// assert!(reader.next_statement().unwrap().is_none());
/// ```
pub struct StatementReader<R> {
    reader: R,
    offset: u64,
}

impl<R: BufRead> StatementReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_offset(reader, 0)
    }

    /// Reader whose first byte sits at absolute offset `offset`
    pub fn with_offset(reader: R, offset: u64) -> Self {
        StatementReader { reader, offset }
    }

    /// Absolute offset of the next unread byte
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Next statement, `None` once only whitespace and comments remain
    ///
    /// Trailing bytes without a terminating `;` are an `UnexpectedEof` error.
    pub fn next_statement(&mut self) -> io::Result<Option<Statement>> {
        let start = self.offset;
        let mut text = Vec::new();
        let mut state = ScanState::Code;

        loop {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return finish(start, text);
            }

            let mut end = None;
            let mut i = 0;
            while i < buf.len() {
                match state {
                    ScanState::Code => match memchr3(b';', b'\'', b'/', &buf[i..]) {
                        None => i = buf.len(),
                        Some(p) => {
                            i += p;
                            match buf[i] {
                                b';' => {
                                    end = Some(i + 1);
                                    break;
                                }
                                b'\'' => state = ScanState::Quoted,
                                _ => state = ScanState::Slash,
                            }
                            i += 1;
                        }
                    },
                    ScanState::Slash => {
                        if buf[i] == b'*' {
                            state = ScanState::Comment;
                            i += 1;
                        } else {
                            // Re-examine this byte as code
                            state = ScanState::Code;
                        }
                    }
                    // A doubled quote leaves and re-enters the string
                    ScanState::Quoted => match memchr(b'\'', &buf[i..]) {
                        None => i = buf.len(),
                        Some(p) => {
                            i += p + 1;
                            state = ScanState::Code;
                        }
                    },
                    ScanState::Comment => match memchr(b'*', &buf[i..]) {
                        None => i = buf.len(),
                        Some(p) => {
                            i += p + 1;
                            state = ScanState::CommentStar;
                        }
                    },
                    ScanState::CommentStar => {
                        state = match buf[i] {
                            b'/' => ScanState::Code,
                            b'*' => ScanState::CommentStar,
                            _ => ScanState::Comment,
                        };
                        i += 1;
                    }
                }
            }

            let consumed = end.unwrap_or(buf.len());
            text.extend_from_slice(&buf[..consumed]);
            self.reader.consume(consumed);
            self.offset += consumed as u64;

            if end.is_some() {
                return finish(start, text);
            }
        }
    }
}

impl<R: BufRead> Iterator for StatementReader<R> {
    type Item = io::Result<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_statement().transpose()
    }
}

/// Strip leading whitespace and comments, then classify what is left
fn finish(start: u64, mut text: Vec<u8>) -> io::Result<Option<Statement>> {
    let mut skip = 0;
    loop {
        while text.get(skip).is_some_and(|b| b.is_ascii_whitespace()) {
            skip += 1;
        }
        if !text[skip..].starts_with(b"/*") {
            break;
        }
        match memchr::memmem::find(&text[skip + 2..], b"*/") {
            Some(p) => skip += 2 + p + 2,
            None => {
                skip = text.len();
                break;
            }
        }
    }

    if skip == text.len() {
        return Ok(None);
    }
    if text.last() != Some(&b';') {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("unterminated statement at byte {}", start + skip as u64),
        ));
    }
    text.drain(..skip);
    Ok(Some(Statement {
        offset: start + skip as u64,
        text,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn texts(input: &[u8], capacity: usize) -> Vec<(u64, String)> {
        StatementReader::new(BufReader::with_capacity(capacity, input))
            .map(|s| {
                let s = s.unwrap();
                (s.offset, String::from_utf8(s.text).unwrap())
            })
            .collect()
    }

    const FILE: &[u8] = b"ISO-10303-21;\nHEADER;\n/* a; comment */\n#1=IFCLABEL('it''s; here');\n#2 = X(/* ; */#1);\nENDSEC;\n";

    #[test]
    fn test_splits_on_top_level_semicolons() {
        let statements = texts(FILE, 8192);
        let bodies: Vec<_> = statements.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(
            bodies,
            vec![
                "ISO-10303-21;",
                "HEADER;",
                "#1=IFCLABEL('it''s; here');",
                "#2 = X(/* ; */#1);",
                "ENDSEC;",
            ]
        );
        assert_eq!(statements[1].0, 14);
        let third = statements[2].0 as usize;
        assert_eq!(&FILE[third..third + 3], b"#1=");
    }

    #[test]
    fn test_tiny_buffers_give_same_result() {
        // Every state transition lands on a buffer boundary at some capacity
        let expected = texts(FILE, 8192);
        for capacity in 1..16 {
            assert_eq!(texts(FILE, capacity), expected, "capacity {capacity}");
        }
    }

    #[test]
    fn test_trailing_garbage_is_an_error() {
        let mut reader = StatementReader::new(&b"A; #1=X("[..]);
        assert!(reader.next_statement().unwrap().is_some());
        let err = reader.next_statement().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_trailing_comment_is_end_of_input() {
        let mut reader = StatementReader::with_offset(&b"A;\n/* done */\n"[..], 500);
        assert_eq!(reader.next_statement().unwrap().unwrap().offset, 500);
        assert!(reader.next_statement().unwrap().is_none());
        assert_eq!(reader.offset(), 514);
    }
}
