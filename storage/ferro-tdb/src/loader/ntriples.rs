//! Streaming N-Triples reader
//!
//! One triple per line; blank lines and `#` comments are skipped. Any
//! malformed line fails with [`TdbError::LoadAborted`] carrying the source
//! name and 1-based line number.

use crate::dictionary::Term;
use crate::error::{Result, TdbError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A triple of terms as read from input
pub type RawTriple = (Term, Term, Term);

/// N-Triples line parser
#[derive(Debug, Clone)]
pub struct NTriplesParser {
    source_name: String,
}

impl NTriplesParser {
    /// Create a parser whose errors name `source_name`
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
        }
    }

    /// Name reported in errors
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Parse a single N-Triples line
    ///
    /// Returns `None` for blank and comment lines.
    pub fn parse_line(&self, line: &str, line_number: u64) -> Result<Option<RawTriple>> {
        let mut cursor = Cursor::new(line);
        cursor.skip_ws();
        if cursor.at_end() || cursor.peek() == Some('#') {
            return Ok(None);
        }

        let triple = self
            .parse_triple(&mut cursor)
            .map_err(|reason| self.error(line_number, reason))?;

        for term in [&triple.0, &triple.1, &triple.2] {
            term.validate()
                .map_err(|e| self.error(line_number, e.to_string()))?;
        }
        Ok(Some(triple))
    }

    /// Parse one term written in N-Triples syntax, such as `<http://a>`,
    /// `_:b0` or `"chat"@fr`
    pub fn parse_term(text: &str) -> Result<Term> {
        let mut cursor = Cursor::new(text.trim());
        let term = match cursor.peek() {
            Some('<') => cursor.iri().map(Term::iri),
            Some('_') => cursor.blank_label().map(Term::blank_node),
            Some('"') => cursor.literal(),
            other => Err(format!("expected a term, found {}", show(other))),
        }
        .and_then(|term| match cursor.peek() {
            None => Ok(term),
            Some(c) => Err(format!("unexpected '{c}' after term")),
        })
        .map_err(|reason| TdbError::InvalidInput(format!("invalid term '{text}': {reason}")))?;
        term.validate()?;
        Ok(term)
    }

    /// Streaming iterator over the triples of `reader`
    pub fn for_reader<R: BufRead>(self, reader: R) -> NTriplesIterator<R> {
        NTriplesIterator {
            parser: self,
            lines: reader.lines(),
            line_number: 0,
            done: false,
        }
    }

    fn parse_triple(&self, cursor: &mut Cursor<'_>) -> std::result::Result<RawTriple, String> {
        let subject = match cursor.peek() {
            Some('<') => Term::iri(cursor.iri()?),
            Some('_') => Term::blank_node(cursor.blank_label()?),
            other => return Err(format!("expected subject IRI or blank node, found {}", show(other))),
        };
        cursor.require_ws()?;

        let predicate = match cursor.peek() {
            Some('<') => Term::iri(cursor.iri()?),
            other => return Err(format!("expected predicate IRI, found {}", show(other))),
        };
        cursor.require_ws()?;

        let object = match cursor.peek() {
            Some('<') => Term::iri(cursor.iri()?),
            Some('_') => Term::blank_node(cursor.blank_label()?),
            Some('"') => cursor.literal()?,
            other => return Err(format!("expected object term, found {}", show(other))),
        };

        cursor.skip_ws();
        if !cursor.eat('.') {
            return Err(format!("expected '.', found {}", show(cursor.peek())));
        }
        cursor.skip_ws();
        match cursor.peek() {
            None | Some('#') => Ok((subject, predicate, object)),
            Some(c) => Err(format!("unexpected '{c}' after '.'")),
        }
    }

    fn error(&self, line: u64, reason: String) -> TdbError {
        TdbError::LoadAborted {
            source_name: self.source_name.clone(),
            line: Some(line),
            reason,
        }
    }
}

/// Open an N-Triples file for streaming
pub fn read_file<P: AsRef<Path>>(path: P) -> Result<NTriplesIterator<BufReader<File>>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    Ok(NTriplesParser::new(path.display().to_string()).for_reader(BufReader::new(file)))
}

/// Iterator for streaming N-Triples parsing
///
/// Stops after the first error.
pub struct NTriplesIterator<R> {
    parser: NTriplesParser,
    lines: std::io::Lines<R>,
    line_number: u64,
    done: bool,
}

impl<R> NTriplesIterator<R> {
    /// Lines consumed so far
    pub fn line_number(&self) -> u64 {
        self.line_number
    }
}

impl<R: BufRead> Iterator for NTriplesIterator<R> {
    type Item = Result<RawTriple>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let line = match self.lines.next() {
                None => break,
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            };
            self.line_number += 1;

            match self.parser.parse_line(&line, self.line_number) {
                Ok(Some(triple)) => return Some(Ok(triple)),
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.done = true;
        None
    }
}

fn show(c: Option<char>) -> String {
    match c {
        Some(c) => format!("'{c}'"),
        None => "end of line".to_string(),
    }
}

/// Character cursor over one line
struct Cursor<'a> {
    rest: &'a str,
}

type ParseResult<T> = std::result::Result<T, String>;

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.rest = &self.rest[c.len_utf8()..];
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start_matches(&[' ', '\t', '\r'][..]);
    }

    fn require_ws(&mut self) -> ParseResult<()> {
        if !matches!(self.peek(), Some(' ' | '\t')) {
            return Err(format!("expected whitespace, found {}", show(self.peek())));
        }
        self.skip_ws();
        Ok(())
    }

    /// `<...>`, returning the unescaped IRI
    fn iri(&mut self) -> ParseResult<String> {
        if !self.eat('<') {
            return Err(format!("expected '<', found {}", show(self.peek())));
        }
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('>') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('u') => out.push(self.hex_char(4)?),
                    Some('U') => out.push(self.hex_char(8)?),
                    other => return Err(format!("invalid IRI escape \\{}", other.unwrap_or(' '))),
                },
                Some(c @ (' ' | '\t' | '<' | '"' | '{' | '}' | '|' | '^' | '`')) => {
                    return Err(format!("character '{c}' not allowed in IRI"));
                }
                Some(c) => out.push(c),
                None => return Err("unterminated IRI".to_string()),
            }
        }
    }

    /// `_:label`, returning the label
    fn blank_label(&mut self) -> ParseResult<String> {
        if !self.rest.starts_with("_:") {
            return Err("expected '_:'".to_string());
        }
        self.rest = &self.rest[2..];

        let len = self
            .rest
            .char_indices()
            .find(|&(_, c)| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .map_or(self.rest.len(), |(i, _)| i);
        // a trailing '.' terminates the statement rather than the label
        let label = self.rest[..len].trim_end_matches('.');
        if label.is_empty() {
            return Err("empty blank node label".to_string());
        }
        self.rest = &self.rest[label.len()..];
        Ok(label.to_string())
    }

    /// `"..."` with an optional `@lang` or `^^<datatype>`
    fn literal(&mut self) -> ParseResult<Term> {
        if !self.eat('"') {
            return Err(format!("expected '\"', found {}", show(self.peek())));
        }
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    let c = match self.bump() {
                        Some('t') => '\t',
                        Some('b') => '\u{8}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('f') => '\u{c}',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('\\') => '\\',
                        Some('u') => self.hex_char(4)?,
                        Some('U') => self.hex_char(8)?,
                        Some(other) => return Err(format!("invalid escape \\{other}")),
                        None => return Err("unterminated string literal".to_string()),
                    };
                    value.push(c);
                }
                Some(c) => value.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }

        if self.eat('@') {
            let len = self
                .rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                .unwrap_or(self.rest.len());
            let lang = &self.rest[..len];
            if lang.is_empty() || !lang.starts_with(|c: char| c.is_ascii_alphabetic()) {
                return Err(format!("invalid language tag '{lang}'"));
            }
            self.rest = &self.rest[len..];
            Ok(Term::lang_literal(value, lang))
        } else if self.rest.starts_with("^^") {
            self.rest = &self.rest[2..];
            let datatype = self.iri()?;
            Ok(Term::typed_literal(value, datatype))
        } else {
            Ok(Term::literal(value))
        }
    }

    fn hex_char(&mut self, digits: usize) -> ParseResult<char> {
        let hex = self
            .rest
            .get(..digits)
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| format!("expected {digits} hex digits in escape"))?;
        self.rest = &self.rest[digits..];
        let code = u32::from_str_radix(hex, 16).map_err(|e| e.to_string())?;
        char::from_u32(code).ok_or_else(|| format!("invalid code point U+{code:X}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Option<RawTriple>> {
        NTriplesParser::new("test.nt").parse_line(line, 1)
    }

    fn object(line: &str) -> Term {
        parse(line).unwrap().unwrap().2
    }

    #[test]
    fn test_parse_simple_triple() {
        let (s, p, o) = parse("<http://example.org/s> <http://example.org/p> <http://example.org/o> .")
            .unwrap()
            .unwrap();
        assert_eq!(s, Term::iri("http://example.org/s"));
        assert_eq!(p, Term::iri("http://example.org/p"));
        assert_eq!(o, Term::iri("http://example.org/o"));
    }

    #[test]
    fn test_skips_blank_and_comment_lines() {
        assert!(parse("").unwrap().is_none());
        assert!(parse("   \t").unwrap().is_none());
        assert!(parse("# a comment").unwrap().is_none());
    }

    #[test]
    fn test_blank_nodes() {
        let (s, _, o) = parse("_:b1 <http://p> _:x.y.").unwrap().unwrap();
        assert_eq!(s, Term::blank_node("b1"));
        assert_eq!(o, Term::blank_node("x.y"));
    }

    #[test]
    fn test_literal_forms() {
        assert_eq!(object("<s> <p> \"plain\" ."), Term::literal("plain"));
        assert_eq!(
            object("<s> <p> \"chat\"@fr-CA ."),
            Term::lang_literal("chat", "fr-CA")
        );
        assert_eq!(
            object("<s> <p> \"42\"^^<http://www.w3.org/2001/XMLSchema#integer> ."),
            Term::typed_literal("42", "http://www.w3.org/2001/XMLSchema#integer")
        );
        assert_eq!(object("<s> <p> \"\" ."), Term::literal(""));
        assert_eq!(object("<s> <p> \"a b . c\" . # trailing"), Term::literal("a b . c"));
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            object(r#"<s> <p> "t\tb\bn\nr\rf\fq\"a\'s\\" ."#),
            Term::literal("t\tb\u{8}n\nr\rf\u{c}q\"a's\\")
        );
        assert_eq!(object(r#"<s> <p> "\u00E9\U0001F600" ."#), Term::literal("é😀"));
        assert_eq!(
            parse(r"<http://ex/\u00E9> <p> <o> .").unwrap().unwrap().0,
            Term::iri("http://ex/é")
        );
    }

    #[test]
    fn test_malformed_lines() {
        let bad = [
            "<s> <p> <o>",
            "<s> <p> <o> . extra",
            "<s> \"lit\" <o> .",
            "\"lit\" <p> <o> .",
            "<s> <p> \"unterminated .",
            "<s> <p> \"bad \\q escape\" .",
            "<s> <p> \"x\"@ .",
            "<s <p> <o> .",
            "<> <p> <o> .",
            "<s><p> <o> .",
            "<s> <p> \"\\u12\" .",
        ];
        for line in bad {
            let err = parse(line).unwrap_err();
            assert!(
                matches!(err, TdbError::LoadAborted { line: Some(1), .. }),
                "{line}: {err}"
            );
        }
    }

    #[test]
    fn test_parse_single_term() {
        assert_eq!(
            NTriplesParser::parse_term(" <http://a.org/x> ").unwrap(),
            Term::iri("http://a.org/x")
        );
        assert_eq!(
            NTriplesParser::parse_term("\"chat\"@fr").unwrap(),
            Term::lang_literal("chat", "fr")
        );
        assert_eq!(
            NTriplesParser::parse_term("_:b1").unwrap(),
            Term::blank_node("b1")
        );
        assert!(NTriplesParser::parse_term("plain").is_err());
        assert!(NTriplesParser::parse_term("<http://a> <http://b>").is_err());
    }

    #[test]
    fn test_iterator_reports_line_number() {
        let input = "# header\n<a> <b> <c> .\n\n<a> <b> \"ok\" .\n<a> <b> oops .\n<a> <b> <d> .\n";
        let mut iter = NTriplesParser::new("data.nt").for_reader(input.as_bytes());
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_ok());
        match iter.next().unwrap().unwrap_err() {
            TdbError::LoadAborted {
                source_name, line, ..
            } => {
                assert_eq!(source_name, "data.nt");
                assert_eq!(line, Some(5));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(iter.next().is_none());
    }
}
