//! Binary term codec
//!
//! Every encoding starts with a one-byte kind tag:
//!
//! | Tag | Kind | Body |
//! |-----|------|------|
//! | 1 | IRI | UTF-8 IRI |
//! | 2 | blank node | UTF-8 label |
//! | 3 | plain literal | UTF-8 value |
//! | 4 | language literal | `u32` LE value length, value, language tag |
//! | 5 | typed literal | `u32` LE value length, value, datatype IRI |
//!
//! Encoded bytes identify a term exactly but do not sort like terms do.

use super::term::Term;
use crate::error::{Result, TdbError};

const TAG_IRI: u8 = 1;
const TAG_BLANK: u8 = 2;
const TAG_PLAIN: u8 = 3;
const TAG_LANG: u8 = 4;
const TAG_TYPED: u8 = 5;

/// Encode a term
///
/// A language tag takes precedence over a datatype; terms carrying both are
/// rejected earlier by [`Term::validate`].
pub fn encode(term: &Term) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(term));
    encode_into(term, &mut out);
    out
}

/// Encode a term, appending to `out`
pub fn encode_into(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::Iri(iri) => {
            out.push(TAG_IRI);
            out.extend_from_slice(iri.as_bytes());
        }
        Term::BlankNode(id) => {
            out.push(TAG_BLANK);
            out.extend_from_slice(id.as_bytes());
        }
        Term::Literal {
            value,
            language: Some(lang),
            ..
        } => tagged(out, TAG_LANG, value, lang),
        Term::Literal {
            value,
            datatype: Some(dt),
            language: None,
        } => tagged(out, TAG_TYPED, value, dt),
        Term::Literal { value, .. } => {
            out.push(TAG_PLAIN);
            out.extend_from_slice(value.as_bytes());
        }
    }
}

fn tagged(out: &mut Vec<u8>, tag: u8, value: &str, suffix: &str) {
    out.push(tag);
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(suffix.as_bytes());
}

/// Size of the encoding of `term`
pub fn encoded_len(term: &Term) -> usize {
    match term {
        Term::Iri(s) | Term::BlankNode(s) => 1 + s.len(),
        Term::Literal {
            value,
            language: Some(extra),
            ..
        }
        | Term::Literal {
            value,
            datatype: Some(extra),
            ..
        } => 1 + 4 + value.len() + extra.len(),
        Term::Literal { value, .. } => 1 + value.len(),
    }
}

/// Decode a term
pub fn decode(bytes: &[u8]) -> Result<Term> {
    let (&tag, body) = bytes
        .split_first()
        .ok_or_else(|| TdbError::Encoding("empty term encoding".to_string()))?;

    match tag {
        TAG_IRI => Ok(Term::Iri(utf8(body, "IRI")?)),
        TAG_BLANK => Ok(Term::BlankNode(utf8(body, "blank node label")?)),
        TAG_PLAIN => Ok(Term::literal(utf8(body, "literal value")?)),
        TAG_LANG => {
            let (value, lang) = split_tagged(body)?;
            Ok(Term::lang_literal(value, utf8(lang, "language tag")?))
        }
        TAG_TYPED => {
            let (value, dt) = split_tagged(body)?;
            Ok(Term::typed_literal(value, utf8(dt, "datatype IRI")?))
        }
        other => Err(TdbError::Encoding(format!("unknown term tag {other}"))),
    }
}

fn split_tagged(body: &[u8]) -> Result<(String, &[u8])> {
    if body.len() < 4 {
        return Err(TdbError::Encoding(format!(
            "truncated literal length prefix ({} bytes)",
            body.len()
        )));
    }
    let (len_bytes, rest) = body.split_at(4);
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if len > rest.len() {
        return Err(TdbError::Encoding(format!(
            "literal length {len} exceeds remaining {} bytes",
            rest.len()
        )));
    }
    let (value, suffix) = rest.split_at(len);
    Ok((utf8(value, "literal value")?, suffix))
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| TdbError::Encoding(format!("invalid UTF-8 in {what}: {e}")))
}
