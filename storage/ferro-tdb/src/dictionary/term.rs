//! RDF term representation

use crate::error::{Result, TdbError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Write as _};

/// RDF term
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// IRI reference
    Iri(String),
    /// Literal value with optional datatype or language tag
    Literal {
        /// Lexical form
        value: String,
        /// Datatype IRI (absent for plain and language-tagged literals)
        datatype: Option<String>,
        /// Language tag (absent for plain and typed literals)
        language: Option<String>,
    },
    /// Blank node with its label
    BlankNode(String),
}

impl Term {
    /// Create a new IRI term
    pub fn iri<S: Into<String>>(iri: S) -> Self {
        Term::Iri(iri.into())
    }

    /// Create a new plain literal
    pub fn literal<S: Into<String>>(value: S) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    /// Create a new typed literal
    pub fn typed_literal<S: Into<String>, T: Into<String>>(value: S, datatype: T) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    /// Create a new language-tagged literal
    pub fn lang_literal<S: Into<String>, L: Into<String>>(value: S, language: L) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    /// Create a new blank node
    pub fn blank_node<S: Into<String>>(id: S) -> Self {
        Term::BlankNode(id.into())
    }

    /// Get the term kind as a string
    pub fn term_type(&self) -> &'static str {
        match self {
            Term::Iri(_) => "iri",
            Term::Literal { .. } => "literal",
            Term::BlankNode(_) => "blank_node",
        }
    }

    /// Check if the term is an IRI
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// Check if the term is a literal
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Check if the term is a blank node
    pub fn is_blank_node(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    /// Lexical value, IRI or blank node label
    pub fn as_str(&self) -> &str {
        match self {
            Term::Iri(iri) => iri,
            Term::Literal { value, .. } => value,
            Term::BlankNode(id) => id,
        }
    }

    /// Reject terms that cannot be stored
    ///
    /// A literal carries a language tag or a datatype, never both; IRIs,
    /// blank node labels and language tags are non-empty.
    pub fn validate(&self) -> Result<()> {
        match self {
            Term::Iri(iri) if iri.is_empty() => {
                Err(TdbError::InvalidInput("empty IRI".to_string()))
            }
            Term::BlankNode(id) if id.is_empty() => {
                Err(TdbError::InvalidInput("empty blank node label".to_string()))
            }
            Term::Literal {
                datatype: Some(_),
                language: Some(_),
                ..
            } => Err(TdbError::InvalidInput(format!(
                "literal {self} has both a datatype and a language tag"
            ))),
            Term::Literal {
                language: Some(lang),
                ..
            } if lang.is_empty() => Err(TdbError::InvalidInput("empty language tag".to_string())),
            _ => Ok(()),
        }
    }
}

/// Escape a string for the N-Triples lexical forms
pub(crate) fn escape_into(out: &mut impl fmt::Write, s: &str) -> fmt::Result {
    for ch in s.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(out, "\\u{:04X}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::Literal {
                value,
                datatype,
                language,
            } => {
                f.write_char('"')?;
                escape_into(f, value)?;
                f.write_char('"')?;
                if let Some(lang) = language {
                    write!(f, "@{}", lang)?;
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{}>", dt)?;
                }
                Ok(())
            }
            Term::BlankNode(id) => write!(f, "_:{}", id),
        }
    }
}
