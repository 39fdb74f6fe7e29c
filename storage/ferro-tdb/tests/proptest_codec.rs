//! Property-based tests for the term codec, the node table and the N-Triples reader

use ferro_tdb::dictionary::codec;
use ferro_tdb::{NTriplesParser, NodeTable, Term};
use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;

/// Generate IRIs from unreserved characters
fn iri_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9._~-]{1,24}")
        .unwrap()
        .prop_map(|s| format!("http://example.org/{}", s))
}

/// Literal values including characters that need escaping
fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[ -~\\t\\n\\r\\x01\u{e9}\u{4e2d}\u{1f600}]{0,32}").unwrap()
}

fn blank_label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z_][a-zA-Z0-9_-]{0,12}").unwrap()
}

fn language_tag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{2}(-[A-Z]{2})?").unwrap()
}

fn term_strategy() -> impl Strategy<Value = Term> {
    prop_oneof![
        iri_strategy().prop_map(Term::iri),
        blank_label_strategy().prop_map(Term::blank_node),
        value_strategy().prop_map(Term::literal),
        (value_strategy(), language_tag_strategy()).prop_map(|(v, l)| Term::lang_literal(v, l)),
        (value_strategy(), iri_strategy()).prop_map(|(v, d)| Term::typed_literal(v, d)),
    ]
}

fn subject_strategy() -> impl Strategy<Value = Term> {
    prop_oneof![
        iri_strategy().prop_map(Term::iri),
        blank_label_strategy().prop_map(Term::blank_node),
    ]
}

proptest! {
    #[test]
    fn test_codec_roundtrip(term in term_strategy()) {
        let bytes = codec::encode(&term);
        prop_assert_eq!(bytes.len(), codec::encoded_len(&term));
        prop_assert_eq!(codec::decode(&bytes).unwrap(), term);
    }

    #[test]
    fn test_codec_rejects_truncation(term in term_strategy(), cut in 0usize..8) {
        let bytes = codec::encode(&term);
        // a cut inside the length prefix of a tagged literal cannot decode
        if let Term::Literal { language: Some(_), .. } | Term::Literal { datatype: Some(_), .. } = &term {
            let keep = 1 + cut.min(3);
            prop_assert!(codec::decode(&bytes[..keep]).is_err());
        }
        prop_assert!(codec::decode(&[]).is_err());
    }

    #[test]
    fn test_dictionary_ids_stable_and_distinct(terms in prop::collection::vec(term_strategy(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let table = NodeTable::open(dir.path(), 8, false).unwrap();

        let mut seen = HashMap::new();
        for term in &terms {
            let id = table.id_for(term).unwrap();
            prop_assert!(!id.is_null());
            if let Some(previous) = seen.insert(term.clone(), id) {
                prop_assert_eq!(previous, id);
            }
        }
        let distinct_ids: std::collections::HashSet<_> = seen.values().collect();
        prop_assert_eq!(distinct_ids.len(), seen.len());
        prop_assert_eq!(table.len(), seen.len() as u64);

        for (term, id) in &seen {
            prop_assert_eq!(&table.term_for(*id).unwrap(), term);
            prop_assert_eq!(table.id_for(term).unwrap(), *id);
        }
    }

    #[test]
    fn test_ntriples_reads_displayed_terms(
        subject in subject_strategy(),
        predicate in iri_strategy(),
        object in term_strategy()
    ) {
        let predicate = Term::iri(predicate);
        let line = format!("{} {} {} .", subject, predicate, object);
        let parsed = NTriplesParser::new("prop").parse_line(&line, 1).unwrap();
        prop_assert_eq!(parsed, Some((subject, predicate, object)));
    }
}
