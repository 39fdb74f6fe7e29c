//! Bulk ingestion
//!
//! - [`ntriples`]: streaming N-Triples reader
//! - [`external_sort`]: sorted run files and k-way merge
//! - [`bulk`]: the loader driving both into bottom-up index builds

pub mod bulk;
pub mod external_sort;
pub mod ntriples;

pub use bulk::{BulkLoader, LoadStats, BULK_PENDING_FILE};
pub use external_sort::{KWayMerge, RunSet};
pub use ntriples::{read_file, NTriplesIterator, NTriplesParser, RawTriple};
