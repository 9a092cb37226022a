//! Transcript parsing
//!
//! One transcript file is a sequence of line-delimited records. This module
//! decodes each line into the finite set of recognized record shapes
//! ([`records`]) and folds them into the per-file index consumed by the
//! store ([`summary`]). The timeline builder reuses the same record types
//! and usage fold for its event-by-event pass.

pub mod records;
pub mod summary;

pub use records::{RawRecord, RecordKind};
pub use summary::{build_file_index, FileIndex, UsageFold};
