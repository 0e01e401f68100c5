//! Persistent case records for the moderation bot.
//!
//! Holds the case record model, the flat-file record store, the scanned-thread
//! cache with report bookkeeping, and the read-only queries (search, statistics,
//! near-duplicate names) that the slash commands and the forum scanner use.

pub mod case_record;
pub mod queries;
pub mod record_store;
pub mod scan_state;
pub mod similarity;

pub use case_record::{CaseRecord, CaseType, ThreadEntry};
pub use queries::{
    case_statistics, search_records, CaseStatistics, StatsPeriod, SEARCH_RESULT_LIMIT,
    TOP_TAG_LIMIT,
};
pub use record_store::{CaseRecordStore, FilingOutcome, SharedCaseRecordStore, ThreadFiling};
pub use scan_state::{ReportMessages, ScanStateStore};
pub use similarity::{
    levenshtein_distance, near_duplicate_pairs, similarity, NearDuplicatePair,
    NEAR_DUPLICATE_THRESHOLD,
};
