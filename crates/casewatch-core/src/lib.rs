//! Foundational low-level utilities shared across casewatch crates.
//!
//! Provides the atomic JSON/text persistence helpers used by the record store,
//! the scan state and the bridge state, plus wall-clock helpers.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{read_json_file, write_json_atomic, write_text_atomic};
pub use time_utils::{current_unix_timestamp_ms, utc_now};
