//! CLI argument models and validation utilities for the casewatch binary.
//!
//! Exposes the clap-backed flag set plus the checks that turn optional
//! flags into the identifiers the Discord bridge needs at startup.

pub mod cli_args;
pub mod validation;

pub use cli_args::Cli;
pub use validation::*;
