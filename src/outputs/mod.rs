//! Run artifacts written next to the log.
//!
//! - [`json`]: machine-readable copy of the final [`crate::models::RunSummary`]

pub mod json;
