//! Formatting helpers used in log fields.

pub mod formatting;

pub use formatting::truncate_id;
