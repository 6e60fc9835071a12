//! Background monitoring of order age.
//!
//! The expiration sweeper moves orders that stayed in processing for too
//! long to Expired.

pub mod sweeper;

pub use sweeper::{ExpirationSweeper, SweepError, SweepReport};
