//! Common types module for the order flow system.
//!
//! This module defines the domain records, the event schema exchanged over the
//! event channel, storage namespaces and configuration validation helpers
//! shared by every crate in the workspace.

/// Request and response bodies for the HTTP query surface.
pub mod api;
/// Event types exchanged over the event channel.
pub mod events;
/// Order, order item, product and notification records.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage namespaces.
pub mod storage;
/// Formatting helpers.
pub mod utils;
/// Configuration validation types for pluggable implementations.
pub mod validation;

pub use api::*;
pub use events::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::truncate_id;
pub use validation::*;
