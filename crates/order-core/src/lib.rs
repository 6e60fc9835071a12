//! Core orchestration of the order lifecycle.
//!
//! Orders are created synchronously by [`OrderService`], which reserves stock
//! and commits the order in one unit of work before publishing
//! `OrderCreated`. Everything after that happens in background tasks driven by
//! the event channel: the [`ProcessingHandler`] completes orders, the
//! [`ExpirationSweeper`] expires orders stuck in processing, and the
//! [`NotificationRecorder`] writes one audit record per terminal order.
//! [`OrderEngineBuilder`] wires these together from a configuration.

pub mod builder;
pub mod engine;
pub mod handlers;
pub mod monitoring;
pub mod outcome;
pub mod publish;
pub mod recovery;
pub mod service;
pub mod state;

pub use builder::{BuilderError, EngineFactories, OrderEngineBuilder};
pub use engine::{EngineError, OrderEngine};
pub use handlers::{NotificationRecorder, ProcessingHandler};
pub use monitoring::{ExpirationSweeper, SweepReport};
pub use outcome::{FixedOutcome, OutcomeSource, RandomOutcome, ScriptedOutcome};
pub use publish::{PostCommitPublisher, PublishReceipt};
pub use recovery::{RecoveryReport, RecoveryService};
pub use service::{CreateOrderError, CreatedOrder, OrderLine, OrderService};
