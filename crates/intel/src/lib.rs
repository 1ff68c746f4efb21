//! Failure intelligence for the Remedy fix pipeline.
//!
//! - [`log_parser`]: multi-language extraction of errors, stack traces,
//!   test failures, and build errors from CI logs
//! - [`classifier`]: rule-based failure categorization
//! - [`rca`]: root-cause hypothesis synthesis
//! - [`incidents`]: in-memory incident similarity store

pub mod classifier;
pub mod incidents;
pub mod log_parser;
pub mod rca;

pub use classifier::FailureClassifier;
pub use incidents::{IncidentRecord, IncidentStore};
pub use log_parser::{LogParser, ParsedLogResult};
pub use rca::RcaEngine;
