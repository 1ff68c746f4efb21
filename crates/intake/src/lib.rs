//! Webhook ingestion for the Remedy fix pipeline.
//!
//! One endpoint per CI provider, each with provider-specific signature
//! verification and payload normalization, an idempotent event store in
//! front of the dispatcher, and the worker pool that drives governed
//! pipeline runs.

pub mod config;
pub mod dispatch;
pub mod normalize;
pub mod server;
pub mod sources;
pub mod verify;

pub use config::Settings;
pub use dispatch::Dispatcher;
pub use server::{build_router, ServerState};
pub use verify::{VerifyError, WebhookSecrets};
