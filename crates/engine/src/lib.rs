//! Stina's scheduling core: the request lifecycle state machine, the
//! intent-extraction stage, and the tool-calling orchestrator that turns
//! extracted intent into proposed times and booked events.
//!
//! The [`Scheduler`] facade is the intended entry point; the individual
//! modules are exposed for embedders that want to wire their own
//! pipeline.

pub mod extraction;
pub mod ingest;
pub mod lifecycle;
pub mod locks;
pub mod orchestrator;
pub mod scheduler;
pub mod slots;
pub mod tools;

pub use extraction::ExtractionStage;
pub use lifecycle::TransitionFields;
pub use locks::RequestLockMap;
pub use orchestrator::{OrchestrationOutcome, Orchestrator, TerminalDecision};
pub use scheduler::Scheduler;
pub use tools::ToolRegistry;
