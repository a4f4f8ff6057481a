//! Persistence seam for meeting requests.
//!
//! The engine talks to a [`RequestRepository`] only; the in-memory
//! implementation here backs tests and embedders without a document
//! store.  Production deployments implement the trait over their own
//! backend — the contract requires single-document atomic updates with
//! an optional compare-and-set on the prior status.

mod memory;
mod repository;

pub use memory::InMemoryRequestStore;
pub use repository::{RequestFilters, RequestRepository};
