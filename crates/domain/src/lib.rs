//! Shared domain types for the Stina scheduling core: the meeting
//! request aggregate, extraction intent contract, provider-agnostic LLM
//! message types, configuration, and the error taxonomy.

pub mod config;
pub mod error;
pub mod intent;
pub mod request;
pub mod tool;

pub use error::{Error, Result};
