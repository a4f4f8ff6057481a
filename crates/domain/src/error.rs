use crate::request::RequestStatus;

/// Shared error type used across all Stina crates.
///
/// The scheduling-specific variants (`Validation`, `InvalidTransition`,
/// `Extraction`, `ToolExecution`, `PlanningExhausted`, `Orchestration`)
/// carry enough context to be fed back into a planning round or shown to
/// an operator; the infrastructure variants wrap I/O and provider faults.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("validation failed on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("planning exhausted after {rounds} tool rounds without a terminal decision")]
    PlanningExhausted { rounds: u32 },

    #[error("orchestration failed: {0}")]
    Orchestration(String),

    #[error("concurrent update on request {id}: expected status {expected}, found {found}")]
    Conflict {
        id: String,
        expected: RequestStatus,
        found: RequestStatus,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request {0} is busy: an orchestration is already in flight")]
    Busy(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Convenience constructor for input-validation failures.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for tool-level failures.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True for failures a planning round can adapt to (fed back into the
    /// transcript as a failed tool result rather than aborting the round).
    pub fn is_recoverable_in_round(&self) -> bool {
        matches!(
            self,
            Self::ToolExecution { .. }
                | Self::Validation { .. }
                | Self::Timeout(_)
                | Self::Http(_)
                | Self::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
