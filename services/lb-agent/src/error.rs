//! Error taxonomy for the rebalancing loop
//!
//! Insufficient gas is not an error: it is a planner outcome
//! (`RebalanceState::Blocked`).

/// Errors surfaced by the agent library
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// RPC timeout, dropped connection, gateway unavailable
    #[error("Transient network error: {0}")]
    Transient(String),

    /// A read or computed value broke a data-model invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The collaborator refused or reverted a transaction
    #[error("Transaction rejected at step {step}: {reason}")]
    Rejected { step: usize, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Transient errors are retried at the next scheduled cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::Transient(_))
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        AgentError::InvariantViolation(msg.into())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Transient(e.to_string())
    }
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
