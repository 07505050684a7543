//! Error types for ethertool

use thiserror::Error;

/// Main error type for the CLI and its collaborators
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transaction request: {0}")]
    InvalidRequest(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Chain connection error: {0}")]
    ChainConnection(String),

    #[error("Gas oracle error: {0}")]
    GasOracle(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Name resolution error: {0}")]
    Resolution(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },
}

impl ToolError {
    /// Errors caused by malformed user input, reported before any network
    /// interaction.
    pub fn is_input(&self) -> bool {
        matches!(
            self,
            ToolError::InvalidAddress(_)
                | ToolError::InvalidAmount(_)
                | ToolError::InvalidRequest(_)
                | ToolError::InvalidArgument(_)
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::ChainConnection(_) | ToolError::GasOracle(_) | ToolError::Timeout { .. }
        )
    }
}

/// Result type for tool operations
pub type ToolResult<T> = Result<T, ToolError>;
