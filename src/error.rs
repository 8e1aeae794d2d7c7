use thiserror::Error;

/// Failure kinds surfaced by the sell flow and the swap pipeline.
///
/// Every variant is caught at the flow-step boundary and rendered through
/// [`SellError::user_message`]; none of them is allowed to take the process down.
#[derive(Debug, Error)]
pub enum SellError {
    #[error("no wallet found for user {0}")]
    UserNotFound(String),

    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("user store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),

    #[error("execution rejected: {0}")]
    ExecutionRejected(String),

    #[error("transaction {signature} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { signature: String, timeout_secs: u64 },

    #[error("wallet key decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid swap transaction: {0}")]
    InvalidTransaction(String),

    #[error("a swap is already in progress for user {0}")]
    SellInProgress(String),
}

pub type Result<T> = std::result::Result<T, SellError>;

impl SellError {
    pub fn user_message(&self) -> String {
        match self {
            SellError::UserNotFound(_) => {
                "No wallet found. Generate or import a wallet first.".to_string()
            }
            SellError::RemoteUnavailable(detail) => {
                format!("Could not reach the trading service ({detail}). Please try again.")
            }
            SellError::StoreUnavailable(_) => {
                "Could not load your wallet record. Please try again later.".to_string()
            }
            SellError::InvalidAmount(detail) => format!("Invalid amount: {detail}"),
            SellError::QuoteUnavailable(detail) => {
                format!("No quote available for this swap: {detail}")
            }
            SellError::ExecutionRejected(detail) => format!("Swap was rejected: {detail}"),
            SellError::ConfirmationTimeout {
                signature,
                timeout_secs,
            } => format!(
                "Swap was submitted but not confirmed within {timeout_secs}s. \
                 It may still land; check the signature before retrying.\n\
                 Signature: {signature}"
            ),
            SellError::DecryptionFailed(_) => "Failed to decrypt your wallet key. \
                 The server encryption key no longer matches; re-import or reset your \
                 wallet. Retrying will not help."
                .to_string(),
            SellError::InvalidTransaction(detail) => {
                format!("The swap transaction could not be signed: {detail}")
            }
            SellError::SellInProgress(_) => {
                "Another swap is still in progress. Wait for it to finish.".to_string()
            }
        }
    }

    /// True when the swap may have landed on-chain even though we report an error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SellError::ConfirmationTimeout { .. })
    }
}
