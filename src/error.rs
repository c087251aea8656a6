//! Error taxonomy for the coordinator
//!
//! Every user-visible failure maps to one of these kinds so that handlers
//! can decide uniformly: what to reply, whether to mutate state, whether to
//! retry. Chain-level errors are classified into `TransientChain` (bounded
//! retry allowed) or `OnchainRevert` (never retried).

use thiserror::Error;

/// Coordinator-wide error kinds.
#[derive(Debug, Error)]
pub enum CoordError {
    /// Bad user input: amount out of bounds, malformed address, wrong step.
    /// Reply with a short message; state unchanged.
    #[error("{0}")]
    Validation(String),

    /// A user pressed a button that belongs to the other role. Acknowledge
    /// the callback silently; state unchanged.
    #[error("unauthorized")]
    Unauthorized,

    /// No active escrow in this room, unknown contract, unknown room.
    #[error("{0}")]
    NotFound(String),

    /// Lost a race: role already taken, approval already recorded.
    #[error("{0}")]
    Conflict(String),

    /// No available room to lease.
    #[error("{0}")]
    ResourceExhausted(String),

    /// RPC timeout, connection failure, nonce race. Retry is allowed.
    #[error("{0}")]
    TransientChain(String),

    /// The contract reverted (owner mismatch, insufficient balance).
    /// Never retried; state stays put for human intervention.
    #[error("{0}")]
    OnchainRevert(String),

    /// Unexpected internal failure. Logged with context, generic reply.
    #[error("{0}")]
    Internal(String),
}

impl CoordError {
    /// Stable kind label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordError::Validation(_) => "validation",
            CoordError::Unauthorized => "unauthorized",
            CoordError::NotFound(_) => "not_found",
            CoordError::Conflict(_) => "conflict",
            CoordError::ResourceExhausted(_) => "resource_exhausted",
            CoordError::TransientChain(_) => "transient_chain",
            CoordError::OnchainRevert(_) => "onchain_revert",
            CoordError::Internal(_) => "internal",
        }
    }

    /// Short text suitable for an in-chat reply. Internal details never leak.
    pub fn user_message(&self) -> String {
        match self {
            CoordError::Validation(msg) => msg.clone(),
            CoordError::Unauthorized => String::new(),
            CoordError::NotFound(msg) => msg.clone(),
            CoordError::Conflict(msg) => msg.clone(),
            CoordError::ResourceExhausted(msg) => msg.clone(),
            CoordError::TransientChain(_) => {
                "Network issue talking to the chain, please retry in a moment.".to_string()
            }
            CoordError::OnchainRevert(_) => {
                "On-chain call failed — contact the admin.".to_string()
            }
            CoordError::Internal(_) => "Something went wrong, please try again.".to_string(),
        }
    }

    /// Whether a bounded retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordError::TransientChain(_))
    }
}

impl From<eyre::Report> for CoordError {
    fn from(e: eyre::Report) -> Self {
        CoordError::Internal(format!("{:#}", e))
    }
}

impl From<sqlx::Error> for CoordError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoordError::NotFound("record not found".to_string()),
            other => CoordError::Internal(format!("database error: {}", other)),
        }
    }
}

pub type CoordResult<T> = Result<T, CoordError>;

/// Classify a raw chain/RPC error string into the coordinator taxonomy.
///
/// Reverts and balance/owner failures are permanent; everything that smells
/// like the network is transient and may be retried with backoff.
pub fn classify_chain_error(error: &str) -> CoordError {
    let lower = error.to_lowercase();

    if lower.contains("reverted")
        || lower.contains("execution reverted")
        || lower.contains("insufficient funds")
        || lower.contains("insufficient balance")
        || lower.contains("out of gas")
        || lower.contains("caller is not the owner")
        || lower.contains("invalid signature")
    {
        return CoordError::OnchainRevert(error.to_string());
    }

    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("503")
        || lower.contains("502")
        || lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("already known")
        || lower.contains("replacement transaction underpriced")
        || lower.contains("temporarily unavailable")
    {
        return CoordError::TransientChain(error.to_string());
    }

    CoordError::Internal(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_revert_is_permanent() {
        let err = classify_chain_error("execution reverted: Ownable: caller is not the owner");
        assert!(matches!(err, CoordError::OnchainRevert(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_timeout_is_transient() {
        let err = classify_chain_error("request timeout after 30s");
        assert!(matches!(err, CoordError::TransientChain(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_nonce_race_is_transient() {
        assert!(classify_chain_error("nonce too low").is_transient());
        assert!(classify_chain_error("replacement transaction underpriced").is_transient());
    }

    #[test]
    fn test_classify_insufficient_balance_is_revert() {
        let err = classify_chain_error("insufficient balance for transfer");
        assert!(matches!(err, CoordError::OnchainRevert(_)));
    }

    #[test]
    fn test_classify_unknown_is_internal() {
        let err = classify_chain_error("some completely novel failure");
        assert!(matches!(err, CoordError::Internal(_)));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(CoordError::Unauthorized.kind(), "unauthorized");
        assert_eq!(
            CoordError::Validation("bad".to_string()).kind(),
            "validation"
        );
        assert_eq!(
            CoordError::ResourceExhausted("no rooms".to_string()).kind(),
            "resource_exhausted"
        );
    }

    #[test]
    fn test_revert_user_message_does_not_leak() {
        let err = CoordError::OnchainRevert("revert data 0xdeadbeef".to_string());
        assert!(!err.user_message().contains("0xdeadbeef"));
    }
}
