use multisend_core::error::EngineError;

/// Domain classification of a failed send, mapped from the RPC error
/// payload message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    /// The account cannot cover value + fees. Terminal for the row.
    InsufficientFunds,
    /// The nonce was consumed or is otherwise unusable; a fresh one is
    /// needed.
    NonceConflict,
    /// The network rejected the price; the same nonce can be retried at a
    /// higher uplift.
    FeeTooLow,
    /// Anything else, including transport failures.
    Other,
}

/// What the retry loop should do with the nonce after a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStrategy {
    /// Drop the claim so the nonce can be reused by a later attempt.
    pub release_nonce: bool,
    /// Reserve a fresh nonce before the next attempt.
    pub reacquire_nonce: bool,
    /// Whether another attempt is worth making at all.
    pub retryable: bool,
}

impl SendErrorKind {
    pub fn classify(error: &EngineError) -> Self {
        let Some(resp) = error.rpc_error_response() else {
            return SendErrorKind::Other;
        };

        let message = resp.message.to_lowercase();

        // Nonce conflicts first: "replacement transaction underpriced"
        // would otherwise match the fee-too-low "transaction underpriced"
        // phrase.
        if message.contains("nonce too low")
            || message.contains("nonce has already been used")
            || message.contains("already known")
            || (message.contains("replacement") && message.contains("underpriced"))
        {
            SendErrorKind::NonceConflict
        } else if message.contains("insufficient funds") {
            SendErrorKind::InsufficientFunds
        } else if message.contains("gas price too low")
            || message.contains("transaction underpriced")
            || message.contains("max fee per gas less than block base fee")
            || message.contains("fee cap less than block base fee")
        {
            SendErrorKind::FeeTooLow
        } else {
            SendErrorKind::Other
        }
    }

    pub fn strategy(self) -> RecoveryStrategy {
        match self {
            SendErrorKind::InsufficientFunds => RecoveryStrategy {
                release_nonce: true,
                reacquire_nonce: false,
                retryable: false,
            },
            SendErrorKind::NonceConflict => RecoveryStrategy {
                release_nonce: true,
                reacquire_nonce: true,
                retryable: true,
            },
            SendErrorKind::FeeTooLow => RecoveryStrategy {
                release_nonce: false,
                reacquire_nonce: false,
                retryable: true,
            },
            SendErrorKind::Other => RecoveryStrategy {
                release_nonce: true,
                reacquire_nonce: true,
                retryable: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multisend_core::error::{RpcErrorKind, RpcErrorResponse};

    fn rpc_error(message: &str) -> EngineError {
        EngineError::RpcError {
            rpc_url: "http://localhost:8545/".to_string(),
            message: message.to_string(),
            kind: RpcErrorKind::ErrorResp(RpcErrorResponse {
                code: -32000,
                message: message.to_string(),
            }),
        }
    }

    #[test]
    fn insufficient_funds_is_terminal() {
        let kind = SendErrorKind::classify(&rpc_error("insufficient funds for gas * price + value"));
        assert_eq!(kind, SendErrorKind::InsufficientFunds);

        let strategy = kind.strategy();
        assert!(strategy.release_nonce);
        assert!(!strategy.retryable);
    }

    #[test]
    fn nonce_conflicts_reacquire() {
        for message in [
            "nonce too low",
            "already known",
            "replacement transaction underpriced",
            "nonce has already been used",
        ] {
            let kind = SendErrorKind::classify(&rpc_error(message));
            assert_eq!(kind, SendErrorKind::NonceConflict, "{message}");

            let strategy = kind.strategy();
            assert!(strategy.release_nonce);
            assert!(strategy.reacquire_nonce);
            assert!(strategy.retryable);
        }
    }

    #[test]
    fn underpriced_without_replacement_keeps_the_nonce() {
        let kind = SendErrorKind::classify(&rpc_error("transaction underpriced"));
        assert_eq!(kind, SendErrorKind::FeeTooLow);

        let strategy = kind.strategy();
        assert!(!strategy.release_nonce);
        assert!(!strategy.reacquire_nonce);
        assert!(strategy.retryable);
    }

    #[test]
    fn transport_failures_classify_as_other() {
        let error = EngineError::RpcError {
            rpc_url: "http://localhost:8545/".to_string(),
            message: "connection refused".to_string(),
            kind: RpcErrorKind::TransportError {
                message: "connection refused".to_string(),
            },
        };
        assert_eq!(SendErrorKind::classify(&error), SendErrorKind::Other);
    }
}
