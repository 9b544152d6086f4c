// Path: crates/tss/src/error.rs
use ferry_types::error::{BridgeError, ErrorCode};
use ferry_types::Blame;
use thiserror::Error;

/// Name of the final keysign round. A failure there must be retried with the exact
/// same messages.
pub const KEYSIGN_ROUND7: &str = "SignRound7Message";

/// Errors returned by a keysign attempt.
#[derive(Error, Debug, Clone)]
pub enum TssError {
    /// No result arrived within the keysign timeout.
    #[error("keysign timed out after {secs}s")]
    Timeout {
        /// The timeout that elapsed.
        secs: u64,
    },
    /// The ceremony failed in its final round.
    #[error("keysign failed in round 7: {}", .blame.fail_reason)]
    Round7 {
        /// Culpability report.
        blame: Blame,
    },
    /// The ceremony failed in an earlier round.
    #[error("keysign failed in round '{round}': {}", .blame.fail_reason)]
    Keysign {
        /// Culpability report.
        blame: Blame,
        /// Round the failure happened in.
        round: String,
    },
    /// The TSS service could not be reached or answered with an error.
    #[error("TSS server error: {0}")]
    Server(String),
    /// A settlement-chain lookup needed for the request failed.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),
    /// The response carried no signature for a requested message.
    #[error("no signature for message {0} in keysign response")]
    MissingSignature(String),
    /// A signature or recovery id in the response could not be decoded.
    #[error("failed to decode keysign result: {0}")]
    Decode(String),
    /// The local signing key could not produce a signature.
    #[error("local signing failed: {0}")]
    Local(String),
    /// The signer was stopped before the request completed.
    #[error("signer stopped")]
    Stopped,
}

impl TssError {
    /// Classifies a failed ceremony by the round in its blame.
    pub fn from_blame(blame: Blame) -> Self {
        if blame.round == KEYSIGN_ROUND7 {
            Self::Round7 { blame }
        } else {
            let round = blame.round.clone();
            Self::Keysign { blame, round }
        }
    }

    /// The culpability report, when the ceremony itself failed.
    pub fn blame(&self) -> Option<&Blame> {
        match self {
            Self::Round7 { blame } | Self::Keysign { blame, .. } => Some(blame),
            _ => None,
        }
    }

    /// Whether the next attempt must reuse the identical unsigned transaction.
    pub fn is_round7(&self) -> bool {
        matches!(self, Self::Round7 { .. })
    }
}

impl ErrorCode for TssError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "TSS_TIMEOUT",
            Self::Round7 { .. } => "TSS_KEYSIGN_ROUND7",
            Self::Keysign { .. } => "TSS_KEYSIGN_FAILED",
            Self::Server(_) => "TSS_SERVER_ERROR",
            Self::Bridge(_) => "TSS_BRIDGE_ERROR",
            Self::MissingSignature(_) => "TSS_MISSING_SIGNATURE",
            Self::Decode(_) => "TSS_DECODE_ERROR",
            Self::Local(_) => "TSS_LOCAL_SIGN_FAILED",
            Self::Stopped => "TSS_STOPPED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blame_round_selects_variant() {
        let r7 = TssError::from_blame(Blame {
            round: KEYSIGN_ROUND7.into(),
            fail_reason: "timeout".into(),
            ..Default::default()
        });
        assert!(r7.is_round7());
        assert_eq!(r7.code(), "TSS_KEYSIGN_ROUND7");

        let r2 = TssError::from_blame(Blame {
            round: "SignRound2Message".into(),
            ..Default::default()
        });
        assert!(!r2.is_round7());
        assert!(r2.blame().is_some());
        assert!(TssError::Stopped.blame().is_none());
    }
}
