//! Broadcast-rejection classification.
//!
//! The node's JSON-RPC surface has no machine-readable codes for mempool
//! policy rejections, so the replace path branches on error-message
//! substrings. This is the one place those substrings live.

/// How a rejected replacement broadcast should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another replacement landed first; wait for its notification.
    InsufficientFee,
    /// The contested value no longer covers the fee; burn instead.
    NotEnoughFunds,
    /// The replacement output would be dust; burn instead.
    Dust,
    /// The competitor confirmed while we were building; battle over.
    InputsMissingOrSpent,
    Other,
}

pub fn classify_rejection(message: &str) -> Rejection {
    if message.contains("insufficient fee") {
        Rejection::InsufficientFee
    } else if message.contains("not enough funds to cover fee") {
        Rejection::NotEnoughFunds
    } else if message.contains("dust") {
        Rejection::Dust
    } else if message.contains("bad-txns-inputs-missingorspent") {
        Rejection::InputsMissingOrSpent
    } else {
        Rejection::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_rejections() {
        assert_eq!(
            classify_rejection("-26: insufficient fee, rejecting replacement"),
            Rejection::InsufficientFee
        );
        assert_eq!(
            classify_rejection("not enough funds to cover fee"),
            Rejection::NotEnoughFunds
        );
        assert_eq!(classify_rejection("-26: dust"), Rejection::Dust);
        assert_eq!(
            classify_rejection("-25: bad-txns-inputs-missingorspent"),
            Rejection::InputsMissingOrSpent
        );
    }

    #[test]
    fn test_unknown_rejections() {
        assert_eq!(classify_rejection(""), Rejection::Other);
        assert_eq!(
            classify_rejection("-26: txn-mempool-conflict"),
            Rejection::Other
        );
    }
}
