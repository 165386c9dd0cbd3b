//! Message status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a message record.
///
/// State transitions:
/// - Created -> Queued -> Processing -> Finished
/// - Processing -> WaitingRetry -> Queued (loop bounded by the retry cap)
/// - Processing -> Error (failed, timed out, or retry cap reached)
/// - Processing -> Queued (crash recovery only)
/// - Created | Queued | WaitingRetry -> Cancelled
///
/// Finished, Error and Cancelled are terminal: nothing moves out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Created,
    Queued,
    Processing,
    WaitingRetry,
    Finished,
    Error,
    Cancelled,
}

impl MessageStatus {
    pub const ALL: [MessageStatus; 7] = [
        MessageStatus::Created,
        MessageStatus::Queued,
        MessageStatus::Processing,
        MessageStatus::WaitingRetry,
        MessageStatus::Finished,
        MessageStatus::Error,
        MessageStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Finished | MessageStatus::Error | MessageStatus::Cancelled
        )
    }

    /// Operator cancellation is honored only outside of Processing.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            MessageStatus::Created | MessageStatus::Queued | MessageStatus::WaitingRetry
        )
    }

    /// Is `to` a legal next status?
    pub fn can_transition_to(self, to: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, to),
            (Created, Queued)
                | (Created, Cancelled)
                | (Queued, Processing)
                | (Queued, Cancelled)
                | (Processing, Finished)
                | (Processing, Error)
                | (Processing, WaitingRetry)
                | (Processing, Queued)
                | (WaitingRetry, Queued)
                | (WaitingRetry, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Created => "CREATED",
            MessageStatus::Queued => "QUEUED",
            MessageStatus::Processing => "PROCESSING",
            MessageStatus::WaitingRetry => "WAITING_RETRY",
            MessageStatus::Finished => "FINISHED",
            MessageStatus::Error => "ERROR",
            MessageStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use MessageStatus::*;

    #[rstest]
    #[case(Created, Queued)]
    #[case(Queued, Processing)]
    #[case(Processing, WaitingRetry)]
    #[case(WaitingRetry, Queued)]
    #[case(Processing, Finished)]
    #[case(Processing, Error)]
    #[case(Processing, Queued)]
    #[case(WaitingRetry, Cancelled)]
    fn allowed_transitions(#[case] from: MessageStatus, #[case] to: MessageStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case(Created, Processing)]
    #[case(Queued, Finished)]
    #[case(Processing, Cancelled)]
    #[case(WaitingRetry, Processing)]
    #[case(Queued, Queued)]
    fn rejected_transitions(#[case] from: MessageStatus, #[case] to: MessageStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in MessageStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in MessageStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&WaitingRetry).unwrap(),
            "\"WAITING_RETRY\""
        );
        assert_eq!(WaitingRetry.to_string(), "WAITING_RETRY");
    }
}
