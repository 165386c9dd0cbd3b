//! Errors and their operational classification.

use thiserror::Error;

use super::ids::MessageId;
use super::state::MessageStatus;
use super::task_kind::TaskKind;

/// Operational classification of an error.
///
/// - Transient: worth retrying as-is.
/// - Permanent: retrying cannot help.
/// - Infrastructure: a collaborator (store, broker) is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Errors from a [`MessageRecordStore`](crate::ports::MessageRecordStore) or
/// [`TicketStore`](crate::ports::TicketStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("message record not found: {0}")]
    NotFound(MessageId),

    #[error("message record already exists: {0}")]
    AlreadyExists(MessageId),

    /// The compare-and-set guard: the record is no longer in the expected state.
    #[error("status conflict for {id}: expected {expected}, found {actual}")]
    Conflict {
        id: MessageId,
        expected: MessageStatus,
        actual: MessageStatus,
    },

    #[error("illegal transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Infrastructure,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Permanent
    }
}

/// Errors from a [`BrokerGateway`](crate::ports::BrokerGateway).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker not connected")]
    Disconnected,

    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("publish to '{queue}' failed: {message}")]
    Publish { queue: String, message: String },
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::UnknownDelivery(_) => ErrorKind::Permanent,
            _ => ErrorKind::Infrastructure,
        }
    }
}

/// Payload encode/decode errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Registry lookup and registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler for task kind '{0}' is already registered")]
    AlreadyRegistered(TaskKind),

    #[error("no handler registered for task kind '{0}'")]
    NotRegistered(TaskKind),
}

/// Errors surfaced by the queue manager's operator surface and lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("message record not found: {0}")]
    NotFound(MessageId),

    #[error("message {id} is already {status}")]
    AlreadyTerminal { id: MessageId, status: MessageStatus },

    #[error("message {0} is being processed and cannot be cancelled")]
    CancelWhileProcessing(MessageId),

    #[error("queue manager is already running")]
    AlreadyRunning,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Store(e) => e.kind(),
            EngineError::Broker(e) => e.kind(),
            _ => ErrorKind::Permanent,
        }
    }
}
