//! Domain model (ids, task kinds, records, status machine, outcomes, errors).

pub mod errors;
pub mod ids;
pub mod outcome;
pub mod record;
pub mod state;
pub mod task_kind;
pub mod ticket;

pub use self::errors::{
    BrokerError, CodecError, EngineError, ErrorKind, RegistryError, StoreError,
};
pub use self::ids::{Id, IdMarker, MessageId, ParseIdError, TicketId};
pub use self::outcome::{HandlerOutcome, OutcomeKind};
pub use self::record::{MessageRecord, Properties, StatusUpdate};
pub use self::state::MessageStatus;
pub use self::task_kind::{TaskKind, UnknownTaskKind};
pub use self::ticket::AccessTicket;
