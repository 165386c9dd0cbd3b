//! Ports - 抽象化レイヤー
//!
//! Interfaces to the collaborators the engine does not own: the relational
//! record store, the message broker, the ticket store, time and id generation.
//!
//! - The record store is the source of truth.
//! - The broker carries `id` + `task_kind` only.

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod record_store;
pub mod ticket_store;

pub use self::broker::{BrokerGateway, Delivery, DeliveryTag};
pub use self::clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::record_store::MessageRecordStore;
pub use self::ticket_store::TicketStore;
