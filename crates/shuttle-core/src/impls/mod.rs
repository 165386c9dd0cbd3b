//! Impls - 実装（開発用・テスト用）
//!
//! In-memory implementations of the ports. They back the demo binary and the
//! test suite, and expose fault-injection knobs (store write failures, broker
//! outages, ticket store outages).
//!
//! Production adapters (a relational store, an AMQP broker) live outside this
//! crate and implement the same traits.

pub mod inmem_broker;
pub mod inmem_store;
pub mod inmem_tickets;

pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_store::InMemoryRecordStore;
pub use self::inmem_tickets::InMemoryTicketStore;
