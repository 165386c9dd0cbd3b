//! Handlers shipped with the engine.

pub mod purge_tickets;

pub use self::purge_tickets::PurgeExpiredTicketsHandler;
