//! IdGenerator port - ID 生成の抽象化
//!
//! Message ids are assigned at creation and never change, so generation sits
//! behind a trait that tests can replace.

use crate::domain::ids::{MessageId, TicketId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_ticket_id(&self) -> TicketId;
}

/// ULID ids whose timestamp part comes from the given `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn generate_ticket_id(&self) -> TicketId {
        TicketId::from(self.next_ulid())
    }
}
