//! Access tickets handed out for downloads; purged once expired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TicketId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTicket {
    pub id: TicketId,
    /// Identifier of the digitized record the ticket grants access to.
    pub record_identifier: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessTicket {
    pub fn new(
        id: TicketId,
        record_identifier: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            record_identifier: record_identifier.into(),
            expires_at,
        }
    }

    /// A ticket expiring exactly at `now` counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
