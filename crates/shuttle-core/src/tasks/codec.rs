//! PayloadCodec - broker payload と TaskPayload の相互変換
//!
//! The wire payload is deliberately minimal: `{"id": "...", "task_kind": "..."}`.
//! Everything else is read from the record store on delivery.

use serde::{Deserialize, Serialize};

use crate::domain::{CodecError, MessageId, MessageRecord, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: MessageId,
    pub task_kind: TaskKind,
}

impl From<&MessageRecord> for TaskPayload {
    fn from(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            task_kind: record.task_kind,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(&self, payload: &TaskPayload) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(CodecError::Encode)
    }

    pub fn decode(&self, body: &[u8]) -> Result<TaskPayload, CodecError> {
        serde_json::from_slice(body).map_err(CodecError::Decode)
    }
}
