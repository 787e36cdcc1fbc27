//! Invalidation messages exchanged over the pub/sub channels.
//!
//! A message only says *who* invalidated *which* slot. Values never travel over
//! the channel; peers refetch them from the shared store on their next read.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::slot::{HASH_SLOT_COUNT, HashSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Instance id of the cache that published the message.
    pub sender: Uuid,
    /// Slot to invalidate; `None` invalidates everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<HashSlot>,
}

impl InvalidationMessage {
    /// Invalidate a single slot.
    pub fn slot(sender: Uuid, slot: HashSlot) -> Self {
        Self {
            sender,
            slot: Some(slot),
        }
    }

    /// Invalidate everything.
    pub fn clear_all(sender: Uuid) -> Self {
        Self { sender, slot: None }
    }

    pub fn is_clear_all(&self) -> bool {
        self.slot.is_none()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let message: Self = serde_json::from_slice(payload)
            .map_err(|e| CacheError::Message(e.to_string()))?;
        if let Some(slot) = message.slot {
            if slot as usize >= HASH_SLOT_COUNT {
                return Err(CacheError::Message(format!("slot {slot} out of range")));
            }
        }
        Ok(message)
    }
}
