//! Subscription task applying invalidations from peers.
//!
//! ```text
//! Instance A: set("1") ─▶ MULTI SET Config:1 / PUBLISH beleriand:sync:Config EXEC
//!                                          │
//!        ┌─────────────────────────────────┴──────────────┐
//!        ▼                                                ▼
//! Instance A: own sender id, ignored        Instance B: slot_table[slot] = now
//!                                           (older local entries of that slot
//!                                            are refetched on their next read)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::message::InvalidationMessage;
use crate::metrics;
use crate::multilevel::CacheState;
use crate::shared::{MessageStream, SharedMessage, SharedStore};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Spawn the task consuming `stream` until `shutdown` is cancelled.
///
/// If the stream ends (connection lost), the task resubscribes with
/// exponential backoff. Invalidations published in the meantime are lost, so
/// after resubscribing every local entry is dropped and every slot marked.
pub(crate) fn spawn(
    state: Arc<CacheState>,
    shared: Arc<dyn SharedStore>,
    stream: MessageStream,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = stream;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(message) => handle(&state, &message),
                    None => {
                        tracing::warn!(cache = %state.name, "invalidation subscription ended");
                        match resubscribe(&state, shared.as_ref(), &shutdown).await {
                            Some(resumed) => {
                                stream = resumed;
                                state.local.clear();
                                state.slots.mark_all(clock::now());
                                tracing::info!(cache = %state.name, "invalidation subscription restored, local entries dropped");
                            }
                            None => break,
                        }
                    }
                }
            }
        }
        tracing::debug!(cache = %state.name, "invalidation listener stopped");
    })
}

async fn resubscribe(
    state: &CacheState,
    shared: &dyn SharedStore,
    shutdown: &CancellationToken,
) -> Option<MessageStream> {
    let channels = state.channels.all();
    let mut backoff = INITIAL_BACKOFF;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            result = shared.subscribe(&channels) => match result {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    tracing::error!(
                        cache = %state.name,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Failed to resubscribe to invalidation channels, retrying..."
                    );
                }
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Dispatch one delivered message to the handler of its channel.
pub(crate) fn handle(state: &CacheState, message: &SharedMessage) {
    let decoded = match InvalidationMessage::decode(&message.payload) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(
                cache = %state.name,
                channel = %message.channel,
                error = %e,
                "Dropping malformed invalidation message"
            );
            return;
        }
    };

    if message.channel == state.channels.update {
        on_update(state, &decoded);
    } else if message.channel == state.channels.clear {
        on_clear(state, &decoded);
    } else {
        tracing::debug!(cache = %state.name, channel = %message.channel, "message on unexpected channel");
    }
}

fn on_update(state: &CacheState, message: &InvalidationMessage) {
    // Our own write already refreshed the local entry
    if message.sender == state.instance_id {
        state.counters.invalidation_ignored();
        return;
    }

    let now = clock::now();
    match message.slot {
        Some(slot) => {
            state.slots.mark(slot, now);
            metrics::record_invalidation(&state.name, "slot");
            tracing::trace!(cache = %state.name, slot, sender = %message.sender, "slot invalidated");
        }
        None => {
            state.slots.mark_all(now);
            metrics::record_invalidation(&state.name, "all");
            tracing::debug!(cache = %state.name, sender = %message.sender, "all slots invalidated");
        }
    }
    state.counters.invalidation_applied();
}

fn on_clear(state: &CacheState, message: &InvalidationMessage) {
    // Clears apply fleet-wide, the sender included
    state.wipe(clock::now());
    state.counters.clear_applied();
    metrics::record_invalidation(&state.name, "clear");
    tracing::info!(cache = %state.name, sender = %message.sender, "local cache cleared");
}
