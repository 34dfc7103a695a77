//! History sync planning
//!
//! Turns the local chat log into a paced sequence of `SyncHistory` payloads
//! for one peer that is behind.
//!
//! Sync is incremental and directional: only messages newer than the
//! peer's cursor are pushed, and only by a side that is strictly ahead. Two
//! groups that chatted while apart do not fully converge. Given users A..E
//! where A and B chat, go offline, then C and D chat and A and B return: C
//! and D push to A and B, but A and B's older messages never reach C and D
//! because their cursors are already newer. A later newcomer E receives
//! everything from everyone.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RoomConfig;
use crate::protocol::{RoomMessage, SyncHistoryMessage};
use crate::types::{new_message_id, MessageUser, NormalMessage};

/// One `SyncHistory` payload scheduled for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSend {
    pub message: SyncHistoryMessage,
    /// Delay from the moment the plan is made
    pub delay: Duration,
}

/// Outcome of planning a history push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPlan {
    /// Payloads in delivery order, with strictly increasing delays
    pub sends: Vec<PlannedSend>,
    /// Ids of messages that were eligible but too large to send alone
    pub dropped: Vec<String>,
}

impl HistoryPlan {
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }

    /// Ids of every message carried by the plan, in delivery order
    pub fn message_ids(&self) -> Vec<String> {
        self.sends
            .iter()
            .flat_map(|s| s.message.messages.iter().map(|m| m.id.clone()))
            .collect()
    }
}

/// Normal messages newer than `since` and no older than the retention
/// window, ordered by send time.
pub fn eligible_messages(
    messages: &[NormalMessage],
    since: i64,
    now: i64,
    config: &RoomConfig,
) -> Vec<NormalMessage> {
    let retention = config.retention_ms();
    let mut eligible: Vec<NormalMessage> = messages
        .iter()
        .filter(|m| {
            // Send times come from remote peers and may be anywhere in i64.
            m.is_normal() && m.send_time > since && now.saturating_sub(m.send_time) <= retention
        })
        .cloned()
        .collect();
    eligible.sort_by_key(|m| m.send_time);
    eligible
}

/// Plan the payloads that bring a peer with cursor `since` up to date.
///
/// Batches of `sync_batch_size` messages travel as one payload each. A
/// batch whose encoding is not below the ceiling is exploded into one
/// payload per message; a single message still over the ceiling is dropped.
pub fn plan_history_sync(
    sender: &MessageUser,
    messages: &[NormalMessage],
    since: i64,
    now: i64,
    config: &RoomConfig,
) -> HistoryPlan {
    let eligible = eligible_messages(messages, since, now, config);
    let mut plan = HistoryPlan::default();
    if eligible.is_empty() {
        return plan;
    }

    let limit = config.max_message_size;
    let mut next_delay: Option<Duration> = None;

    for batch in eligible.chunks(config.batch_size()) {
        let mut step = config.batch_delay();

        let whole = history_message(sender, batch.to_vec(), now);
        if fits(&whole, limit) {
            let delay = advance(&mut next_delay, step);
            plan.sends.push(PlannedSend {
                message: whole,
                delay,
            });
            continue;
        }

        debug!(count = batch.len(), "History batch over limit, sending one by one");
        for message in batch {
            let single = history_message(sender, vec![message.clone()], now);
            if fits(&single, limit) {
                let delay = advance(&mut next_delay, step);
                plan.sends.push(PlannedSend {
                    message: single,
                    delay,
                });
                step = config.message_delay();
            } else {
                warn!(id = %message.id, limit, "Skipping message too large for history sync");
                plan.dropped.push(message.id.clone());
            }
        }
    }

    plan
}

/// Delay for the next send: zero for the first, then `step` after the
/// previous one.
///
/// Offsets accumulate from the previous send rather than from the batch
/// index, so a batch after an exploded one starts `step` after its last
/// single send.
fn advance(previous: &mut Option<Duration>, step: Duration) -> Duration {
    let delay = match *previous {
        None => Duration::ZERO,
        Some(prev) => prev + step,
    };
    *previous = Some(delay);
    delay
}

fn history_message(
    sender: &MessageUser,
    messages: Vec<NormalMessage>,
    now: i64,
) -> SyncHistoryMessage {
    SyncHistoryMessage {
        id: new_message_id(),
        send_time: now,
        messages,
        user_id: sender.user_id.clone(),
        username: sender.username.clone(),
        user_avatar: sender.user_avatar.clone(),
    }
}

fn fits(message: &SyncHistoryMessage, limit: usize) -> bool {
    match RoomMessage::SyncHistory(message.clone()).byte_size() {
        Ok(size) => size < limit,
        Err(e) => {
            warn!(error = %e, "Failed to size history payload");
            false
        }
    }
}
