//! Per-conversation event bus feeding SSE subscribers, with late-join replay
//! from a bounded buffer.

use codemend_common::WorkflowEvent;
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct ConversationChannel {
    subscriber: Option<mpsc::Sender<WorkflowEvent>>,
    buffer: VecDeque<WorkflowEvent>,
}

/// One subscriber per conversation; events published before a subscriber
/// attaches are buffered (capacity-bounded) and drained in order on
/// subscribe. A client abort surfaces as a closed channel on the next
/// publish, which tears the stream down but retains the buffer for a
/// reconnect. No lock is held across I/O: senders are try_send only.
pub struct StreamMultiplexer {
    channels: DashMap<String, ConversationChannel>,
    buffer_capacity: usize,
}

impl StreamMultiplexer {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer_capacity,
        }
    }

    /// Attach a subscriber. A prior subscriber's stream is closed first; the
    /// buffered events are replayed in publish order, then cleared.
    pub fn subscribe(&self, conversation_id: &str) -> mpsc::Receiver<WorkflowEvent> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut channel = self.channels.entry(conversation_id.to_string()).or_default();
        if channel.subscriber.take().is_some() {
            debug!(conversation_id, "closing prior stream for new subscriber");
        }
        for event in channel.buffer.drain(..) {
            // capacity exceeds the replay buffer cap, so this cannot fill
            let _ = sender.try_send(event);
        }
        channel.subscriber = Some(sender);
        receiver
    }

    pub fn publish(&self, conversation_id: &str, event: WorkflowEvent) {
        let mut channel = self.channels.entry(conversation_id.to_string()).or_default();
        match channel.subscriber.take() {
            Some(sender) => match sender.try_send(event) {
                Ok(()) => channel.subscriber = Some(sender),
                Err(mpsc::error::TrySendError::Closed(event))
                | Err(mpsc::error::TrySendError::Full(event)) => {
                    // client-side abort: tear the stream down but retain the
                    // buffer so a reconnect can replay
                    debug!(conversation_id, "subscriber gone, tearing stream down");
                    Self::buffer_event(
                        &mut channel.buffer,
                        self.buffer_capacity,
                        conversation_id,
                        event,
                    );
                }
            },
            None => {
                Self::buffer_event(
                    &mut channel.buffer,
                    self.buffer_capacity,
                    conversation_id,
                    event,
                );
            }
        }
    }

    fn buffer_event(
        buffer: &mut VecDeque<WorkflowEvent>,
        capacity: usize,
        conversation_id: &str,
        event: WorkflowEvent,
    ) {
        if buffer.len() >= capacity {
            // overflow drops the newest event
            warn!(
                conversation_id,
                capacity, "event buffer full, dropping newest event"
            );
            return;
        }
        buffer.push_back(event);
    }

    /// Terminal cleanup: closes the stream and clears the buffer.
    pub fn finish(&self, conversation_id: &str) {
        self.channels.remove(conversation_id);
    }

    /// Idle timeout: close the stream and clear the buffer.
    pub fn idle_timeout(&self, conversation_id: &str) {
        debug!(conversation_id, "stream idle timeout");
        self.channels.remove(conversation_id);
    }

    pub fn has_subscriber(&self, conversation_id: &str) -> bool {
        self.channels
            .get(conversation_id)
            .map(|c| c.subscriber.is_some())
            .unwrap_or(false)
    }

    pub fn buffered_len(&self, conversation_id: &str) -> usize {
        self.channels
            .get(conversation_id)
            .map(|c| c.buffer.len())
            .unwrap_or(0)
    }
}
