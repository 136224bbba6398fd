//! FIFO buffer for messages sent while not authenticated.

use std::collections::VecDeque;

use crate::models::Message;

/// Unbounded FIFO of outbound messages.
///
/// Messages that could not be sent live go to the back; a message whose
/// live transmit failed goes back to the front so it is retried first.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<Message>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message sent while not connected.
    pub fn push_back(&mut self, message: Message) {
        self.items.push_back(message);
    }

    /// Re-queue a message whose transmit failed.
    pub fn push_front(&mut self, message: Message) {
        self.items.push_front(message);
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
