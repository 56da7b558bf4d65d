use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::Duration,
};

use coterie_shared::{lock, wait_until, NodeId};

/// Peer lifecycle notifications of a local node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Connected(NodeId),
    /// The peer disconnected or its connection failed; it is unreachable
    Disconnected(NodeId),
}

pub(crate) struct EventQueue {
    events: Mutex<VecDeque<NodeEvent>>,
    pushed: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            pushed: Condvar::new(),
        }
    }

    pub fn push(&self, event: NodeEvent) {
        lock(&self.events).push_back(event);
        self.pushed.notify_all();
    }

    pub fn pop(&self, timeout: Option<Duration>) -> Option<NodeEvent> {
        let events = lock(&self.events);
        let (mut events, _) =
            wait_until(&self.pushed, events, timeout, |events| !events.is_empty());
        events.pop_front()
    }
}
