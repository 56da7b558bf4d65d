use std::{
    collections::VecDeque,
    marker::PhantomData,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use coterie_shared::{
    lock, wait_until, NodeId, ObjectId, OutgoingPacket, PacketType, QueueConfig, RequestId,
    Serde, VERSION_HEAD,
};

use super::{decode_item, QueueInfo};
use crate::{
    error::QueueError,
    local_node::LocalNode,
    object::Object,
    packets::{
        QueueEmptyPacket, QueueGetItemsPacket, QueueItemPacket, CMD_QUEUE_EMPTY,
        CMD_QUEUE_GET_ITEMS, CMD_QUEUE_ITEM,
    },
};

#[derive(Default)]
struct SlaveQueueState {
    items: VecDeque<Vec<u8>>,
    /// Request in flight and the number of items it may still deliver
    outstanding: Option<(RequestId, u32)>,
    /// The master ran short answering the last request
    empty: bool,
    next_request: RequestId,
}

struct SlaveQueueShared {
    state: Mutex<SlaveQueueState>,
    changed: Condvar,
}

impl SlaveQueueShared {
    fn add_item(&self, request_id: RequestId, item: Vec<u8>) {
        let mut state = lock(&self.state);
        state.items.push_back(item);
        if let Some((outstanding, remaining)) = state.outstanding {
            if outstanding == request_id {
                state.outstanding = (remaining > 1).then_some((outstanding, remaining - 1));
            }
        }
        self.changed.notify_all();
    }

    fn set_empty(&self, request_id: RequestId) {
        let mut state = lock(&self.state);
        if state.outstanding.is_some_and(|(outstanding, _)| outstanding == request_id) {
            state.outstanding = None;
            state.empty = true;
        }
        self.changed.notify_all();
    }
}

/// Pops items of a queue held by a `QueueMaster` on another node
pub struct QueueSlave<T: Serde> {
    object: Object<QueueInfo>,
    shared: Arc<SlaveQueueShared>,
    config: QueueConfig,
    _item: PhantomData<fn() -> T>,
}

impl<T: Serde> QueueSlave<T> {
    pub fn map(node: &LocalNode, queue_id: ObjectId, master: &NodeId) -> Result<Self, QueueError> {
        Self::map_with_config(node, queue_id, master, QueueConfig::default())
    }

    pub fn map_with_config(
        node: &LocalNode,
        queue_id: ObjectId,
        master: &NodeId,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let object = node.map_object(queue_id, VERSION_HEAD, master, QueueInfo)?;
        let shared = Arc::new(SlaveQueueShared {
            state: Mutex::new(SlaveQueueState::default()),
            changed: Condvar::new(),
        });

        let item_shared = shared.clone();
        object.register_command(
            CMD_QUEUE_ITEM,
            move |command| {
                let packet = QueueItemPacket::de(&mut command.reader())?;
                item_shared.add_item(packet.request_id, packet.item);
                Ok(())
            },
            None,
        );
        let empty_shared = shared.clone();
        object.register_command(
            CMD_QUEUE_EMPTY,
            move |command| {
                let packet = QueueEmptyPacket::de(&mut command.reader())?;
                empty_shared.set_empty(packet.request_id);
                Ok(())
            },
            None,
        );
        debug!("{}: mapped queue slave", queue_id);

        Ok(Self {
            object,
            shared,
            config,
            _item: PhantomData,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    pub fn master_node(&self) -> NodeId {
        self.object.master_node()
    }

    /// Items received but not popped yet
    pub fn buffered(&self) -> usize {
        lock(&self.shared.state).items.len()
    }

    /// Next item, `None` once the master reports the queue empty. Waits at
    /// most the node timeout.
    pub fn pop(&self) -> Result<Option<T>, QueueError> {
        self.pop_with(self.object.local_node().config().timeout)
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        self.pop_with(Some(timeout))
    }

    fn pop_with(&self, timeout: Option<Duration>) -> Result<Option<T>, QueueError> {
        let queue_id = self.id();
        if !self.object.is_attached() {
            return Err(QueueError::NotMapped { queue_id });
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            let mut state = lock(&self.shared.state);
            if let Some(item) = state.items.pop_front() {
                let prefetch = (self.config.prefetch_mark > 0
                    && state.items.len() <= self.config.prefetch_mark
                    && state.outstanding.is_none())
                .then(|| self.prepare_request(&mut state));
                drop(state);
                if let Some(request) = prefetch {
                    if let Err(error) = self.send_request(request) {
                        warn!("{}: prefetch failed: {}", queue_id, error);
                    }
                }
                return Ok(Some(decode_item(&item)?));
            }
            if state.empty {
                state.empty = false;
                return Ok(None);
            }
            if state.outstanding.is_none() {
                let request = self.prepare_request(&mut state);
                drop(state);
                self.send_request(request)?;
                continue;
            }

            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) => Some(remaining),
                    None => return Err(QueueError::Timeout { queue_id }),
                },
                None => None,
            };
            let _ = wait_until(&self.shared.changed, state, remaining, |state| {
                !state.items.is_empty() || state.empty || state.outstanding.is_none()
            });
        }
    }

    /// Marks a request outstanding; the caller sends it without the lock
    fn prepare_request(&self, state: &mut SlaveQueueState) -> (RequestId, u32) {
        let request_id = state.next_request;
        state.next_request = state.next_request.wrapping_add(1);
        let count = self.config.prefetch_amount.max(1);
        state.outstanding = Some((request_id, count));
        state.empty = false;
        (request_id, count)
    }

    fn send_request(&self, (request_id, count): (RequestId, u32)) -> Result<(), QueueError> {
        let mut packet =
            OutgoingPacket::for_object(PacketType::Queue, CMD_QUEUE_GET_ITEMS, &self.id());
        packet.write(&QueueGetItemsPacket { request_id, count });
        trace!("{}: requesting {} items", self.id(), count);
        if let Err(error) = self
            .object
            .local_node()
            .send_to(&self.master_node(), packet.finish())
        {
            let mut state = lock(&self.shared.state);
            if state.outstanding.is_some_and(|(outstanding, _)| outstanding == request_id) {
                state.outstanding = None;
            }
            return Err(error.into());
        }
        Ok(())
    }
}
