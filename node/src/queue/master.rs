use std::{
    collections::VecDeque,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

use log::{debug, trace};

use coterie_shared::{
    lock, Command, DispatchError, NodeId, ObjectId, OutgoingPacket, PacketType, Serde,
};

use super::{encode_item, QueueInfo};
use crate::{
    error::QueueError,
    local_node::{LocalNode, WeakLocalNode},
    object::Object,
    packets::{
        QueueEmptyPacket, QueueGetItemsPacket, QueueItemPacket, CMD_QUEUE_EMPTY,
        CMD_QUEUE_GET_ITEMS, CMD_QUEUE_ITEM,
    },
};

type Items = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// Holds the items of a distributed queue and hands them out to slaves in
/// request order
pub struct QueueMaster<T: Serde> {
    object: Object<QueueInfo>,
    items: Items,
    _item: PhantomData<fn(T) -> T>,
}

impl<T: Serde> QueueMaster<T> {
    pub fn new(node: &LocalNode) -> Result<Self, QueueError> {
        let object = node.register_object(QueueInfo)?;
        let items: Items = Arc::new(Mutex::new(VecDeque::new()));

        let handler_items = items.clone();
        let weak = node.downgrade();
        let queue_id = object.id();
        object.register_command(
            CMD_QUEUE_GET_ITEMS,
            move |command| serve_items(&weak, &queue_id, &handler_items, &command),
            Some(node.command_queue()),
        );
        debug!("{}: new queue master", queue_id);
        Ok(Self {
            object,
            items,
            _item: PhantomData,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    pub fn master_node(&self) -> NodeId {
        self.object.master_node()
    }

    pub fn push(&self, item: &T) {
        lock(&self.items).push_back(encode_item(item));
    }

    pub fn clear(&self) {
        lock(&self.items).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs on the master's command thread, so requests are served one at a
/// time in arrival order
fn serve_items(
    node: &WeakLocalNode,
    queue_id: &ObjectId,
    items: &Items,
    command: &Command,
) -> Result<(), DispatchError> {
    let Some(local) = node.upgrade() else {
        return Ok(());
    };
    let request = QueueGetItemsPacket::de(&mut command.reader())?;
    let requester = command.sender();

    let granted: Vec<Vec<u8>> = {
        let mut items = lock(items);
        let count = (request.count as usize).min(items.len());
        items.drain(..count).collect()
    };
    trace!(
        "{}: granting {} of {} items to {}",
        queue_id,
        granted.len(),
        request.count,
        requester
    );

    let short = granted.len() < request.count as usize;
    for item in granted {
        let mut packet = OutgoingPacket::for_object(PacketType::Queue, CMD_QUEUE_ITEM, queue_id);
        packet.write(&QueueItemPacket {
            request_id: request.request_id,
            item,
        });
        send(&local, &requester, packet.finish(), CMD_QUEUE_ITEM)?;
    }
    if short {
        let mut packet = OutgoingPacket::for_object(PacketType::Queue, CMD_QUEUE_EMPTY, queue_id);
        packet.write(&QueueEmptyPacket {
            request_id: request.request_id,
        });
        send(&local, &requester, packet.finish(), CMD_QUEUE_EMPTY)?;
    }
    Ok(())
}

fn send(
    node: &LocalNode,
    receiver: &NodeId,
    packet: Vec<u8>,
    command: u32,
) -> Result<(), DispatchError> {
    node.send_to(receiver, packet)
        .map_err(|error| DispatchError::Rejected {
            command,
            reason: error.to_string(),
        })
}
