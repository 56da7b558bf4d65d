use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use log::{debug, info, trace, warn};

use coterie_shared::{
    lock, Command, CommandQueue, DispatchError, InstanceId, NodeId, ObjectConfig, ObjectId,
    OutgoingPacket, PacketType, Serde, Version, VersionList, INSTANCE_INVALID, VERSION_FIRST,
    VERSION_HEAD, VERSION_INVALID, VERSION_NONE, VERSION_OLDEST,
};

use crate::{
    error::ObjectError,
    local_node::{LocalNode, WeakLocalNode},
    packets::{
        MapObjectPacket, MapObjectReplyPacket, MapResult, UnsubscribeObjectPacket,
        CMD_OBJECT_DELTA, CMD_OBJECT_MAP, CMD_OBJECT_MAP_REPLY, CMD_OBJECT_UNSUBSCRIBE,
    },
    session::ObjectEntry,
};

struct Retained {
    instance: Vec<u8>,
    delta: Vec<u8>,
}

struct MasterState {
    version: Version,
    history: VersionList<Retained>,
    auto_obsolete: u32,
    subscribers: BTreeMap<NodeId, InstanceId>,
    attached: bool,
}

/// Version bookkeeping of a registered master. Keeps the instance data of
/// the retained versions and the set of subscribed slave nodes.
pub(crate) struct MasterManager {
    object_id: ObjectId,
    instance_id: InstanceId,
    state: Mutex<MasterState>,
}

impl MasterManager {
    pub fn new(
        object_id: ObjectId,
        instance_id: InstanceId,
        instance: Vec<u8>,
        config: &ObjectConfig,
    ) -> Self {
        let mut history = VersionList::new();
        // a fresh list always takes its first entry
        let _ = history.try_insert(
            VERSION_FIRST,
            Retained {
                instance,
                delta: Vec::new(),
            },
        );
        Self {
            object_id,
            instance_id,
            state: Mutex::new(MasterState {
                version: VERSION_FIRST,
                history,
                auto_obsolete: config.auto_obsolete,
                subscribers: BTreeMap::new(),
                attached: true,
            }),
        }
    }

    pub fn version(&self) -> Version {
        lock(&self.state).version
    }

    pub fn oldest_version(&self) -> Version {
        let state = lock(&self.state);
        state.history.first_version().unwrap_or(state.version)
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).attached
    }

    /// Head version and its instance data
    pub fn head_instance(&self) -> (Version, Vec<u8>) {
        let state = lock(&self.state);
        let data = state
            .history
            .get(state.version)
            .map(|retained| retained.instance.clone())
            .unwrap_or_default();
        (state.version, data)
    }

    pub fn subscribers(&self) -> Vec<NodeId> {
        lock(&self.state).subscribers.keys().copied().collect()
    }

    /// Versions kept in addition to the head
    pub fn set_auto_obsolete(&self, count: u32) {
        let mut state = lock(&self.state);
        state.auto_obsolete = count;
        Self::obsolete(&mut state);
    }

    /// True the first time
    pub fn detach(&self) -> bool {
        let mut state = lock(&self.state);
        let was_attached = state.attached;
        state.attached = false;
        state.subscribers.clear();
        was_attached
    }

    /// Publishes a new version and sends its delta to every subscriber
    pub fn commit(
        &self,
        node: &LocalNode,
        delta: Vec<u8>,
        instance: Vec<u8>,
    ) -> Result<Version, ObjectError> {
        let mut state = lock(&self.state);
        if !state.attached {
            return Err(ObjectError::NotMapped {
                object_id: self.object_id,
            });
        }
        let version = state.version + 1;
        let packet = delta_packet(&self.object_id, version, &delta);
        // versions only grow, so the insert lands at the back
        let _ = state.history.try_insert(version, Retained { instance, delta });
        state.version = version;
        Self::obsolete(&mut state);

        let mut lost = Vec::new();
        for node_id in state.subscribers.keys() {
            if let Err(error) = node.send_to(node_id, packet.clone()) {
                warn!(
                    "{}: dropping subscriber {} after failed send: {}",
                    self.object_id, node_id, error
                );
                lost.push(*node_id);
            }
        }
        for node_id in lost {
            state.subscribers.remove(&node_id);
        }
        trace!("{}: committed version {}", self.object_id, version);
        Ok(version)
    }

    fn obsolete(state: &mut MasterState) {
        let keep = state.auto_obsolete as usize + 1;
        state.history.truncate_front(keep);
    }

    /// Subscribes the sender, replies with the instance data of the
    /// requested version and sends the deltas from there to the head
    fn handle_map(&self, node: &LocalNode, command: &Command) -> Result<(), DispatchError> {
        let request = MapObjectPacket::de(&mut command.reader())?;
        let sender = command.sender();
        let mut state = lock(&self.state);

        let version = match request.version {
            VERSION_HEAD | VERSION_NONE => Some(state.version),
            VERSION_OLDEST => state.history.first_version(),
            version if state.history.contains(version) => Some(version),
            _ => None,
        };
        let Some(version) = version.filter(|_| state.attached) else {
            let result = if state.attached {
                MapResult::VersionUnavailable
            } else {
                MapResult::NotFound
            };
            debug!(
                "{}: refusing map of version {} by {}: {:?}",
                self.object_id, request.version, sender, result
            );
            return send_reply(
                node,
                &self.object_id,
                sender,
                MapObjectReplyPacket {
                    request_id: request.request_id,
                    result,
                    master_instance: self.instance_id,
                    version: VERSION_INVALID,
                    data: None,
                },
            );
        };

        let cached = request.cached_instance == self.instance_id
            && request.cached_first != VERSION_NONE
            && (request.cached_first..=request.cached_last).contains(&version);
        let data = if cached {
            trace!("{}: {} has version {} cached", self.object_id, sender, version);
            None
        } else {
            state
                .history
                .get(version)
                .map(|retained| retained.instance.clone())
        };
        state.subscribers.insert(sender, request.instance_id);
        send_reply(
            node,
            &self.object_id,
            sender,
            MapObjectReplyPacket {
                request_id: request.request_id,
                result: MapResult::Mapped,
                master_instance: self.instance_id,
                version,
                data,
            },
        )?;

        for (retained_version, retained) in state.history.iter() {
            if *retained_version > version {
                let packet = delta_packet(&self.object_id, *retained_version, &retained.delta);
                node.send_to(&sender, packet)
                    .map_err(|error| rejected(CMD_OBJECT_DELTA, error))?;
            }
        }
        info!(
            "{}: mapped by {} at version {} (head {})",
            self.object_id, sender, version, state.version
        );
        Ok(())
    }

    fn handle_unsubscribe(&self, command: &Command) -> Result<(), DispatchError> {
        let packet = UnsubscribeObjectPacket::de(&mut command.reader())?;
        let removed = lock(&self.state).subscribers.remove(&command.sender());
        debug!(
            "{}: {} unsubscribed instance {} ({})",
            self.object_id,
            command.sender(),
            packet.instance_id,
            if removed.is_some() { "subscribed" } else { "unknown" }
        );
        Ok(())
    }
}

pub(crate) fn delta_packet(object_id: &ObjectId, version: Version, delta: &[u8]) -> Vec<u8> {
    let mut packet = OutgoingPacket::for_object(PacketType::Object, CMD_OBJECT_DELTA, object_id);
    packet.write(&version).write_raw(delta);
    packet.finish()
}

fn send_reply(
    node: &LocalNode,
    object_id: &ObjectId,
    receiver: NodeId,
    reply: MapObjectReplyPacket,
) -> Result<(), DispatchError> {
    let mut packet =
        OutgoingPacket::for_object(PacketType::Object, CMD_OBJECT_MAP_REPLY, object_id);
    packet.write(&reply);
    node.send_to(&receiver, packet.finish())
        .map_err(|error| rejected(CMD_OBJECT_MAP_REPLY, error))
}

fn rejected(command: u32, error: impl std::fmt::Display) -> DispatchError {
    DispatchError::Rejected {
        command,
        reason: error.to_string(),
    }
}

/// Answers a map request for an object this node does not have
pub(crate) fn reply_object_not_found(node: &LocalNode, command: &Command) {
    let (Some(object_id), Ok(request)) = (
        command.object_id(),
        MapObjectPacket::de(&mut command.reader()),
    ) else {
        warn!("Dropping malformed map request {:?}", command);
        return;
    };
    debug!("{}: unknown object requested by {}", object_id, command.sender());
    let reply = MapObjectReplyPacket {
        request_id: request.request_id,
        result: MapResult::NotFound,
        master_instance: INSTANCE_INVALID,
        version: VERSION_INVALID,
        data: None,
    };
    if let Err(error) = send_reply(node, &object_id, command.sender(), reply) {
        warn!("{}", error);
    }
}

/// Master handlers run on `queue`, normally the command thread
pub(crate) fn register_master_commands(
    entry: &ObjectEntry,
    manager: Arc<MasterManager>,
    node: WeakLocalNode,
    queue: &CommandQueue,
) {
    let map_manager = manager.clone();
    entry.dispatcher.register_command(
        CMD_OBJECT_MAP,
        move |command: Command| match node.upgrade() {
            Some(local) => map_manager.handle_map(&local, &command),
            None => Ok(()),
        },
        Some(queue.clone()),
    );

    entry.dispatcher.register_command(
        CMD_OBJECT_UNSUBSCRIBE,
        move |command: Command| manager.handle_unsubscribe(&command),
        Some(queue.clone()),
    );
}
