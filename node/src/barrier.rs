use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use log::{debug, trace};

use coterie_shared::{
    lock, ByteReader, ByteWrite, Command, DispatchError, Monitor, NodeId, ObjectId,
    OutgoingPacket, PacketType, Serde, SerdeErr, Version,
};

use crate::{
    error::{BarrierError, ObjectError},
    local_node::{LocalNode, WeakLocalNode},
    object::{ChangeType, DirtyBits, Distributable, Object},
    packets::{
        BarrierEnterPacket, BarrierEnterReplyPacket, CMD_BARRIER_ENTER, CMD_BARRIER_ENTER_REPLY,
        TIMEOUT_INDEFINITE,
    },
};

const DIRTY_HEIGHT: DirtyBits = DirtyBits::bit(0);
const DIRTY_MASTER: DirtyBits = DirtyBits::bit(1);

/// Distributed state of a barrier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarrierData {
    height: u32,
    master_id: NodeId,
    dirty: DirtyBits,
}

impl Distributable for BarrierData {
    fn change_type(&self) -> ChangeType {
        ChangeType::Delta
    }

    fn serialize(&self, writer: &mut dyn ByteWrite, dirty: DirtyBits) {
        if dirty.intersects(DIRTY_HEIGHT) {
            self.height.ser(writer);
        }
        if dirty.intersects(DIRTY_MASTER) {
            self.master_id.ser(writer);
        }
    }

    fn deserialize(&mut self, reader: &mut ByteReader, dirty: DirtyBits) -> Result<(), SerdeErr> {
        if dirty.intersects(DIRTY_HEIGHT) {
            self.height = u32::de(reader)?;
        }
        if dirty.intersects(DIRTY_MASTER) {
            self.master_id = NodeId::de(reader)?;
        }
        Ok(())
    }

    fn dirty_bits(&self) -> DirtyBits {
        self.dirty
    }

    fn reset_dirty(&mut self) {
        self.dirty = DirtyBits::NONE;
    }
}

/// Entries of one barrier version
struct EnterRequest {
    nodes: Vec<NodeId>,
    incarnation: u64,
    timeout_ms: u32,
    time: Instant,
}

/// State shared between the barrier and its command handlers
struct BarrierShared {
    object_id: ObjectId,
    local_id: NodeId,
    /// Bumped once per release of the local participant
    leave_notify: Monitor<u64>,
    /// Master only, pending entries keyed by barrier version
    requests: Mutex<BTreeMap<Version, EnterRequest>>,
    version: AtomicU64,
    height: AtomicU32,
}

impl BarrierShared {
    fn version(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    fn handle_enter(&self, node: &LocalNode, command: &Command) -> Result<(), DispatchError> {
        let packet = BarrierEnterPacket::de(&mut command.reader())?;
        let sender = command.sender();
        let version = packet.version;
        let now = Instant::now();
        let mut requests = lock(&self.requests);
        let current = self.version();

        let request_timeout = {
            let request = requests.entry(version).or_insert_with(|| EnterRequest {
                nodes: Vec::new(),
                incarnation: packet.incarnation,
                timeout_ms: packet.timeout_ms,
                time: now,
            });
            request.time = now;

            if request.nodes.is_empty() {
                request.incarnation = packet.incarnation;
                request.timeout_ms = packet.timeout_ms;
            } else if request.timeout_ms != TIMEOUT_INDEFINITE {
                if request.incarnation < packet.incarnation {
                    // entry of a barrier the participant already left
                    drop(requests);
                    return self.notify(node, version, sender);
                } else if request.incarnation != packet.incarnation {
                    // retry after a timeout restarts the round
                    request.nodes.clear();
                    request.incarnation = packet.incarnation;
                    request.timeout_ms = packet.timeout_ms;
                }
            }
            request.nodes.push(sender);
            trace!(
                "{}: {} entered v{}, {} of {}",
                self.object_id,
                sender,
                version,
                request.nodes.len(),
                self.height.load(Ordering::Acquire)
            );
            request.timeout_ms
        };

        if request_timeout != TIMEOUT_INDEFINITE {
            Self::cleanup(&mut requests, now);
        }
        if version > current {
            // parked until a commit reaches this version
            return Ok(());
        }
        if packet.timeout_ms != TIMEOUT_INDEFINITE && version < current {
            drop(requests);
            return self.notify(node, version, sender);
        }
        let released = self.take_complete(&mut requests, version);
        drop(requests);
        for node_id in released {
            self.notify(node, version, node_id)?;
        }
        Ok(())
    }

    /// Removes the entries of `version` once the barrier height is reached
    fn take_complete(
        &self,
        requests: &mut BTreeMap<Version, EnterRequest>,
        version: Version,
    ) -> Vec<NodeId> {
        let height = self.height.load(Ordering::Acquire) as usize;
        let complete = requests
            .get(&version)
            .is_some_and(|request| request.nodes.len() >= height);
        if !complete {
            return Vec::new();
        }
        let Some(request) = requests.remove(&version) else {
            return Vec::new();
        };
        debug!("{}: barrier v{} reached", self.object_id, version);
        let mut nodes = request.nodes;
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Drops one stale round that timed out on its participants
    fn cleanup(requests: &mut BTreeMap<Version, EnterRequest>, now: Instant) {
        if requests.len() < 2 {
            return;
        }
        let stale = requests.iter().find_map(|(version, request)| {
            let expired = request.timeout_ms != TIMEOUT_INDEFINITE
                && now > request.time + Duration::from_millis(u64::from(request.timeout_ms));
            expired.then_some(*version)
        });
        if let Some(version) = stale {
            requests.remove(&version);
        }
    }

    fn notify(
        &self,
        node: &LocalNode,
        version: Version,
        target: NodeId,
    ) -> Result<(), DispatchError> {
        if target == self.local_id {
            self.leave(version);
            return Ok(());
        }
        let mut packet = OutgoingPacket::for_object(
            PacketType::Barrier,
            CMD_BARRIER_ENTER_REPLY,
            &self.object_id,
        );
        packet.write(&BarrierEnterReplyPacket { version });
        node.send_to(&target, packet.finish())
            .map_err(|error| DispatchError::Rejected {
                command: CMD_BARRIER_ENTER_REPLY,
                reason: error.to_string(),
            })
    }

    /// Releases the local participant if the barrier is still at `version`
    fn leave(&self, version: Version) {
        if version == self.version() {
            self.leave_notify.update(|count| *count += 1);
        } else {
            debug!(
                "{}: ignoring release of v{} at v{}",
                self.object_id,
                version,
                self.version()
            );
        }
    }
}

/// Blocks participants until `height` of them entered. The master node
/// counts the entries on its command thread; every participant, the master
/// included, sends its entry there.
pub struct Barrier {
    object: Object<BarrierData>,
    shared: Arc<BarrierShared>,
}

impl Barrier {
    /// Registers a new barrier master on `node`
    pub fn new(node: &LocalNode, height: u32) -> Result<Self, BarrierError> {
        let data = BarrierData {
            height,
            master_id: node.id(),
            dirty: DirtyBits::NONE,
        };
        let object = node.register_object(data)?;
        let barrier = Self::attach(node, object);

        let shared = barrier.shared.clone();
        let weak = node.downgrade();
        barrier.object.register_command(
            CMD_BARRIER_ENTER,
            move |command| with_node(&weak, |local| shared.handle_enter(local, &command)),
            Some(node.command_queue()),
        );
        debug!("{}: new barrier of height {}", barrier.id(), height);
        Ok(barrier)
    }

    /// Maps the barrier `barrier_id` held by `master` at `version`
    pub fn map(
        node: &LocalNode,
        barrier_id: ObjectId,
        master: &NodeId,
        version: Version,
    ) -> Result<Self, BarrierError> {
        let object = node.map_object(barrier_id, version, master, BarrierData::default())?;
        Ok(Self::attach(node, object))
    }

    fn attach(node: &LocalNode, object: Object<BarrierData>) -> Self {
        let shared = Arc::new(BarrierShared {
            object_id: object.id(),
            local_id: node.id(),
            leave_notify: Monitor::new(0),
            requests: Mutex::new(BTreeMap::new()),
            version: AtomicU64::new(object.version()),
            height: AtomicU32::new(object.height),
        });

        let reply_shared = shared.clone();
        object.register_command(
            CMD_BARRIER_ENTER_REPLY,
            move |command| {
                let reply = BarrierEnterReplyPacket::de(&mut command.reader())?;
                reply_shared.leave(reply.version);
                Ok(())
            },
            Some(node.command_queue()),
        );
        Self { object, shared }
    }

    pub fn id(&self) -> ObjectId {
        self.object.id()
    }

    pub fn height(&self) -> u32 {
        self.object.height
    }

    pub fn master_node(&self) -> NodeId {
        self.object.master_id
    }

    pub fn version(&self) -> Version {
        self.object.version()
    }

    pub fn is_master(&self) -> bool {
        self.object.is_master()
    }

    /// Changes the height, effective for entries of the next committed
    /// version
    pub fn set_height(&mut self, height: u32) {
        self.object.height = height;
        self.object.dirty |= DIRTY_HEIGHT;
    }

    pub fn commit(&mut self) -> Result<Version, BarrierError> {
        let version = self.object.commit()?;
        let node = self.object.local_node().clone();

        let mut requests = lock(&self.shared.requests);
        self.shared.version.store(version, Ordering::Release);
        self.shared.height.store(self.object.height, Ordering::Release);
        // entries parked for this version may be complete already
        let released = self.shared.take_complete(&mut requests, version);
        drop(requests);
        for node_id in released {
            if let Err(error) = self.shared.notify(&node, version, node_id) {
                debug!("{}: {}", self.id(), error);
            }
        }
        Ok(version)
    }

    pub fn sync(&mut self, version: Version) -> Result<Version, BarrierError> {
        let version = self.object.sync(version)?;
        self.shared.version.store(version, Ordering::Release);
        self.shared.height.store(self.object.height, Ordering::Release);
        Ok(version)
    }

    /// Blocks until `height` participants entered this version
    pub fn enter(&self) -> Result<(), BarrierError> {
        self.enter_with(None)
    }

    /// As `enter`, giving up after `timeout`. A retry after a timeout
    /// starts a new round on the master.
    pub fn enter_timeout(&self, timeout: Duration) -> Result<(), BarrierError> {
        self.enter_with(Some(timeout))
    }

    fn enter_with(&self, timeout: Option<Duration>) -> Result<(), BarrierError> {
        let height = self.object.height;
        debug_assert!(height > 0);
        if height <= 1 {
            return Ok(());
        }
        if !self.object.is_attached() {
            return Err(ObjectError::NotMapped {
                object_id: self.id(),
            }
            .into());
        }
        let version = self.object.version();
        let master = self.object.master_node();
        let incarnation = self.shared.leave_notify.get();
        let timeout_ms = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis())
                .unwrap_or(TIMEOUT_INDEFINITE - 1)
                .min(TIMEOUT_INDEFINITE - 1),
            None => TIMEOUT_INDEFINITE,
        };
        trace!("{}: enter v{}, height {}", self.id(), version, height);

        let mut packet =
            OutgoingPacket::for_object(PacketType::Barrier, CMD_BARRIER_ENTER, &self.id());
        packet.write(&BarrierEnterPacket {
            version,
            incarnation,
            timeout_ms,
        });
        self.object
            .local_node()
            .send_to(&master, packet.finish())
            .map_err(|source| BarrierError::MasterUnreachable {
                node_id: master,
                source,
            })?;

        if !self.shared.leave_notify.wait_eq(&(incarnation + 1), timeout) {
            return Err(BarrierError::Timeout {
                object_id: self.id(),
                version,
            });
        }
        trace!("{}: left v{}", self.id(), version);
        Ok(())
    }
}

impl std::fmt::Debug for Barrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Barrier")
            .field("id", &self.id())
            .field("height", &self.height())
            .field("version", &self.version())
            .finish()
    }
}

fn with_node<F>(node: &WeakLocalNode, handler: F) -> Result<(), DispatchError>
where
    F: FnOnce(&LocalNode) -> Result<(), DispatchError>,
{
    match node.upgrade() {
        Some(local) => handler(&local),
        None => Ok(()),
    }
}
