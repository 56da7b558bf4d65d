mod distributable;
mod master;
mod slave;

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use log::{debug, warn};

use coterie_shared::{
    Command, CommandQueue, DispatchError, Dispatcher, InstanceId, NodeId, ObjectConfig, ObjectId,
    OutgoingPacket, PacketType, RequestId, SerdeErr, Version, INSTANCE_INVALID, VERSION_HEAD,
    VERSION_NONE,
};

pub use distributable::{ChangeType, DirtyBits, Distributable};
pub(crate) use master::reply_object_not_found;

use crate::{
    error::ObjectError,
    instance_cache::CachedInstance,
    local_node::LocalNode,
    packets::{
        InstancePushPacket, MapObjectPacket, MapObjectReplyPacket, MapResult,
        UnsubscribeObjectPacket, CMD_NODE_INSTANCE, CMD_OBJECT_MAP, CMD_OBJECT_UNSUBSCRIBE,
    },
};
use distributable::{decode, encode};
use master::{register_master_commands, MasterManager};
use slave::{register_slave_commands, SlaveManager};

enum ChangeManager {
    Master(Arc<MasterManager>),
    Slave(Arc<SlaveManager>),
}

/// A distributed object attached to a local node, either the master that
/// commits new versions or a slave that syncs to them. Derefs to the
/// wrapped value.
///
/// Dropping the object detaches it from the node.
pub struct Object<T: Distributable> {
    value: T,
    object_id: ObjectId,
    instance_id: InstanceId,
    dispatcher: Arc<Dispatcher>,
    node: LocalNode,
    manager: ChangeManager,
}

impl<T: Distributable> Object<T> {
    pub fn id(&self) -> ObjectId {
        self.object_id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn is_master(&self) -> bool {
        matches!(self.manager, ChangeManager::Master(_))
    }

    pub fn is_attached(&self) -> bool {
        match &self.manager {
            ChangeManager::Master(master) => master.is_attached(),
            ChangeManager::Slave(slave) => slave.is_attached(),
        }
    }

    /// Node holding the master copy
    pub fn master_node(&self) -> NodeId {
        match &self.manager {
            ChangeManager::Master(_) => self.node.id(),
            ChangeManager::Slave(slave) => slave.master(),
        }
    }

    pub fn local_node(&self) -> &LocalNode {
        &self.node
    }

    /// Version currently applied to the value
    pub fn version(&self) -> Version {
        match &self.manager {
            ChangeManager::Master(master) => master.version(),
            ChangeManager::Slave(slave) => slave.version(),
        }
    }

    /// Newest version known locally. Slaves may have received versions
    /// they have not applied yet.
    pub fn head_version(&self) -> Version {
        match &self.manager {
            ChangeManager::Master(master) => master.version(),
            ChangeManager::Slave(slave) => slave.head_version(),
        }
    }

    /// Oldest version a slave can still map, masters only
    pub fn oldest_version(&self) -> Option<Version> {
        match &self.manager {
            ChangeManager::Master(master) => Some(master.oldest_version()),
            ChangeManager::Slave(_) => None,
        }
    }

    /// Publishes the dirty fields as a new version. Without changes the
    /// current version is returned.
    pub fn commit(&mut self) -> Result<Version, ObjectError> {
        let object_id = self.object_id;
        let ChangeManager::Master(master) = &self.manager else {
            return Err(ObjectError::NotMaster { object_id });
        };
        if !master.is_attached() {
            return Err(ObjectError::NotMapped { object_id });
        }
        let change_type = self.value.change_type();
        if change_type == ChangeType::Static {
            return Err(ObjectError::NotVersioned { object_id });
        }
        let dirty = self.value.dirty_bits();
        if dirty.is_empty() {
            return Ok(master.version());
        }

        let instance = encode(&self.value, DirtyBits::ALL);
        let delta = match change_type {
            ChangeType::Delta => encode(&self.value, dirty),
            _ => instance.clone(),
        };
        let version = master.commit(&self.node, delta, instance)?;
        self.value.reset_dirty();
        Ok(version)
    }

    /// Brings a slave to `version`, see `VERSION_HEAD` for applying only
    /// what already arrived. Waits at most the node timeout. Masters
    /// return their head.
    pub fn sync(&mut self, version: Version) -> Result<Version, ObjectError> {
        match &self.manager {
            ChangeManager::Master(master) => {
                if !master.is_attached() {
                    return Err(ObjectError::NotMapped {
                        object_id: self.object_id,
                    });
                }
                Ok(master.version())
            }
            ChangeManager::Slave(slave) => {
                let timeout = self.node.config().timeout;
                slave.sync(&mut self.value, version, timeout)
            }
        }
    }

    /// Applies everything received without waiting
    pub fn sync_head(&mut self) -> Result<Version, ObjectError> {
        self.sync(VERSION_HEAD)
    }

    /// Versions a master keeps in addition to its head for slaves to map
    pub fn set_auto_obsolete(&self, count: u32) -> Result<(), ObjectError> {
        match &self.manager {
            ChangeManager::Master(master) => {
                master.set_auto_obsolete(count);
                Ok(())
            }
            ChangeManager::Slave(_) => Err(ObjectError::NotMaster {
                object_id: self.object_id,
            }),
        }
    }

    /// Sends the head instance data of a master to `nodes`, which keep it
    /// in their instance cache for a later mapping. Nodes sharing a
    /// multicast group get it in one datagram.
    pub fn push(&self, nodes: &[NodeId]) -> Result<Version, ObjectError> {
        let object_id = self.object_id;
        let ChangeManager::Master(master) = &self.manager else {
            return Err(ObjectError::NotMaster { object_id });
        };
        if !master.is_attached() {
            return Err(ObjectError::NotMapped { object_id });
        }
        let (version, data) = master.head_instance();
        let mut packet = OutgoingPacket::new(PacketType::Node, CMD_NODE_INSTANCE);
        packet.write(&InstancePushPacket {
            object_id,
            master_instance: self.instance_id,
            version,
            data,
        });
        self.node.send_to_nodes(nodes, packet.finish())?;
        debug!("{}: pushed version {} to {} nodes", object_id, version, nodes.len());
        Ok(version)
    }

    /// Nodes mapping this master
    pub fn subscribers(&self) -> Vec<NodeId> {
        match &self.manager {
            ChangeManager::Master(master) => master.subscribers(),
            ChangeManager::Slave(_) => Vec::new(),
        }
    }

    /// Detaches a slave from the session and unsubscribes it
    pub fn unmap(&mut self) {
        self.detach();
    }

    /// Detaches a master from the session. Its slaves receive no further
    /// versions.
    pub fn deregister(&mut self) {
        self.detach();
    }

    pub fn into_inner(mut self) -> T
    where
        T: Default,
    {
        self.detach();
        std::mem::take(&mut self.value)
    }

    /// Adds a command handler to this object, run on `queue` or inline on
    /// the receiver thread
    pub(crate) fn register_command<F>(
        &self,
        command: u32,
        handler: F,
        queue: Option<CommandQueue>,
    ) where
        F: Fn(Command) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.dispatcher.register_command(command, handler, queue);
    }

    fn detach(&mut self) {
        let first = match &self.manager {
            ChangeManager::Master(master) => master.detach(),
            ChangeManager::Slave(slave) => slave.detach(),
        };
        if !first {
            return;
        }
        self.node.session().detach(&self.object_id);

        if let ChangeManager::Slave(slave) = &self.manager {
            let mut packet = OutgoingPacket::for_object(
                PacketType::Object,
                CMD_OBJECT_UNSUBSCRIBE,
                &self.object_id,
            );
            packet.write(&UnsubscribeObjectPacket {
                instance_id: self.instance_id,
            });
            if let Err(error) = self.node.send_to(&slave.master(), packet.finish()) {
                debug!("{}: could not unsubscribe: {}", self.object_id, error);
            }
        }
        debug!("{}: detached instance {}", self.object_id, self.instance_id);
    }
}

impl<T: Distributable> Deref for Object<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Distributable> DerefMut for Object<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

impl<T: Distributable> Drop for Object<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T: Distributable + std::fmt::Debug> std::fmt::Debug for Object<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.object_id)
            .field("master", &self.is_master())
            .field("version", &self.version())
            .field("value", &self.value)
            .finish()
    }
}

/// A map request in flight, completed by `LocalNode::map_object_sync`.
/// Dropping it abandons the mapping.
pub struct MapRequest<T: Distributable> {
    object: Object<T>,
    request_id: RequestId,
    version: Version,
    /// Held so the cache cannot drop the data before the reply arrives
    cached: Option<CachedInstance>,
}

impl<T: Distributable> MapRequest<T> {
    pub fn object_id(&self) -> ObjectId {
        self.object.object_id
    }
}

impl LocalNode {
    /// Registers `value` as a master under a fresh id at version 0
    pub fn register_object<T: Distributable>(&self, value: T) -> Result<Object<T>, ObjectError> {
        self.register_object_with_id(ObjectId::generate(), value)
    }

    pub fn register_object_with_id<T: Distributable>(
        &self,
        object_id: ObjectId,
        value: T,
    ) -> Result<Object<T>, ObjectError> {
        self.register_object_with_config(object_id, value, &ObjectConfig::default())
    }

    pub fn register_object_with_config<T: Distributable>(
        &self,
        object_id: ObjectId,
        mut value: T,
        config: &ObjectConfig,
    ) -> Result<Object<T>, ObjectError> {
        let entry = self
            .session()
            .attach(object_id, true)
            .ok_or(ObjectError::AlreadyRegistered { object_id })?;
        let manager = Arc::new(MasterManager::new(
            object_id,
            entry.instance_id,
            encode(&value, DirtyBits::ALL),
            config,
        ));
        value.reset_dirty();
        register_master_commands(&entry, manager.clone(), self.downgrade(), &self.command_queue());
        debug!("{}: registered master instance {}", object_id, entry.instance_id);

        Ok(Object {
            value,
            object_id,
            instance_id: entry.instance_id,
            dispatcher: entry.dispatcher,
            node: self.clone(),
            manager: ChangeManager::Master(manager),
        })
    }

    /// Starts mapping the object `object_id` held by `master` at `version`
    /// (`VERSION_HEAD`, `VERSION_OLDEST` or a retained version). `value` is
    /// overwritten with the instance data once the mapping completes.
    pub fn map_object_nb<T: Distributable>(
        &self,
        object_id: ObjectId,
        version: Version,
        master: &NodeId,
        value: T,
    ) -> Result<MapRequest<T>, ObjectError> {
        self.expect_listening()?;
        if *master == self.id() {
            return Err(ObjectError::AlreadyRegistered { object_id });
        }
        let entry = self
            .session()
            .attach(object_id, false)
            .ok_or(ObjectError::AlreadyRegistered { object_id })?;
        let manager = Arc::new(SlaveManager::new(
            object_id,
            *master,
            self.config().max_buffered_versions,
        ));
        let cache_commits = value.change_type() == ChangeType::Instance;
        register_slave_commands(&entry, manager.clone(), self.downgrade(), cache_commits);

        let object = Object {
            value,
            object_id,
            instance_id: entry.instance_id,
            dispatcher: entry.dispatcher,
            node: self.clone(),
            manager: ChangeManager::Slave(manager),
        };

        let cached = self
            .instance_cache()
            .get(&object_id)
            .filter(|cached| cached.from == *master);
        let (cached_instance, cached_first, cached_last) = cached
            .as_ref()
            .and_then(|cached| {
                let (first, last) = cached.first_version().zip(cached.last_version())?;
                Some((cached.master_instance, first, last))
            })
            .unwrap_or((INSTANCE_INVALID, VERSION_NONE, VERSION_NONE));

        let request_id = self.requests().register();
        let mut packet = OutgoingPacket::for_object(PacketType::Object, CMD_OBJECT_MAP, &object_id);
        packet.write(&MapObjectPacket {
            request_id,
            version,
            instance_id: object.instance_id,
            cached_instance,
            cached_first,
            cached_last,
        });
        if let Err(error) = self.send_to(master, packet.finish()) {
            self.requests().unregister(request_id);
            return Err(error.into());
        }
        Ok(MapRequest {
            object,
            request_id,
            version,
            cached,
        })
    }

    /// Waits for the master's reply and applies the mapped version
    pub fn map_object_sync<T: Distributable>(
        &self,
        request: MapRequest<T>,
    ) -> Result<Object<T>, ObjectError> {
        let MapRequest {
            mut object,
            request_id,
            version: requested,
            cached,
        } = request;
        let object_id = object.object_id;
        let reply = self
            .requests()
            .wait::<MapObjectReplyPacket>(request_id, self.config().timeout)
            .map_err(|_| ObjectError::MapTimeout { object_id })?;

        match reply.result {
            MapResult::Mapped => {
                match reply.data {
                    Some(data) => {
                        decode(&mut object.value, &data)?;
                        let master = object.master_node();
                        self.instance_cache().add(
                            object_id,
                            master,
                            reply.master_instance,
                            reply.version,
                            data,
                        );
                    }
                    None => {
                        let data = cached
                            .as_ref()
                            .and_then(|cached| cached.get(reply.version))
                            .ok_or(SerdeErr::InvalidValue {
                                type_name: "instance data",
                            })?;
                        decode(&mut object.value, data)?;
                        self.instance_cache().record_hit();
                        debug!(
                            "{}: version {} taken from the instance cache",
                            object_id, reply.version
                        );
                    }
                }
                if let ChangeManager::Slave(slave) = &object.manager {
                    slave.init(reply.version, reply.master_instance);
                }
                debug!("{}: mapped at version {}", object_id, reply.version);
                Ok(object)
            }
            MapResult::NotFound => {
                warn!("{}: master {} does not know the object", object_id, object.master_node());
                Err(ObjectError::NotFound { object_id })
            }
            MapResult::VersionUnavailable => Err(ObjectError::VersionUnavailable {
                object_id,
                version: requested,
            }),
        }
    }

    pub fn map_object<T: Distributable>(
        &self,
        object_id: ObjectId,
        version: Version,
        master: &NodeId,
        value: T,
    ) -> Result<Object<T>, ObjectError> {
        let request = self.map_object_nb(object_id, version, master, value)?;
        self.map_object_sync(request)
    }
}
