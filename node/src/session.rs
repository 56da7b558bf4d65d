use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, RwLock,
    },
};

use coterie_shared::{
    read, write, Command, DispatchError, Dispatcher, InstanceId, ObjectId, INSTANCE_INVALID,
};

/// One object attached to the local node
#[derive(Clone)]
pub struct ObjectEntry {
    pub instance_id: InstanceId,
    pub is_master: bool,
    pub dispatcher: Arc<Dispatcher>,
}

/// Objects attached to a local node, keyed by object id. Routes every
/// object-family command to the dispatcher of the addressed object.
pub struct Session {
    entries: RwLock<HashMap<ObjectId, ObjectEntry>>,
    next_instance: AtomicU32,
}

impl Session {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_instance: AtomicU32::new(0),
        }
    }

    /// Attaches an object, returning its entry. `None` if the id is taken.
    pub fn attach(&self, object_id: ObjectId, is_master: bool) -> Option<ObjectEntry> {
        let mut entries = write(&self.entries);
        if entries.contains_key(&object_id) {
            return None;
        }
        let entry = ObjectEntry {
            instance_id: self.next_instance_id(),
            is_master,
            dispatcher: Arc::new(Dispatcher::new()),
        };
        entries.insert(object_id, entry.clone());
        Some(entry)
    }

    pub fn detach(&self, object_id: &ObjectId) -> bool {
        write(&self.entries).remove(object_id).is_some()
    }

    pub fn get(&self, object_id: &ObjectId) -> Option<ObjectEntry> {
        read(&self.entries).get(object_id).cloned()
    }

    pub fn contains(&self, object_id: &ObjectId) -> bool {
        read(&self.entries).contains_key(object_id)
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = read(&self.entries)
            .values()
            .map(|entry| entry.instance_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        let object_id = command
            .object_id()
            .ok_or(DispatchError::UnknownCommand {
                packet_type: command.packet_type(),
                command: command.command(),
            })?;
        // clone out so handlers may attach or detach objects
        let entry = self
            .get(&object_id)
            .ok_or(DispatchError::UnknownObject {
                object_id,
                command: command.command(),
            })?;
        entry.dispatcher.dispatch(command)
    }

    fn next_instance_id(&self) -> InstanceId {
        loop {
            let id = self.next_instance.fetch_add(1, Ordering::Relaxed);
            if id != INSTANCE_INVALID {
                return id;
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coterie_shared::{CommandCache, NodeId, OutgoingPacket, PacketType};
    use std::sync::atomic::AtomicBool;

    #[test]
    fn attach_is_unique_per_id() {
        let session = Session::new();
        let id = ObjectId::new(1, 2);
        let first = session.attach(id, true).unwrap();
        assert!(session.attach(id, false).is_none());

        let other = session.attach(ObjectId::new(3, 4), false).unwrap();
        assert_ne!(first.instance_id, other.instance_id);
        assert_eq!(session.len(), 2);

        assert!(session.detach(&id));
        assert!(!session.detach(&id));
        assert!(!session.contains(&id));
    }

    #[test]
    fn routes_by_object_id() {
        let session = Session::new();
        let cache = CommandCache::new(4);
        let id = ObjectId::new(5, 6);
        let entry = session.attach(id, true).unwrap();
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        entry.dispatcher.register_command(
            9,
            move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            None,
        );

        let bytes = OutgoingPacket::for_object(PacketType::Object, 9, &id).finish();
        let command = cache.command(bytes, NodeId::ZERO, NodeId::ZERO).unwrap();
        session.dispatch(command).unwrap();
        assert!(called.load(Ordering::SeqCst));

        let bytes =
            OutgoingPacket::for_object(PacketType::Object, 9, &ObjectId::new(7, 7)).finish();
        let command = cache.command(bytes, NodeId::ZERO, NodeId::ZERO).unwrap();
        assert!(matches!(
            session.dispatch(command),
            Err(DispatchError::UnknownObject { .. })
        ));
    }
}
