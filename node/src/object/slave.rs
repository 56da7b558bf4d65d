use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use log::{debug, trace, warn};

use coterie_shared::{
    is_concrete_version, lock, wait_until, Command, InstanceId, NodeId, ObjectId, Serde,
    Version, VersionList, VersionListError, INSTANCE_INVALID, VERSION_HEAD, VERSION_NONE,
};

use super::distributable::{decode, Distributable};
use crate::{
    error::ObjectError,
    local_node::WeakLocalNode,
    packets::{MapObjectReplyPacket, CMD_OBJECT_DELTA, CMD_OBJECT_MAP_REPLY},
    session::ObjectEntry,
};

struct SlaveState {
    /// Applied version, `VERSION_NONE` until the map reply is applied
    version: Version,
    /// Instance of the master object, `INSTANCE_INVALID` until mapped
    master_instance: InstanceId,
    received: VersionList<Vec<u8>>,
    out_of_sync: bool,
    attached: bool,
}

/// Version bookkeeping of a mapped slave. Deltas are buffered by the
/// receiver thread and applied by the application thread in `sync`.
pub(crate) struct SlaveManager {
    object_id: ObjectId,
    master: NodeId,
    state: Mutex<SlaveState>,
    changed: Condvar,
}

impl SlaveManager {
    pub fn new(object_id: ObjectId, master: NodeId, max_buffered: usize) -> Self {
        Self {
            object_id,
            master,
            state: Mutex::new(SlaveState {
                version: VERSION_NONE,
                master_instance: INSTANCE_INVALID,
                received: VersionList::bounded(max_buffered),
                out_of_sync: false,
                attached: true,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn master(&self) -> NodeId {
        self.master
    }

    pub fn version(&self) -> Version {
        lock(&self.state).version
    }

    /// Newest version received, applied or not
    pub fn head_version(&self) -> Version {
        let state = lock(&self.state);
        match state.received.last_version() {
            Some(last) if state.version == VERSION_NONE || last > state.version => last,
            _ => state.version,
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).attached
    }

    pub fn master_instance(&self) -> InstanceId {
        lock(&self.state).master_instance
    }

    /// Applies the mapped version, dropping buffered deltas it covers
    pub fn init(&self, version: Version, master_instance: InstanceId) {
        let mut state = lock(&self.state);
        state.version = version;
        state.master_instance = master_instance;
        let stale = state.received.remove_before(version.saturating_add(1));
        if stale > 0 {
            trace!("{}: dropped {} deltas covered by version {}", self.object_id, stale, version);
        }
        self.changed.notify_all();
    }

    pub fn add_delta(&self, version: Version, payload: Vec<u8>) {
        let mut state = lock(&self.state);
        if state.version != VERSION_NONE && version <= state.version {
            debug!("{}: ignoring old delta {}", self.object_id, version);
            return;
        }
        match state.received.try_insert(version, payload) {
            Ok(()) => {}
            Err(VersionListError::DuplicateVersion { .. }) => {
                debug!("{}: ignoring duplicate delta {}", self.object_id, version);
            }
            Err(VersionListError::Full { capacity, .. }) => {
                if !state.out_of_sync {
                    warn!(
                        "{}: {} deltas buffered, dropping version {}",
                        self.object_id, capacity, version
                    );
                }
                state.out_of_sync = true;
            }
        }
        self.changed.notify_all();
    }

    /// Marks the slave detached, waking blocked syncs. True the first time.
    pub fn detach(&self) -> bool {
        let mut state = lock(&self.state);
        let was_attached = state.attached;
        state.attached = false;
        self.changed.notify_all();
        was_attached
    }

    /// Applies buffered deltas in order until `version` is reached, waiting
    /// up to `timeout` for missing ones. `VERSION_HEAD` applies what is
    /// already there and never waits.
    pub fn sync<T: Distributable>(
        &self,
        value: &mut T,
        version: Version,
        timeout: Option<Duration>,
    ) -> Result<Version, ObjectError> {
        let object_id = self.object_id;
        let mut state = lock(&self.state);
        if !state.attached {
            return Err(ObjectError::NotMapped { object_id });
        }
        if version == VERSION_HEAD {
            Self::apply_ready(object_id, &mut state, value, VERSION_HEAD)?;
            if state.out_of_sync {
                return Err(ObjectError::VersionGap {
                    object_id,
                    version: state.version + 1,
                });
            }
            return Ok(state.version);
        }
        if !is_concrete_version(version) {
            return Err(ObjectError::InvalidVersion { version });
        }
        if version < state.version {
            return Err(ObjectError::VersionRegression {
                object_id,
                current: state.version,
                requested: version,
            });
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            Self::apply_ready(object_id, &mut state, value, version)?;
            if state.version >= version {
                return Ok(state.version);
            }
            if !state.attached {
                return Err(ObjectError::NotMapped { object_id });
            }
            if state.out_of_sync {
                return Err(ObjectError::VersionGap {
                    object_id,
                    version: state.version + 1,
                });
            }

            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) => Some(remaining),
                    None => return Err(ObjectError::SyncTimeout { object_id, version }),
                },
                None => None,
            };
            let (guard, _) = wait_until(&self.changed, state, remaining, |state| {
                !state.attached
                    || state.out_of_sync
                    || state.received.first_version() == Some(state.version + 1)
            });
            state = guard;
        }
    }

    fn apply_ready<T: Distributable>(
        object_id: ObjectId,
        state: &mut SlaveState,
        value: &mut T,
        limit: Version,
    ) -> Result<(), ObjectError> {
        while state.version < limit {
            let Some((version, payload)) = state.received.front() else {
                break;
            };
            let version = *version;
            if version != state.version + 1 {
                break;
            }
            let result = decode(value, payload);
            state.received.pop_front();
            if let Err(error) = result {
                // the version is lost and `value` may be partly written
                warn!("{}: malformed delta {}: {}", object_id, version, error);
                state.out_of_sync = true;
                return Err(error.into());
            }
            state.version = version;
        }
        Ok(())
    }
}

/// Slave handlers run on the receiver thread. Commits of instance objects
/// carry complete instance data, which also goes to the instance cache.
pub(crate) fn register_slave_commands(
    entry: &ObjectEntry,
    manager: Arc<SlaveManager>,
    node: WeakLocalNode,
    cache_commits: bool,
) {
    let delta_node = node.clone();
    entry.dispatcher.register_command(
        CMD_OBJECT_DELTA,
        move |command: Command| {
            let mut reader = command.reader();
            let version = Version::de(&mut reader)?;
            let payload = reader.rest().to_vec();
            let master_instance = manager.master_instance();
            if cache_commits && master_instance != INSTANCE_INVALID {
                if let Some(local) = delta_node.upgrade() {
                    local.instance_cache().add(
                        manager.object_id,
                        manager.master,
                        master_instance,
                        version,
                        payload.clone(),
                    );
                }
            }
            manager.add_delta(version, payload);
            Ok(())
        },
        None,
    );

    entry.dispatcher.register_command(
        CMD_OBJECT_MAP_REPLY,
        move |command: Command| {
            let reply = MapObjectReplyPacket::de(&mut command.reader())?;
            if let Some(local) = node.upgrade() {
                local.requests().serve(reply.request_id, reply);
            }
            Ok(())
        },
        None,
    );
}
