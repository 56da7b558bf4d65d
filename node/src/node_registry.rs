use std::{
    collections::HashMap,
    ops::Deref,
    sync::{Arc, Mutex, Weak},
};

use log::debug;

use coterie_shared::{lock, same_connection, ConnectionPtr, NodeId};

use crate::node::Node;

struct Slot {
    node: Arc<Node>,
    pins: usize,
}

type Slots = Mutex<HashMap<NodeId, Slot>>;

/// Arena of known peers keyed by node id. A pinned node stays in the
/// registry after it closes until its last handle is released.
#[derive(Clone)]
pub struct NodeRegistry {
    slots: Arc<Slots>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds a connected peer. Fails, returning the node back, if a peer
    /// with the same id is already connected.
    pub fn insert(&self, node: Node) -> Result<NodeHandle, Node> {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(&node.id) {
            if !slot.node.is_closed() {
                return Err(node);
            }
        }
        let node = Arc::new(node);
        slots.insert(
            node.id,
            Slot {
                node: node.clone(),
                pins: 1,
            },
        );
        Ok(NodeHandle {
            node,
            slots: Arc::downgrade(&self.slots),
        })
    }

    /// Pins the node so it stays reachable through the handle
    pub fn pin(&self, id: &NodeId) -> Option<NodeHandle> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(id)?;
        slot.pins += 1;
        Some(NodeHandle {
            node: slot.node.clone(),
            slots: Arc::downgrade(&self.slots),
        })
    }

    /// Releases a handle. Dropping the handle does the same.
    pub fn release(&self, handle: NodeHandle) {
        drop(handle);
    }

    /// Connected peer owning `connection`
    pub fn find_by_connection(&self, connection: &ConnectionPtr) -> Option<Arc<Node>> {
        lock(&self.slots)
            .values()
            .find(|slot| {
                slot.node
                    .connection()
                    .is_some_and(|other| same_connection(&other, connection))
            })
            .map(|slot| slot.node.clone())
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<Node>> {
        lock(&self.slots).get(id).map(|slot| slot.node.clone())
    }

    /// Ids of every connected peer
    pub fn connected(&self) -> Vec<NodeId> {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.node.is_connected())
            .map(|slot| slot.node.id())
            .collect()
    }

    /// Evicts `id` if it is closed and unpinned
    pub fn evict_if_unused(&self, id: &NodeId) {
        evict_if_unused(&self.slots, id);
    }

    /// Closes every peer, returning their connections
    pub fn close_all(&self) -> Vec<(NodeId, ConnectionPtr)> {
        let mut slots = lock(&self.slots);
        let connections = slots
            .values()
            .filter_map(|slot| slot.node.detach().map(|connection| (slot.node.id(), connection)))
            .collect();
        slots.retain(|_, slot| slot.pins > 0);
        connections
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn evict_if_unused(slots: &Slots, id: &NodeId) {
    let mut slots = lock(slots);
    if let Some(slot) = slots.get(id) {
        if slot.pins == 0 && slot.node.is_closed() {
            debug!("evicting node {}", id);
            slots.remove(id);
        }
    }
}

/// A pinned peer. Dereferences to the `Node`.
pub struct NodeHandle {
    node: Arc<Node>,
    slots: Weak<Slots>,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Deref for NodeHandle {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Clone for NodeHandle {
    fn clone(&self) -> Self {
        if let Some(slots) = self.slots.upgrade() {
            if let Some(slot) = lock(&slots).get_mut(&self.node.id()) {
                slot.pins += 1;
            }
        }
        Self {
            node: self.node.clone(),
            slots: self.slots.clone(),
        }
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let id = self.node.id();
        {
            let mut guard = lock(&slots);
            match guard.get_mut(&id) {
                // the slot may belong to a newer node reusing the id
                Some(slot) if Arc::ptr_eq(&slot.node, &self.node) => {
                    slot.pins = slot.pins.saturating_sub(1);
                }
                _ => return,
            }
        }
        evict_if_unused(&slots, &id);
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.node.fmt(f)
    }
}
