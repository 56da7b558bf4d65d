use std::sync::RwLock;

use log::trace;

use coterie_shared::{
    read, write, ConnectionDescription, ConnectionPtr, NodeId, NodeType, NODETYPE_NODE,
};

use crate::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Closed,
    Connecting,
    Connected,
}

/// A remote peer as seen by the local node
pub struct Node {
    pub(crate) id: NodeId,
    node_type: NodeType,
    state: RwLock<NodeState>,
    connection: RwLock<Option<ConnectionPtr>>,
    multicasts: RwLock<Vec<ConnectionPtr>>,
    descriptions: RwLock<Vec<ConnectionDescription>>,
}

impl Node {
    /// An unconnected peer of the given type, as returned by a `NodeFactory`
    pub fn new(node_type: NodeType) -> Self {
        Self {
            id: NodeId::ZERO,
            node_type,
            state: RwLock::new(NodeState::Closed),
            connection: RwLock::new(None),
            multicasts: RwLock::new(Vec::new()),
            descriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn state(&self) -> NodeState {
        *read(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state() == NodeState::Closed
    }

    /// Descriptions the peer listens on, as announced in its handshake
    pub fn descriptions(&self) -> Vec<ConnectionDescription> {
        read(&self.descriptions).clone()
    }

    pub fn connection(&self) -> Option<ConnectionPtr> {
        read(&self.connection).clone()
    }

    /// Multicast groups the local node shares with the peer. Owned by the
    /// local node; the peer only borrows them.
    pub fn multicasts(&self) -> Vec<ConnectionPtr> {
        read(&self.multicasts).clone()
    }

    /// Sends one complete packet to the peer
    pub fn send(&self, packet: &[u8]) -> Result<(), NodeError> {
        let connection = self
            .connection()
            .filter(|_| self.is_connected())
            .ok_or(NodeError::NotConnected { node_id: self.id })?;
        connection.send(packet)?;
        trace!("sent {} bytes to {}", packet.len(), self.id);
        Ok(())
    }

    pub(crate) fn attach(
        &mut self,
        id: NodeId,
        connection: ConnectionPtr,
        descriptions: Vec<ConnectionDescription>,
    ) {
        self.id = id;
        *write(&self.connection) = Some(connection);
        *write(&self.descriptions) = descriptions;
        *write(&self.state) = NodeState::Connected;
    }

    pub(crate) fn add_multicast(&self, connection: ConnectionPtr) {
        write(&self.multicasts).push(connection);
    }

    /// Marks the peer closed and hands back its connection, once
    pub(crate) fn detach(&self) -> Option<ConnectionPtr> {
        *write(&self.state) = NodeState::Closed;
        write(&self.multicasts).clear();
        write(&self.connection).take()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("type", &self.node_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Decides which remote nodes may connect. Consulted on both ends of a
/// handshake with the peer's node type; `None` refuses the peer.
pub trait NodeFactory: Send + Sync {
    fn create_node(&self, node_type: NodeType) -> Option<Node>;
}

/// Accepts every node type
#[derive(Default)]
pub struct DefaultNodeFactory;

impl NodeFactory for DefaultNodeFactory {
    fn create_node(&self, node_type: NodeType) -> Option<Node> {
        Some(Node::new(node_type))
    }
}

/// Accepts only the listed node types
pub struct NodeTypeFilter {
    accepted: Vec<NodeType>,
}

impl NodeTypeFilter {
    pub fn new(accepted: Vec<NodeType>) -> Self {
        Self { accepted }
    }
}

impl Default for NodeTypeFilter {
    fn default() -> Self {
        Self::new(vec![NODETYPE_NODE])
    }
}

impl NodeFactory for NodeTypeFilter {
    fn create_node(&self, node_type: NodeType) -> Option<Node> {
        self.accepted
            .contains(&node_type)
            .then(|| Node::new(node_type))
    }
}
