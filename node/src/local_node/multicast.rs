use log::{debug, info, trace, warn};

use coterie_shared::{
    create_connection, lock, Command, ConnectionDescription, ConnectionError, NodeId,
    OutgoingPacket, PacketType, Serde, MAX_DATAGRAM_SIZE,
};

use super::{receiver, LocalNode, LocalNodeState};
use crate::{
    error::NodeError,
    node::Node,
    packets::{MulticastPacket, CMD_NODE_MULTICAST},
};

impl LocalNode {
    /// Adds a multicast group to join once `listen` is called. The group is
    /// announced to peers; those in the same group receive multicast sends
    /// through it.
    pub fn add_multicast(&self, description: ConnectionDescription) -> Result<(), NodeError> {
        let state = self.state();
        if state != LocalNodeState::Closed {
            return Err(NodeError::AlreadyStarted { state });
        }
        if !description.connection_type.is_multicast() {
            return Err(ConnectionError::InvalidDescription {
                text: description.to_string(),
                reason: "not a multicast group",
            }
            .into());
        }
        lock(&self.inner.multicast_descriptions).push(description);
        Ok(())
    }

    /// Groups the node joins. After `listen`, default groups and ports are
    /// filled in.
    pub fn multicast_descriptions(&self) -> Vec<ConnectionDescription> {
        lock(&self.inner.multicast_descriptions).clone()
    }

    /// Everything peers learn about us in the handshake
    pub(super) fn announced_descriptions(&self) -> Vec<ConnectionDescription> {
        let mut descriptions = self.listener_descriptions();
        descriptions.extend(self.multicast_descriptions());
        descriptions
    }

    pub(super) fn join_multicasts(&self) -> Result<(), NodeError> {
        let descriptions = self.multicast_descriptions();
        let mut joined = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let connection = create_connection(&description);
            connection.connect()?;
            joined.push(connection.description());
            lock(&self.inner.multicasts).push(connection.clone());
            self.inner.connection_set.add_connection(connection);
        }
        *lock(&self.inner.multicast_descriptions) = joined;
        Ok(())
    }

    pub(super) fn leave_multicasts(&self) {
        for connection in lock(&self.inner.multicasts).drain(..) {
            self.inner.connection_set.remove_connection(&connection);
            connection.close();
        }
    }

    /// Lends the peer every group it announced that we joined too
    pub(super) fn share_multicasts(&self, peer: &Node) {
        let announced = peer.descriptions();
        for connection in lock(&self.inner.multicasts).iter() {
            let group = connection.description();
            if announced.iter().any(|other| other.is_same_endpoint(&group)) {
                debug!("Using {} as multicast group for {}", group, peer.id());
                peer.add_multicast(connection.clone());
            }
        }
    }

    /// Sends one packet to several peers. Remote peers that all share a
    /// multicast group with us get it as a single datagram through that
    /// group; otherwise, or when the packet does not fit in a datagram,
    /// every peer gets its own copy. The local node gets it dispatched
    /// directly.
    pub fn send_to_nodes(&self, node_ids: &[NodeId], packet: Vec<u8>) -> Result<(), NodeError> {
        let mut remote = Vec::with_capacity(node_ids.len());
        for node_id in node_ids {
            if *node_id == self.id() {
                self.send_to(node_id, packet.clone())?;
            } else if !remote.contains(node_id) {
                remote.push(*node_id);
            }
        }
        if remote.is_empty() {
            return Ok(());
        }

        if remote.len() > 1 {
            match self.multicast(&remote, &packet) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(error) => warn!("Multicast failed, sending one by one: {}", error),
            }
        }
        for node_id in &remote {
            self.send_to(node_id, packet.clone())?;
        }
        Ok(())
    }

    /// Sends through a group every target is in; false if there is none
    fn multicast(&self, targets: &[NodeId], packet: &[u8]) -> Result<bool, NodeError> {
        let mut peers = Vec::with_capacity(targets.len());
        for node_id in targets {
            match self.inner.nodes.get(node_id).filter(|peer| peer.is_connected()) {
                Some(peer) => peers.push(peer),
                None => return Err(NodeError::NotConnected { node_id: *node_id }),
            }
        }
        let shared = lock(&self.inner.multicasts)
            .iter()
            .find(|connection| {
                let group = connection.description();
                peers.iter().all(|peer| {
                    peer.multicasts()
                        .iter()
                        .any(|other| other.description().is_same_endpoint(&group))
                })
            })
            .cloned();
        let Some(connection) = shared else {
            return Ok(false);
        };

        let mut wrapped = OutgoingPacket::new(PacketType::Node, CMD_NODE_MULTICAST);
        wrapped.write(&MulticastPacket {
            sender: self.id(),
            targets: targets.to_vec(),
            packet: packet.to_vec(),
        });
        let wrapped = wrapped.finish();
        if wrapped.len() > MAX_DATAGRAM_SIZE {
            trace!("{} bytes do not fit a datagram", wrapped.len());
            return Ok(false);
        }
        connection.send(&wrapped)?;
        trace!(
            "multicast {} bytes to {} nodes over {}",
            packet.len(),
            targets.len(),
            connection.description()
        );
        Ok(true)
    }

    /// Unwraps a packet received through a group and dispatches it as if
    /// the sender had sent it directly
    pub(super) fn handle_multicast(&self, command: Command) {
        let multicast = match MulticastPacket::de(&mut command.reader()) {
            Ok(multicast) => multicast,
            Err(error) => {
                warn!("Dropping malformed multicast packet: {}", error);
                return;
            }
        };
        // our own datagrams loop back, and other members' traffic is not ours
        if multicast.sender == self.id() || !multicast.targets.contains(&self.id()) {
            return;
        }
        let known = self
            .inner
            .nodes
            .get(&multicast.sender)
            .is_some_and(|peer| peer.is_connected());
        if !known {
            info!("Dropping multicast from unconnected node {}", multicast.sender);
            return;
        }

        match self
            .inner
            .cache
            .command(multicast.packet, multicast.sender, self.id())
        {
            Ok(inner) => receiver::dispatch_received(self, inner),
            Err(error) => warn!(
                "Dropping malformed packet multicast by {}: {}",
                multicast.sender, error
            ),
        }
    }
}
