use log::{debug, info, warn};

use coterie_shared::{
    create_connection, same_connection, Command, ConnectionDescription, ConnectionPtr,
    DispatchError, NodeId, OutgoingPacket, PacketType, Serde,
};

use super::LocalNode;
use crate::{
    error::NodeError,
    events::NodeEvent,
    node_registry::NodeHandle,
    packets::{
        ConnectResult, NodeConnectPacket, NodeConnectReplyPacket, CMD_NODE_CONNECT,
        CMD_NODE_CONNECT_REPLY,
    },
};

impl LocalNode {
    /// Connects to the node listening at `description`. Connecting to an
    /// already connected peer returns the existing peer.
    pub fn connect(&self, description: &ConnectionDescription) -> Result<NodeHandle, NodeError> {
        self.expect_listening()?;
        let connection = create_connection(description);
        connection.connect()?;
        self.inner.connection_set.add_connection(connection.clone());

        let request_id = self.inner.requests.register();
        let mut packet = OutgoingPacket::new(PacketType::Node, CMD_NODE_CONNECT);
        packet.write(&NodeConnectPacket {
            node_id: self.id(),
            node_type: self.node_type(),
            request_id,
            descriptions: self.announced_descriptions(),
        });
        if let Err(error) = connection.send(&packet.finish()) {
            self.inner.requests.unregister(request_id);
            self.abandon_connection(&connection);
            return Err(error.into());
        }

        let outcome = self
            .inner
            .requests
            .wait::<Result<NodeId, NodeError>>(request_id, self.config().timeout);
        match outcome {
            Ok(Ok(node_id)) => self
                .node(&node_id)
                .ok_or(NodeError::NotConnected { node_id }),
            Ok(Err(NodeError::Refused { .. })) => Err(NodeError::refused(description)),
            Ok(Err(error)) => Err(error),
            Err(_) => {
                self.abandon_connection(&connection);
                Err(NodeError::ConnectTimeout {
                    description: description.to_string(),
                })
            }
        }
    }

    pub(super) fn handle_handshake(
        &self,
        connection: &ConnectionPtr,
        command: Command,
    ) -> Result<(), DispatchError> {
        match command.command() {
            CMD_NODE_CONNECT => self.handle_connect(connection, command),
            CMD_NODE_CONNECT_REPLY => self.handle_connect_reply(connection, command),
            other => Err(DispatchError::UnknownCommand {
                packet_type: PacketType::Node,
                command: other,
            }),
        }
    }

    /// Accepting side: decide, reply, and register the peer on success
    fn handle_connect(
        &self,
        connection: &ConnectionPtr,
        command: Command,
    ) -> Result<(), DispatchError> {
        let request = NodeConnectPacket::de(&mut command.reader())?;
        let peer_id = request.node_id;

        let result = if peer_id == self.id() {
            ConnectResult::SelfConnect
        } else if self
            .inner
            .nodes
            .get(&peer_id)
            .is_some_and(|peer| peer.is_connected())
        {
            ConnectResult::Duplicate
        } else {
            match self.inner.factory.create_node(request.node_type) {
                None => ConnectResult::Refused,
                Some(mut peer) => {
                    peer.attach(peer_id, connection.clone(), request.descriptions);
                    self.share_multicasts(&peer);
                    match self.inner.nodes.insert(peer) {
                        Ok(_) => ConnectResult::Accepted,
                        Err(_) => ConnectResult::Duplicate,
                    }
                }
            }
        };

        let mut reply = OutgoingPacket::new(PacketType::Node, CMD_NODE_CONNECT_REPLY);
        reply.write(&NodeConnectReplyPacket {
            node_id: self.id(),
            node_type: self.node_type(),
            request_id: request.request_id,
            result,
            descriptions: self.announced_descriptions(),
        });
        let sent = connection.send(&reply.finish());

        if result != ConnectResult::Accepted {
            debug!("Rejected node {}: {:?}", peer_id, result);
            self.abandon_connection(connection);
            sent?;
            return Ok(());
        }
        if let Err(error) = sent {
            if let Some(peer) = self.inner.nodes.get(&peer_id) {
                self.drop_peer(&peer);
            }
            return Err(error.into());
        }
        info!("Node {} connected", peer_id);
        self.inner.events.push(NodeEvent::Connected(peer_id));
        Ok(())
    }

    /// Connecting side: register the peer and wake up `connect`
    fn handle_connect_reply(
        &self,
        connection: &ConnectionPtr,
        command: Command,
    ) -> Result<(), DispatchError> {
        let reply = NodeConnectReplyPacket::de(&mut command.reader())?;
        let peer_id = reply.node_id;
        let description = connection.description();

        let outcome = match reply.result {
            ConnectResult::Accepted => match self.inner.factory.create_node(reply.node_type) {
                None => {
                    self.abandon_connection(connection);
                    Err(NodeError::refused(&description))
                }
                Some(mut peer) => {
                    peer.attach(peer_id, connection.clone(), reply.descriptions);
                    self.share_multicasts(&peer);
                    match self.inner.nodes.insert(peer) {
                        Ok(_) => {
                            info!("Connected to node {}", peer_id);
                            self.inner.events.push(NodeEvent::Connected(peer_id));
                        }
                        Err(_) => {
                            // lost a race against the peer connecting to us
                            self.abandon_connection(connection);
                        }
                    }
                    Ok(peer_id)
                }
            },
            ConnectResult::Duplicate => {
                self.abandon_connection(connection);
                let connected = self
                    .inner
                    .nodes
                    .get(&peer_id)
                    .is_some_and(|peer| peer.is_connected());
                if connected {
                    Ok(peer_id)
                } else {
                    Err(NodeError::refused(&description))
                }
            }
            ConnectResult::SelfConnect => {
                self.abandon_connection(connection);
                Err(NodeError::SelfConnect)
            }
            ConnectResult::Refused => {
                self.abandon_connection(connection);
                Err(NodeError::refused(&description))
            }
        };

        if !self.inner.requests.serve(reply.request_id, outcome) {
            warn!("Handshake reply from {} arrived after timeout", peer_id);
            if let Some(peer) = self.inner.nodes.get(&peer_id) {
                if peer
                    .connection()
                    .is_some_and(|own| same_connection(&own, connection))
                {
                    self.drop_peer(&peer);
                }
            }
        }
        Ok(())
    }

    fn abandon_connection(&self, connection: &ConnectionPtr) {
        self.inner.connection_set.remove_connection(connection);
        connection.close();
    }
}
