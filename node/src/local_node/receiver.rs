use log::{debug, error, info, trace, warn};

use coterie_shared::{
    same_connection, Command, ConnectionError, ConnectionPtr, ConnectionSetEvent, DispatchError,
    NodeId, PacketHeader, PacketType,
};

use super::{LocalNode, LocalNodeState};
use crate::{
    object::reply_object_not_found,
    packets::{CMD_NODE_CONNECT, CMD_NODE_CONNECT_REPLY, CMD_NODE_MULTICAST, CMD_OBJECT_MAP},
};

/// Body of the receiver thread. Waits on every connection of the node,
/// accepts peers, reads packets and hands them to the dispatchers until
/// the node stops listening.
pub(crate) fn run(node: LocalNode) {
    info!("Receiver of node {} started", node.id());
    let select_timeout = node.config().select_timeout;
    let max_errors = node.config().max_select_errors;
    let mut failing: Option<(ConnectionPtr, u32)> = None;
    let mut select_errors = 0u32;

    while node.state() == LocalNodeState::Listening {
        match node.inner.connection_set.select(Some(select_timeout)) {
            ConnectionSetEvent::Connect(listener) => accept(&node, &listener),
            ConnectionSetEvent::Data(connection) => {
                if let Err(error) = receive(&node, &connection) {
                    let description = connection.description();
                    let usable = match error {
                        DispatchError::Connection(ConnectionError::Closed) => {
                            debug!("{} closed by peer", description);
                            false
                        }
                        // datagrams are independent, a bad one leaves the group usable
                        error if description.connection_type.is_multicast() => {
                            warn!("Dropping datagram on {}: {}", description, error);
                            true
                        }
                        error => {
                            warn!("Dropping connection {}: {}", description, error);
                            false
                        }
                    };
                    if !usable {
                        disconnect(&node, &connection);
                    }
                }
                failing = None;
                select_errors = 0;
            }
            ConnectionSetEvent::Disconnect(connection)
            | ConnectionSetEvent::InvalidHandle(connection) => disconnect(&node, &connection),
            ConnectionSetEvent::Error(connection) => {
                let count = match failing.take() {
                    Some((previous, count)) if same_connection(&previous, &connection) => count + 1,
                    _ => 1,
                };
                if count >= max_errors {
                    warn!(
                        "Dropping connection {} after {} errors",
                        connection.description(),
                        count
                    );
                    disconnect(&node, &connection);
                } else {
                    failing = Some((connection, count));
                }
            }
            ConnectionSetEvent::Interrupt | ConnectionSetEvent::Timeout => {}
            ConnectionSetEvent::SelectError => {
                select_errors += 1;
                error!("Select failed {} times in a row", select_errors);
                if select_errors >= max_errors {
                    std::thread::sleep(select_timeout);
                }
            }
        }
    }
    info!("Receiver of node {} stopped", node.id());
}

fn accept(node: &LocalNode, listener: &ConnectionPtr) {
    if let Err(error) = listener.accept_nb() {
        warn!("Accept on {} failed: {}", listener.description(), error);
        return;
    }
    match listener.accept_sync() {
        Some(connection) => {
            debug!("Accepted connection {}", connection.description());
            node.inner.connection_set.add_connection(connection);
        }
        None => warn!("Accept on {} failed", listener.description()),
    }
}

/// Reads one packet. Errors leave the stream unusable; malformed packets
/// are dropped without one.
fn receive(node: &LocalNode, connection: &ConnectionPtr) -> Result<(), DispatchError> {
    let mut size_bytes = [0u8; 8];
    connection.recv_into(&mut size_bytes)?;
    let size = u64::from_le_bytes(size_bytes);
    PacketHeader::check_size(size)?;

    let mut buffer = node.inner.cache.alloc(size as usize);
    buffer[..8].copy_from_slice(&size_bytes);
    connection.recv_into(&mut buffer[8..])?;

    let sender = node
        .inner
        .nodes
        .find_by_connection(connection)
        .map(|peer| peer.id())
        .unwrap_or(NodeId::ZERO);
    // the whole packet was read, so the stream stays framed
    let command = match node.inner.cache.command(buffer, sender, node.id()) {
        Ok(command) => command,
        Err(error) => {
            warn!(
                "Dropping malformed packet of {} bytes from {}: {}",
                size,
                connection.description(),
                error
            );
            return Ok(());
        }
    };
    trace!("received {:?}", command);

    if command.packet_type() == PacketType::Node
        && matches!(command.command(), CMD_NODE_CONNECT | CMD_NODE_CONNECT_REPLY)
    {
        if let Err(error) = node.handle_handshake(connection, command) {
            warn!("Handshake on {} failed: {}", connection.description(), error);
        }
        return Ok(());
    }
    if command.packet_type() == PacketType::Node && command.command() == CMD_NODE_MULTICAST {
        node.handle_multicast(command);
        return Ok(());
    }
    if sender.is_zero() {
        warn!("Dropping {:?} from a connection without handshake", command);
        return Ok(());
    }
    dispatch_received(node, command);
    Ok(())
}

/// Dispatches a command from a connected peer or the local node, logging
/// what cannot be handled
pub(crate) fn dispatch_received(node: &LocalNode, command: Command) {
    let received = command.clone();
    match node.dispatch_command(command) {
        Ok(()) => {}
        Err(DispatchError::UnknownObject {
            command: CMD_OBJECT_MAP,
            ..
        }) if received.packet_type() == PacketType::Object => {
            reply_object_not_found(node, &received)
        }
        Err(error) => warn!("Dropping {:?}: {}", received, error),
    }
}

fn disconnect(node: &LocalNode, connection: &ConnectionPtr) {
    match node.inner.nodes.find_by_connection(connection) {
        Some(peer) => node.drop_peer(&peer),
        None => {
            node.inner.connection_set.remove_connection(connection);
            connection.close();
        }
    }
}
