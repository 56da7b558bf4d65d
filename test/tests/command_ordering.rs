/// Commands from one peer are handled in the order they were sent, on the
/// receiver thread, the command thread or a dedicated worker
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use coterie_node::{NodeError, ERROR_NODE_PACKET_TYPE};
use coterie_shared::{CommandQueue, OutgoingPacket, PacketType, Serde, PACKETTYPE_CUSTOM};
use coterie_test::{assert_error_code, connected_pair, wait_for, TestNode};

const PACKET_COUNT: u32 = 500;
const SEQUENCE: u32 = 1;

fn record_sequence(
    node: &TestNode,
    packet_type: u32,
    queue: Option<CommandQueue>,
) -> Arc<Mutex<Vec<u32>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    node.register_custom_command(
        packet_type,
        SEQUENCE,
        move |command| {
            let value = u32::de(&mut command.reader())?;
            sink.lock().unwrap().push(value);
            Ok(())
        },
        queue,
    )
    .unwrap();
    received
}

fn send_sequence(sender: &TestNode, receiver: &coterie_shared::NodeId, packet_type: u32) {
    for value in 0..PACKET_COUNT {
        let mut packet = OutgoingPacket::new(PacketType::Custom(packet_type), SEQUENCE);
        packet.write(&value);
        sender.send_to(receiver, packet.finish()).unwrap();
    }
}

fn assert_in_order(received: &Arc<Mutex<Vec<u32>>>) {
    assert!(wait_for!(
        Duration::from_secs(5),
        received.lock().unwrap().len() == PACKET_COUNT as usize
    ));
    let received = received.lock().unwrap();
    assert!(received.iter().copied().eq(0..PACKET_COUNT));
}

#[test]
fn inline_handlers_see_send_order() {
    let (client, server, server_id) = connected_pair();
    let received = record_sequence(&server, PACKETTYPE_CUSTOM, None);
    send_sequence(&client, &server_id, PACKETTYPE_CUSTOM);
    assert_in_order(&received);
}

#[test]
fn command_thread_sees_send_order() {
    let (client, server, server_id) = connected_pair();
    let received = record_sequence(&server, PACKETTYPE_CUSTOM + 1, Some(server.command_queue()));
    send_sequence(&client, &server_id, PACKETTYPE_CUSTOM + 1);
    assert_in_order(&received);
}

#[test]
fn worker_sees_send_order() {
    let (client, server, server_id) = connected_pair();
    let worker = server.spawn_worker("ordering-worker").unwrap();
    let received = record_sequence(&server, PACKETTYPE_CUSTOM + 2, Some(worker));
    send_sequence(&client, &server_id, PACKETTYPE_CUSTOM + 2);
    assert_in_order(&received);
}

#[test]
fn packets_to_self_are_dispatched_locally() {
    let node = TestNode::new();
    let received = record_sequence(&node, PACKETTYPE_CUSTOM + 3, Some(node.command_queue()));
    send_sequence(&node, &node.id(), PACKETTYPE_CUSTOM + 3);
    assert_in_order(&received);
}

#[test]
fn reserved_packet_types_are_rejected() {
    let node = TestNode::new();
    let error = node
        .register_custom_command(PACKETTYPE_CUSTOM - 1, SEQUENCE, |_| Ok(()), None)
        .unwrap_err();
    assert_eq!(
        error,
        NodeError::InvalidPacketType {
            value: PACKETTYPE_CUSTOM - 1
        }
    );
    assert_error_code!(node, error, ERROR_NODE_PACKET_TYPE);
}

#[test]
fn unknown_commands_are_dropped() {
    let (client, server, server_id) = connected_pair();
    let received = record_sequence(&server, PACKETTYPE_CUSTOM + 4, None);

    // nothing handles command 99, the connection must survive it
    let mut unknown = OutgoingPacket::new(PacketType::Custom(PACKETTYPE_CUSTOM + 4), 99);
    unknown.write(&7u32);
    client.send_to(&server_id, unknown.finish()).unwrap();

    send_sequence(&client, &server_id, PACKETTYPE_CUSTOM + 4);
    assert_in_order(&received);
    assert_eq!(server.connected_nodes(), vec![client.id()]);
}

#[test]
fn malformed_packets_keep_the_peer_connected() {
    let (client, server, server_id) = connected_pair();
    let mut reserved_type = Vec::new();
    reserved_type.extend_from_slice(&16u64.to_le_bytes());
    reserved_type.extend_from_slice(&7u32.to_le_bytes());
    reserved_type.extend_from_slice(&0u32.to_le_bytes());
    client.send_to(&server_id, reserved_type).unwrap();
    // object family without the object id
    client
        .send_to(&server_id, OutgoingPacket::new(PacketType::Object, 0).finish())
        .unwrap();

    assert!(client.ping(&server_id).is_ok());
    assert!(server.connected_nodes().contains(&client.id()));

    let received = record_sequence(&server, PACKETTYPE_CUSTOM + 9, None);
    send_sequence(&client, &server_id, PACKETTYPE_CUSTOM + 9);
    assert_in_order(&received);
}
