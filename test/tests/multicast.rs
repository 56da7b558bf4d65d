/// Nodes joining the same multicast group share it once connected, and
/// packets for several peers go out once through the group
use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use coterie_node::NodeError;
use coterie_shared::{
    ConnectionDescription, ConnectionError, NodeId, OutgoingPacket, PacketType, Serde,
    PACKETTYPE_CUSTOM,
};
use coterie_test::{loopback_group, wait_for, TestNode};

const VALUE: u32 = 3;

type Received = Arc<Mutex<Vec<(NodeId, u32)>>>;

fn record(node: &TestNode) -> Received {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    node.register_custom_command(
        PACKETTYPE_CUSTOM,
        VALUE,
        move |command| {
            let value = u32::de(&mut command.reader())?;
            sink.lock().unwrap().push((command.sender(), value));
            Ok(())
        },
        None,
    )
    .unwrap();
    received
}

fn value_packet(value: u32) -> Vec<u8> {
    let mut packet = OutgoingPacket::new(PacketType::Custom(PACKETTYPE_CUSTOM), VALUE);
    packet.write(&value);
    packet.finish()
}

#[test]
fn connected_members_share_the_group() {
    let group = loopback_group();
    let master = TestNode::with_multicast(group.clone());
    let member = TestNode::with_multicast(group.clone());
    let outsider = TestNode::new();
    member.connect_to(&master);
    outsider.connect_to(&master);

    assert_eq!(master.multicast_descriptions(), vec![group.clone()]);
    let peer = master.node(&member.id()).unwrap();
    assert!(peer.descriptions().contains(&group));
    assert_eq!(peer.multicasts().len(), 1);
    assert!(peer.multicasts()[0].description().is_same_endpoint(&group));

    let outsider_peer = master.node(&outsider.id()).unwrap();
    assert!(outsider_peer.multicasts().is_empty());

    // the connecting side learns about the group from the reply
    let master_peer = member.node(&master.id()).unwrap();
    assert_eq!(master_peer.multicasts().len(), 1);
}

#[test]
fn group_send_reaches_only_the_targets() {
    let group = loopback_group();
    let master = TestNode::with_multicast(group.clone());
    let first = TestNode::with_multicast(group.clone());
    let second = TestNode::with_multicast(group.clone());
    let bystander = TestNode::with_multicast(group);
    for member in [&first, &second, &bystander] {
        member.connect_to(&master);
    }
    let received = [record(&first), record(&second), record(&bystander)];
    let from_master = record(&master);

    master
        .send_to_nodes(&[first.id(), second.id()], value_packet(11))
        .unwrap();

    for received in &received[..2] {
        assert!(wait_for!(
            Duration::from_secs(5),
            received.lock().unwrap().len() == 1
        ));
        assert_eq!(received.lock().unwrap()[0], (master.id(), 11));
    }
    thread::sleep(Duration::from_millis(200));
    assert!(received[2].lock().unwrap().is_empty());
    // the looped back datagram is not handled by its sender
    assert!(from_master.lock().unwrap().is_empty());
}

#[test]
fn nodes_outside_the_group_get_their_own_copy() {
    let group = loopback_group();
    let master = TestNode::with_multicast(group.clone());
    let member = TestNode::with_multicast(group);
    let outsider = TestNode::new();
    member.connect_to(&master);
    outsider.connect_to(&master);
    let at_member = record(&member);
    let at_outsider = record(&outsider);
    let at_master = record(&master);

    master
        .send_to_nodes(&[member.id(), outsider.id(), master.id()], value_packet(5))
        .unwrap();

    for received in [&at_member, &at_outsider, &at_master] {
        assert!(wait_for!(
            Duration::from_secs(5),
            received.lock().unwrap().len() == 1
        ));
        assert_eq!(received.lock().unwrap()[0], (master.id(), 5));
    }
}

#[test]
fn sending_to_an_unknown_node_fails() {
    let master = TestNode::with_multicast(loopback_group());
    let stranger = NodeId::new(0, 77);
    assert_eq!(
        master.send_to_nodes(&[stranger], value_packet(1)),
        Err(NodeError::NotConnected { node_id: stranger })
    );
}

#[test]
fn only_multicast_descriptions_are_joined() {
    let node = TestNode::new();
    // listening already
    assert!(matches!(
        node.add_multicast(loopback_group()),
        Err(NodeError::AlreadyStarted { .. })
    ));

    let context = coterie_shared::Context::new();
    let closed = coterie_node::LocalNode::new(&context).unwrap();
    assert!(matches!(
        closed.add_multicast(ConnectionDescription::tcp("127.0.0.1", 0)),
        Err(NodeError::Connection(ConnectionError::InvalidDescription { .. }))
    ));
    assert!(closed.multicast_descriptions().is_empty());
}
