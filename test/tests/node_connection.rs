/// Handshake, disconnect and shutdown behavior of local nodes over
/// loopback TCP
use std::time::Duration;

use coterie_node::{
    LocalNode, LocalNodeState, NodeError, NodeEvent, NodeTypeFilter, ERROR_NODE_NOT_LISTENING,
    ERROR_NODE_REFUSED, ERROR_NODE_SELF_CONNECT,
};
use coterie_shared::{Context, NODETYPE_CUSTOM};
use coterie_test::{assert_error_code, connected_pair, wait_for, TestNode};

const EVENT_WAIT: Option<Duration> = Some(Duration::from_secs(2));

#[test]
fn connect_registers_both_peers() {
    let (client, server, server_id) = connected_pair();

    assert_eq!(client.connected_nodes(), vec![server_id]);
    assert_eq!(client.next_event(EVENT_WAIT), Some(NodeEvent::Connected(server_id)));
    assert_eq!(
        server.next_event(EVENT_WAIT),
        Some(NodeEvent::Connected(client.id()))
    );
    assert_eq!(server.connected_nodes(), vec![client.id()]);

    let peer = server.node(&client.id()).expect("client known to server");
    assert!(peer.is_connected());
    assert_eq!(peer.descriptions(), client.listener_descriptions());
}

#[test]
fn connecting_twice_returns_the_existing_peer() {
    let (client, server, server_id) = connected_pair();

    let again = client.connect(&server.description()).unwrap();
    assert_eq!(again.id(), server_id);
    assert!(again.is_connected());
    assert_eq!(client.connected_nodes().len(), 1);
    assert_eq!(server.connected_nodes().len(), 1);
}

#[test]
fn connecting_to_self_is_refused() {
    let node = TestNode::new();
    let error = node.connect(&node.description()).unwrap_err();
    assert_eq!(error, NodeError::SelfConnect);
    assert_error_code!(node, error, ERROR_NODE_SELF_CONNECT);
    assert!(node.connected_nodes().is_empty());
}

#[test]
fn factory_can_refuse_node_types() {
    let server = TestNode::with_factory(Box::new(NodeTypeFilter::new(vec![NODETYPE_CUSTOM])));
    let client = TestNode::new();

    let error = client.connect(&server.description()).unwrap_err();
    assert!(matches!(error, NodeError::Refused { .. }), "{:?}", error);
    assert_error_code!(client, error, ERROR_NODE_REFUSED);
    assert!(server.connected_nodes().is_empty());
    assert!(client.connected_nodes().is_empty());
}

#[test]
fn disconnect_marks_the_peer_unreachable() {
    let (client, server, server_id) = connected_pair();
    let client_id = client.id();
    let pinned = server.node(&client_id).unwrap();
    assert_eq!(server.next_event(EVENT_WAIT), Some(NodeEvent::Connected(client_id)));

    client.disconnect(&server_id).unwrap();
    assert!(client.connected_nodes().is_empty());

    assert_eq!(
        server.next_event(EVENT_WAIT),
        Some(NodeEvent::Disconnected(client_id))
    );
    assert!(pinned.is_closed());
    assert!(server.connected_nodes().is_empty());
    assert!(matches!(
        server.send_to(&client_id, Vec::new()),
        Err(NodeError::NotConnected { .. }) | Err(NodeError::Connection(_))
    ));

    // released handles let the closed node go
    drop(pinned);
    assert!(server.node(&client_id).is_none());
}

#[test]
fn closing_a_node_disconnects_its_peers() {
    let (client, server, _) = connected_pair();
    let client_id = client.id();
    drop(client);

    assert!(wait_for!(
        Duration::from_secs(2),
        server.connected_nodes().is_empty()
    ));
    let mut events = Vec::new();
    while let Some(event) = server.next_event(Some(Duration::from_millis(100))) {
        events.push(event);
    }
    assert!(events.contains(&NodeEvent::Disconnected(client_id)));
}

#[test]
fn close_is_idempotent() {
    let node = TestNode::new();
    assert_eq!(node.state(), LocalNodeState::Listening);
    node.close().unwrap();
    node.close().unwrap();
    assert_eq!(node.state(), LocalNodeState::Closed);

    let error = node.connect(&node.description()).unwrap_err();
    assert_eq!(
        error,
        NodeError::NotListening {
            state: LocalNodeState::Closed
        }
    );
    assert_error_code!(node, error, ERROR_NODE_NOT_LISTENING);
}

#[test]
fn listen_twice_fails() {
    let node = TestNode::new();
    assert!(matches!(
        node.listen(),
        Err(NodeError::AlreadyStarted {
            state: LocalNodeState::Listening
        })
    ));
}

#[test]
fn closed_node_without_listeners() {
    let node = LocalNode::new(&Context::new()).unwrap();
    assert_eq!(node.state(), LocalNodeState::Closed);
    node.close().unwrap();
    assert!(node.listener_descriptions().is_empty());
}

#[test]
fn ping_measures_a_round_trip() {
    let (client, server, server_id) = connected_pair();
    let elapsed = client.ping(&server_id).unwrap();
    assert!(elapsed < Duration::from_secs(2));
    assert!(server.ping(&client.id()).is_ok());
}

#[test]
fn listener_reports_the_bound_port() {
    let node = TestNode::new();
    let description = node.description();
    assert_ne!(description.port, 0);
    assert_eq!(description.hostname, "127.0.0.1");
}
