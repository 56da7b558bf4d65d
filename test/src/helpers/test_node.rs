use std::{ops::Deref, time::Duration};

use coterie_node::{LocalNode, NodeFactory, NodeHandle};
use coterie_shared::{ConnectionDescription, Context, NodeConfig, NodeId, NODETYPE_NODE};

/// Installs the test logger once per test binary
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config with waits short enough for failure tests
pub fn short_timeouts() -> NodeConfig {
    NodeConfig {
        timeout: Some(Duration::from_secs(2)),
        select_timeout: Duration::from_millis(50),
        ..NodeConfig::default()
    }
}

/// A local node listening on a loopback TCP port, closed on drop
pub struct TestNode {
    node: LocalNode,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_config(short_timeouts())
    }

    pub fn with_config(config: NodeConfig) -> Self {
        Self::build(&Context::with_config(config), None, None)
    }

    pub fn with_factory(factory: Box<dyn NodeFactory>) -> Self {
        Self::build(&Context::with_config(short_timeouts()), Some(factory), None)
    }

    /// A node that also joins `group`
    pub fn with_multicast(group: ConnectionDescription) -> Self {
        Self::build(&Context::with_config(short_timeouts()), None, Some(group))
    }

    fn build(
        context: &Context,
        factory: Option<Box<dyn NodeFactory>>,
        group: Option<ConnectionDescription>,
    ) -> Self {
        init_logger();
        let node = match factory {
            Some(factory) => LocalNode::with_factory(context, NODETYPE_NODE, factory),
            None => LocalNode::new(context),
        }
        .expect("local node");
        node.add_listener(ConnectionDescription::tcp("127.0.0.1", 0))
            .expect("add listener");
        if let Some(group) = group {
            node.add_multicast(group).expect("add multicast group");
        }
        node.listen().expect("listen on loopback");
        Self { node }
    }

    /// The bound loopback endpoint
    pub fn description(&self) -> ConnectionDescription {
        self.node.listener_descriptions()[0].clone()
    }

    pub fn connect_to(&self, other: &TestNode) -> NodeHandle {
        self.node
            .connect(&other.description())
            .expect("connect to test node")
    }

    pub fn local(&self) -> &LocalNode {
        &self.node
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestNode {
    type Target = LocalNode;

    fn deref(&self) -> &LocalNode {
        &self.node
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        let _ = self.node.close();
    }
}

/// Two listening nodes, the first connected to the second. Returns the
/// nodes and the id of the second.
pub fn connected_pair() -> (TestNode, TestNode, NodeId) {
    let client = TestNode::new();
    let server = TestNode::new();
    let peer = client.connect_to(&server);
    let server_id = peer.id();
    assert_eq!(server_id, server.id());
    (client, server, server_id)
}

/// A loopback multicast group on a port no other test uses
pub fn loopback_group() -> ConnectionDescription {
    let port = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| socket.local_addr())
        .expect("free udp port")
        .port();
    ConnectionDescription::multicast("239.255.42.77", port).with_interface("127.0.0.1")
}
