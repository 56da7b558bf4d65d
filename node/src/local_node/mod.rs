mod handshake;
mod multicast;
mod receiver;
mod worker;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use coterie_shared::{
    create_connection, lock, read, write, Command, CommandCache, CommandQueue,
    ConnectionDescription, ConnectionPtr, ConnectionSet, Context, DispatchError, Dispatcher,
    NodeConfig, NodeId, NodeType, OutgoingPacket, PacketType, Serde, Uuid, NODETYPE_NODE,
    PACKETTYPE_CUSTOM,
};

use crate::{
    error::{register_error_strings, NodeError},
    events::{EventQueue, NodeEvent},
    instance_cache::InstanceCache,
    node::{DefaultNodeFactory, Node, NodeFactory},
    node_registry::{NodeHandle, NodeRegistry},
    packets::{
        InstancePushPacket, PingPacket, CMD_NODE_DISCONNECT, CMD_NODE_INSTANCE, CMD_NODE_PING,
        CMD_NODE_PING_REPLY,
    },
    request_handler::RequestHandler,
    session::Session,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalNodeState {
    Closed,
    Listening,
    Closing,
}

struct NodeThread {
    name: String,
    handle: JoinHandle<()>,
    queue: Option<CommandQueue>,
}

pub(crate) struct LocalNodeInner {
    id: NodeId,
    node_type: NodeType,
    context: Context,
    config: NodeConfig,
    state: RwLock<LocalNodeState>,
    listener_descriptions: Mutex<Vec<ConnectionDescription>>,
    listeners: Mutex<Vec<ConnectionPtr>>,
    multicast_descriptions: Mutex<Vec<ConnectionDescription>>,
    multicasts: Mutex<Vec<ConnectionPtr>>,
    connection_set: ConnectionSet,
    nodes: NodeRegistry,
    factory: Box<dyn NodeFactory>,
    dispatcher: Dispatcher,
    custom: RwLock<HashMap<u32, Arc<Dispatcher>>>,
    session: Session,
    requests: RequestHandler,
    cache: CommandCache,
    instance_cache: InstanceCache,
    command_queue: CommandQueue,
    threads: Mutex<Vec<NodeThread>>,
    events: EventQueue,
}

/// The process-local endpoint of the node network. Listens for peers,
/// receives and dispatches their commands, and hosts the session of
/// distributed objects. Clones share the same node.
///
/// A listening node runs a receiver thread, which reads packets and runs
/// inline handlers, and a command thread, which runs queued handlers in
/// arrival order. `close` stops both; nodes are not closed on drop.
#[derive(Clone)]
pub struct LocalNode {
    pub(crate) inner: Arc<LocalNodeInner>,
}

/// Non-owning reference held by command handlers
#[derive(Clone)]
pub(crate) struct WeakLocalNode {
    inner: Weak<LocalNodeInner>,
}

impl WeakLocalNode {
    pub fn upgrade(&self) -> Option<LocalNode> {
        self.inner.upgrade().map(|inner| LocalNode { inner })
    }
}

impl LocalNode {
    pub fn new(context: &Context) -> Result<Self, NodeError> {
        Self::with_factory(context, NODETYPE_NODE, Box::new(DefaultNodeFactory))
    }

    pub fn with_factory(
        context: &Context,
        node_type: NodeType,
        factory: Box<dyn NodeFactory>,
    ) -> Result<Self, NodeError> {
        let connection_set = ConnectionSet::new().map_err(|error| NodeError::Resource {
            reason: error.to_string(),
        })?;
        register_error_strings(context.errors());
        let config = context.config().clone();

        let inner = Arc::new_cyclic(|weak: &Weak<LocalNodeInner>| {
            let dispatcher = Dispatcher::new();
            register_node_commands(&dispatcher, WeakLocalNode { inner: weak.clone() });

            LocalNodeInner {
                id: Uuid::generate(),
                node_type,
                context: context.clone(),
                cache: CommandCache::new(config.command_cache_capacity),
                instance_cache: InstanceCache::new(config.instance_cache_size),
                config,
                state: RwLock::new(LocalNodeState::Closed),
                listener_descriptions: Mutex::new(Vec::new()),
                listeners: Mutex::new(Vec::new()),
                multicast_descriptions: Mutex::new(Vec::new()),
                multicasts: Mutex::new(Vec::new()),
                connection_set,
                nodes: NodeRegistry::new(),
                factory,
                dispatcher,
                custom: RwLock::new(HashMap::new()),
                session: Session::new(),
                requests: RequestHandler::new(),
                command_queue: CommandQueue::new(),
                threads: Mutex::new(Vec::new()),
                events: EventQueue::new(),
            }
        });
        Ok(Self { inner })
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn node_type(&self) -> NodeType {
        self.inner.node_type
    }

    pub fn state(&self) -> LocalNodeState {
        *read(&self.inner.state)
    }

    pub fn is_listening(&self) -> bool {
        self.state() == LocalNodeState::Listening
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Adds an endpoint to listen on once `listen` is called
    pub fn add_listener(&self, description: ConnectionDescription) -> Result<(), NodeError> {
        let state = self.state();
        if state != LocalNodeState::Closed {
            return Err(NodeError::AlreadyStarted { state });
        }
        lock(&self.inner.listener_descriptions).push(description);
        Ok(())
    }

    /// Endpoints peers can connect to. After `listen`, TCP ports chosen by
    /// the OS are filled in.
    pub fn listener_descriptions(&self) -> Vec<ConnectionDescription> {
        lock(&self.inner.listener_descriptions).clone()
    }

    /// Opens every listener, joins every multicast group and starts the
    /// receiver and command threads
    pub fn listen(&self) -> Result<(), NodeError> {
        {
            let mut state = write(&self.inner.state);
            if *state != LocalNodeState::Closed {
                return Err(NodeError::AlreadyStarted { state: *state });
            }
            *state = LocalNodeState::Listening;
        }

        if let Err(error) = self.open_listeners().and_then(|_| self.join_multicasts()) {
            self.close_listeners();
            *write(&self.inner.state) = LocalNodeState::Closed;
            return Err(error);
        }

        let receiver = self.clone();
        let started = self
            .spawn_thread("coterie-receiver", None, move || receiver::run(receiver))
            .and_then(|_| {
                let queue = self.inner.command_queue.clone();
                self.spawn_thread("coterie-command", Some(queue.clone()), move || {
                    worker::run("coterie-command", queue)
                })
            });
        if let Err(error) = started {
            // the receiver thread, if running, stops on the state change
            self.close()?;
            return Err(error);
        }

        info!(
            "Node {} listening on {:?}",
            self.id(),
            self.listener_descriptions()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    fn open_listeners(&self) -> Result<(), NodeError> {
        let descriptions = self.listener_descriptions();
        let mut bound = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let connection = create_connection(&description);
            connection.listen()?;
            bound.push(connection.description());
            lock(&self.inner.listeners).push(connection.clone());
            self.inner.connection_set.add_connection(connection);
        }
        *lock(&self.inner.listener_descriptions) = bound;
        Ok(())
    }

    fn close_listeners(&self) {
        for listener in lock(&self.inner.listeners).drain(..) {
            self.inner.connection_set.remove_connection(&listener);
            listener.close();
        }
        self.leave_multicasts();
    }

    /// Disconnects every peer, stops all threads and closes all
    /// connections. Commands already queued are still handled. Closing a
    /// closed node does nothing.
    pub fn close(&self) -> Result<(), NodeError> {
        {
            let mut state = write(&self.inner.state);
            if *state != LocalNodeState::Listening {
                return Ok(());
            }
            *state = LocalNodeState::Closing;
        }
        info!("Closing node {}", self.id());

        let disconnect = OutgoingPacket::new(PacketType::Node, CMD_NODE_DISCONNECT).finish();
        for (node_id, connection) in self.inner.nodes.close_all() {
            if let Err(error) = connection.send(&disconnect) {
                debug!("Could not notify {} of disconnect: {}", node_id, error);
            }
            self.inner.connection_set.remove_connection(&connection);
            connection.close();
            self.inner.events.push(NodeEvent::Disconnected(node_id));
        }
        self.inner.connection_set.interrupt();

        let threads: Vec<NodeThread> = lock(&self.inner.threads).drain(..).collect();
        let current = thread::current().id();
        // receiver first, so no new commands get queued
        let (receivers, workers): (Vec<_>, Vec<_>) =
            threads.into_iter().partition(|thread| thread.queue.is_none());
        for thread in receivers {
            if thread.handle.thread().id() != current && thread.handle.join().is_err() {
                warn!("{} panicked", thread.name);
            }
        }

        self.close_listeners();
        for connection in self.inner.connection_set.connections() {
            self.inner.connection_set.remove_connection(&connection);
            connection.close();
        }

        for thread in workers {
            if let Some(queue) = &thread.queue {
                queue.close();
            }
            if thread.handle.thread().id() != current && thread.handle.join().is_err() {
                warn!("{} panicked", thread.name);
            }
        }

        self.inner.cache.flush();
        self.inner.instance_cache.clear();
        *write(&self.inner.state) = LocalNodeState::Closed;
        info!("Node {} closed", self.id());
        Ok(())
    }

    /// Pins a known peer
    pub fn node(&self, id: &NodeId) -> Option<NodeHandle> {
        self.inner.nodes.pin(id)
    }

    pub fn connected_nodes(&self) -> Vec<NodeId> {
        self.inner.nodes.connected()
    }

    /// Sends `NodeDisconnect` to the peer and closes its connection
    pub fn disconnect(&self, node_id: &NodeId) -> Result<(), NodeError> {
        let node = self
            .inner
            .nodes
            .get(node_id)
            .filter(|node| node.is_connected())
            .ok_or(NodeError::NotConnected { node_id: *node_id })?;
        let packet = OutgoingPacket::new(PacketType::Node, CMD_NODE_DISCONNECT).finish();
        if let Err(error) = node.send(&packet) {
            debug!("Could not notify {} of disconnect: {}", node_id, error);
        }
        self.drop_peer(&node);
        Ok(())
    }

    /// Sends a complete packet to a peer. Packets to the local node itself
    /// are dispatched without touching the network.
    pub fn send_to(&self, node_id: &NodeId, packet: Vec<u8>) -> Result<(), NodeError> {
        if *node_id == self.id() {
            return self.dispatch_local(packet);
        }
        let node = self
            .inner
            .nodes
            .get(node_id)
            .ok_or(NodeError::NotConnected { node_id: *node_id })?;
        node.send(&packet)
    }

    /// Round trip to a peer, returning how long it took
    pub fn ping(&self, node_id: &NodeId) -> Result<Duration, NodeError> {
        let request_id = self.inner.requests.register();
        let mut packet = OutgoingPacket::new(PacketType::Node, CMD_NODE_PING);
        packet.write(&PingPacket { request_id });

        let start = Instant::now();
        if let Err(error) = self.send_to(node_id, packet.finish()) {
            self.inner.requests.unregister(request_id);
            return Err(error);
        }
        self.inner
            .requests
            .wait::<()>(request_id, self.config().timeout)
            .map_err(|_| NodeError::RequestTimeout { request_id })?;
        Ok(start.elapsed())
    }

    /// Registers a handler for an application packet family. `queue` picks
    /// the thread it runs on; `None` runs it on the receiver thread.
    pub fn register_custom_command<F>(
        &self,
        packet_type: u32,
        command: u32,
        handler: F,
        queue: Option<CommandQueue>,
    ) -> Result<(), NodeError>
    where
        F: Fn(Command) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        if packet_type < PACKETTYPE_CUSTOM {
            return Err(NodeError::InvalidPacketType { value: packet_type });
        }
        write(&self.inner.custom)
            .entry(packet_type)
            .or_insert_with(|| Arc::new(Dispatcher::new()))
            .register_command(command, handler, queue);
        Ok(())
    }

    /// Queue of the command thread
    pub fn command_queue(&self) -> CommandQueue {
        self.inner.command_queue.clone()
    }

    /// Starts an extra worker thread serving the returned queue until the
    /// node closes
    pub fn spawn_worker(&self, name: &str) -> Result<CommandQueue, NodeError> {
        let queue = CommandQueue::new();
        let worker_queue = queue.clone();
        let worker_name = name.to_string();
        self.spawn_thread(name, Some(queue.clone()), move || {
            worker::run(&worker_name, worker_queue)
        })?;
        Ok(queue)
    }

    /// Next peer lifecycle event, waiting up to `timeout`
    pub fn next_event(&self, timeout: Option<Duration>) -> Option<NodeEvent> {
        self.inner.events.pop(timeout)
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Instance data received from masters, reused by later mappings
    pub fn instance_cache(&self) -> &InstanceCache {
        &self.inner.instance_cache
    }

    pub(crate) fn requests(&self) -> &RequestHandler {
        &self.inner.requests
    }

    pub(crate) fn downgrade(&self) -> WeakLocalNode {
        WeakLocalNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Routes a command to the dispatcher of its packet family
    pub(crate) fn dispatch_command(&self, command: Command) -> Result<(), DispatchError> {
        match command.packet_type() {
            PacketType::Node => self.inner.dispatcher.dispatch(command),
            PacketType::Object | PacketType::Barrier | PacketType::Queue => {
                self.inner.session.dispatch(command)
            }
            PacketType::Custom(value) => {
                let dispatcher = read(&self.inner.custom).get(&value).cloned();
                match dispatcher {
                    Some(dispatcher) => dispatcher.dispatch(command),
                    None => Err(DispatchError::UnknownCommand {
                        packet_type: command.packet_type(),
                        command: command.command(),
                    }),
                }
            }
        }
    }

    fn dispatch_local(&self, packet: Vec<u8>) -> Result<(), NodeError> {
        let command = match self.inner.cache.command(packet, self.id(), self.id()) {
            Ok(command) => command,
            Err(error) => {
                warn!("Dropping malformed local packet: {}", error);
                return Ok(());
            }
        };
        receiver::dispatch_received(self, command);
        Ok(())
    }

    /// Detaches a peer after a disconnect or connection failure
    pub(crate) fn drop_peer(&self, node: &Node) {
        let Some(connection) = node.detach() else {
            return;
        };
        self.inner.connection_set.remove_connection(&connection);
        connection.close();
        info!("Node {} disconnected", node.id());
        self.inner.instance_cache.remove_node(&node.id());
        self.inner.events.push(NodeEvent::Disconnected(node.id()));
        self.inner.nodes.evict_if_unused(&node.id());
    }

    fn spawn_thread<F>(
        &self,
        name: &str,
        queue: Option<CommandQueue>,
        body: F,
    ) -> Result<(), NodeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|error| NodeError::Resource {
                reason: error.to_string(),
            })?;
        lock(&self.inner.threads).push(NodeThread {
            name: name.to_string(),
            handle,
            queue,
        });
        Ok(())
    }

    pub(crate) fn expect_listening(&self) -> Result<(), NodeError> {
        let state = self.state();
        if state != LocalNodeState::Listening {
            return Err(NodeError::NotListening { state });
        }
        Ok(())
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

fn register_node_commands(dispatcher: &Dispatcher, weak: WeakLocalNode) {
    let node = weak.clone();
    dispatcher.register_command(
        CMD_NODE_DISCONNECT,
        move |command| {
            let Some(local) = node.upgrade() else {
                return Ok(());
            };
            if let Some(peer) = local.inner.nodes.get(&command.sender()) {
                local.drop_peer(&peer);
            }
            Ok(())
        },
        None,
    );

    let node = weak.clone();
    dispatcher.register_command(
        CMD_NODE_PING,
        move |command| {
            let Some(local) = node.upgrade() else {
                return Ok(());
            };
            let ping = PingPacket::de(&mut command.reader())?;
            let mut reply = OutgoingPacket::new(PacketType::Node, CMD_NODE_PING_REPLY);
            reply.write(&ping);
            local
                .send_to(&command.sender(), reply.finish())
                .map_err(|error| DispatchError::Rejected {
                    command: command.command(),
                    reason: error.to_string(),
                })
        },
        None,
    );

    let node = weak.clone();
    dispatcher.register_command(
        CMD_NODE_INSTANCE,
        move |command| {
            let Some(local) = node.upgrade() else {
                return Ok(());
            };
            let push = InstancePushPacket::de(&mut command.reader())?;
            if local
                .instance_cache()
                .add(
                    push.object_id,
                    command.sender(),
                    push.master_instance,
                    push.version,
                    push.data,
                )
            {
                debug!(
                    "{}: cached version {} pushed by {}",
                    push.object_id,
                    push.version,
                    command.sender()
                );
            }
            Ok(())
        },
        None,
    );

    let node = weak;
    dispatcher.register_command(
        CMD_NODE_PING_REPLY,
        move |command| {
            let Some(local) = node.upgrade() else {
                return Ok(());
            };
            let ping = PingPacket::de(&mut command.reader())?;
            local.requests().serve(ping.request_id, ());
            Ok(())
        },
        None,
    );
}
