use thiserror::Error;

use coterie_shared::{
    ConnectionDescription, ConnectionError, ErrorCode, ErrorCoded, ErrorRegistry, NodeId,
    ObjectId, RequestId, SerdeErr, Version,
};

use crate::local_node::LocalNodeState;

/// Errors of the local node and its peers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("Local node is {state:?}, operation needs it listening")]
    NotListening { state: LocalNodeState },

    #[error("Local node is already {state:?}")]
    AlreadyStarted { state: LocalNodeState },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("No connect reply from {description} in time")]
    ConnectTimeout { description: String },

    /// The remote node factory did not accept this node type
    #[error("Node at {description} refused the connection")]
    Refused { description: String },

    #[error("Refusing to connect the local node to itself")]
    SelfConnect,

    #[error("Node {node_id} is not connected")]
    NotConnected { node_id: NodeId },

    #[error("Request {request_id} timed out")]
    RequestTimeout { request_id: RequestId },

    #[error("Packet type {value} is reserved, custom packet types start at 128")]
    InvalidPacketType { value: u32 },

    /// OS resources for threads or the connection set were unavailable
    #[error("Failed to set up the local node: {reason}")]
    Resource { reason: String },
}

impl NodeError {
    pub(crate) fn refused(description: &ConnectionDescription) -> Self {
        NodeError::Refused {
            description: description.to_string(),
        }
    }
}

/// Errors of distributed objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Object {object_id} is already registered or mapped on this node")]
    AlreadyRegistered { object_id: ObjectId },

    #[error("Object {object_id} is not attached to a node")]
    NotMapped { object_id: ObjectId },

    #[error("Object {object_id} is static and cannot be committed")]
    NotVersioned { object_id: ObjectId },

    #[error("Object {object_id} is a slave, only masters commit")]
    NotMaster { object_id: ObjectId },

    #[error("No reply mapping object {object_id} in time")]
    MapTimeout { object_id: ObjectId },

    #[error("Master does not know object {object_id}")]
    NotFound { object_id: ObjectId },

    #[error("Master no longer retains version {version} of object {object_id}")]
    VersionUnavailable { object_id: ObjectId, version: Version },

    #[error("Version {version} of object {object_id} did not arrive in time")]
    SyncTimeout { object_id: ObjectId, version: Version },

    /// Too many deltas were buffered ahead of the applied version
    #[error("Object {object_id} lost versions and cannot reach {version}")]
    VersionGap { object_id: ObjectId, version: Version },

    #[error("Object {object_id} is at version {current}, cannot sync back to {requested}")]
    VersionRegression {
        object_id: ObjectId,
        current: Version,
        requested: Version,
    },

    #[error("Version {version} is not valid here")]
    InvalidVersion { version: Version },

    #[error("Malformed object data: {0}")]
    Payload(#[from] SerdeErr),
}

/// Errors of barriers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BarrierError {
    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Barrier {object_id} version {version} not reached in time")]
    Timeout { object_id: ObjectId, version: Version },

    #[error("Cannot reach barrier master {node_id}: {source}")]
    MasterUnreachable { node_id: NodeId, source: NodeError },
}

/// Errors of distributed queues
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Object error: {0}")]
    Object(#[from] ObjectError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("No item from queue {queue_id} in time")]
    Timeout { queue_id: ObjectId },

    #[error("Queue {queue_id} is not attached to a node")]
    NotMapped { queue_id: ObjectId },

    #[error("Malformed queue item: {0}")]
    Payload(#[from] SerdeErr),
}

pub const ERROR_NODE_NOT_LISTENING: ErrorCode = 0x0300;
pub const ERROR_NODE_ALREADY_STARTED: ErrorCode = 0x0301;
pub const ERROR_NODE_CONNECTION: ErrorCode = 0x0302;
pub const ERROR_NODE_CONNECT_TIMEOUT: ErrorCode = 0x0303;
pub const ERROR_NODE_REFUSED: ErrorCode = 0x0304;
pub const ERROR_NODE_SELF_CONNECT: ErrorCode = 0x0305;
pub const ERROR_NODE_NOT_CONNECTED: ErrorCode = 0x0306;
pub const ERROR_NODE_REQUEST_TIMEOUT: ErrorCode = 0x0307;
pub const ERROR_NODE_PACKET_TYPE: ErrorCode = 0x0308;
pub const ERROR_NODE_RESOURCE: ErrorCode = 0x0309;

pub const ERROR_OBJECT_REGISTERED: ErrorCode = 0x0400;
pub const ERROR_OBJECT_NOT_MAPPED: ErrorCode = 0x0401;
pub const ERROR_OBJECT_NOT_VERSIONED: ErrorCode = 0x0402;
pub const ERROR_OBJECT_NOT_MASTER: ErrorCode = 0x0403;
pub const ERROR_OBJECT_MAP_TIMEOUT: ErrorCode = 0x0404;
pub const ERROR_OBJECT_NOT_FOUND: ErrorCode = 0x0405;
pub const ERROR_OBJECT_VERSION_UNAVAILABLE: ErrorCode = 0x0406;
pub const ERROR_OBJECT_SYNC_TIMEOUT: ErrorCode = 0x0407;
pub const ERROR_OBJECT_VERSION_GAP: ErrorCode = 0x0408;
pub const ERROR_OBJECT_VERSION_REGRESSION: ErrorCode = 0x0409;
pub const ERROR_OBJECT_INVALID_VERSION: ErrorCode = 0x040a;
pub const ERROR_OBJECT_PAYLOAD: ErrorCode = 0x040b;

pub const ERROR_BARRIER_TIMEOUT: ErrorCode = 0x0500;
pub const ERROR_BARRIER_MASTER_UNREACHABLE: ErrorCode = 0x0501;

pub const ERROR_QUEUE_TIMEOUT: ErrorCode = 0x0600;
pub const ERROR_QUEUE_NOT_MAPPED: ErrorCode = 0x0601;
pub const ERROR_QUEUE_PAYLOAD: ErrorCode = 0x0602;

const ERROR_STRINGS: &[(ErrorCode, &str)] = &[
    (ERROR_NODE_NOT_LISTENING, "Local node is not listening"),
    (ERROR_NODE_ALREADY_STARTED, "Local node already started"),
    (ERROR_NODE_CONNECTION, "Connection to node failed"),
    (ERROR_NODE_CONNECT_TIMEOUT, "Timeout during node handshake"),
    (ERROR_NODE_REFUSED, "Node refused the connection"),
    (ERROR_NODE_SELF_CONNECT, "Cannot connect a node to itself"),
    (ERROR_NODE_NOT_CONNECTED, "Node not connected"),
    (ERROR_NODE_REQUEST_TIMEOUT, "Timeout waiting for node reply"),
    (ERROR_NODE_PACKET_TYPE, "Reserved packet type"),
    (ERROR_NODE_RESOURCE, "Could not set up local node"),
    (ERROR_OBJECT_REGISTERED, "Object already registered"),
    (ERROR_OBJECT_NOT_MAPPED, "Object not mapped"),
    (ERROR_OBJECT_NOT_VERSIONED, "Static objects cannot be committed"),
    (ERROR_OBJECT_NOT_MASTER, "Operation needs the master object"),
    (ERROR_OBJECT_MAP_TIMEOUT, "Timeout mapping object"),
    (ERROR_OBJECT_NOT_FOUND, "Object not found on master"),
    (ERROR_OBJECT_VERSION_UNAVAILABLE, "Requested object version no longer retained"),
    (ERROR_OBJECT_SYNC_TIMEOUT, "Timeout syncing object"),
    (ERROR_OBJECT_VERSION_GAP, "Object lost versions"),
    (ERROR_OBJECT_VERSION_REGRESSION, "Cannot sync object to an older version"),
    (ERROR_OBJECT_INVALID_VERSION, "Invalid object version"),
    (ERROR_OBJECT_PAYLOAD, "Malformed object data"),
    (ERROR_BARRIER_TIMEOUT, "Timeout entering barrier"),
    (ERROR_BARRIER_MASTER_UNREACHABLE, "Barrier master unreachable"),
    (ERROR_QUEUE_TIMEOUT, "Timeout popping queue item"),
    (ERROR_QUEUE_NOT_MAPPED, "Queue not mapped"),
    (ERROR_QUEUE_PAYLOAD, "Malformed queue item"),
];

/// Adds the descriptions of this crate's error codes
pub fn register_error_strings(registry: &ErrorRegistry) {
    registry.set_strings(ERROR_STRINGS);
}

impl ErrorCoded for NodeError {
    fn code(&self) -> ErrorCode {
        match self {
            NodeError::NotListening { .. } => ERROR_NODE_NOT_LISTENING,
            NodeError::AlreadyStarted { .. } => ERROR_NODE_ALREADY_STARTED,
            NodeError::Connection(_) => ERROR_NODE_CONNECTION,
            NodeError::ConnectTimeout { .. } => ERROR_NODE_CONNECT_TIMEOUT,
            NodeError::Refused { .. } => ERROR_NODE_REFUSED,
            NodeError::SelfConnect => ERROR_NODE_SELF_CONNECT,
            NodeError::NotConnected { .. } => ERROR_NODE_NOT_CONNECTED,
            NodeError::RequestTimeout { .. } => ERROR_NODE_REQUEST_TIMEOUT,
            NodeError::InvalidPacketType { .. } => ERROR_NODE_PACKET_TYPE,
            NodeError::Resource { .. } => ERROR_NODE_RESOURCE,
        }
    }
}

impl ErrorCoded for ObjectError {
    fn code(&self) -> ErrorCode {
        match self {
            ObjectError::Node(error) => error.code(),
            ObjectError::AlreadyRegistered { .. } => ERROR_OBJECT_REGISTERED,
            ObjectError::NotMapped { .. } => ERROR_OBJECT_NOT_MAPPED,
            ObjectError::NotVersioned { .. } => ERROR_OBJECT_NOT_VERSIONED,
            ObjectError::NotMaster { .. } => ERROR_OBJECT_NOT_MASTER,
            ObjectError::MapTimeout { .. } => ERROR_OBJECT_MAP_TIMEOUT,
            ObjectError::NotFound { .. } => ERROR_OBJECT_NOT_FOUND,
            ObjectError::VersionUnavailable { .. } => ERROR_OBJECT_VERSION_UNAVAILABLE,
            ObjectError::SyncTimeout { .. } => ERROR_OBJECT_SYNC_TIMEOUT,
            ObjectError::VersionGap { .. } => ERROR_OBJECT_VERSION_GAP,
            ObjectError::VersionRegression { .. } => ERROR_OBJECT_VERSION_REGRESSION,
            ObjectError::InvalidVersion { .. } => ERROR_OBJECT_INVALID_VERSION,
            ObjectError::Payload(_) => ERROR_OBJECT_PAYLOAD,
        }
    }
}

impl ErrorCoded for BarrierError {
    fn code(&self) -> ErrorCode {
        match self {
            BarrierError::Object(error) => error.code(),
            BarrierError::Timeout { .. } => ERROR_BARRIER_TIMEOUT,
            BarrierError::MasterUnreachable { .. } => ERROR_BARRIER_MASTER_UNREACHABLE,
        }
    }
}

impl ErrorCoded for QueueError {
    fn code(&self) -> ErrorCode {
        match self {
            QueueError::Object(error) => error.code(),
            QueueError::Node(error) => error.code(),
            QueueError::Timeout { .. } => ERROR_QUEUE_TIMEOUT,
            QueueError::NotMapped { .. } => ERROR_QUEUE_NOT_MAPPED,
            QueueError::Payload(_) => ERROR_QUEUE_PAYLOAD,
        }
    }
}
