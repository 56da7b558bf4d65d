//! # Coterie Node
//! Cluster nodes that connect to each other, exchange commands and share
//! versioned distributed objects. A `LocalNode` listens for peers and
//! hosts objects; masters commit new versions that mapped slaves sync to.
//! Barriers and queues are built on the same objects.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

cfg_if! {
    if #[cfg(not(unix))]
    {
        compile_error!("the 'coterie-node' crate currently supports unix targets only");
    }
}

pub use coterie_shared as shared;

mod barrier;
mod error;
mod events;
mod instance_cache;
mod local_node;
mod node;
mod node_registry;
mod object;
mod packets;
mod queue;
mod request_handler;
mod session;

pub use barrier::{Barrier, BarrierData};
pub use error::*;
pub use events::NodeEvent;
pub use instance_cache::{CachedInstance, InstanceCache};
pub use local_node::{LocalNode, LocalNodeState};
pub use node::{DefaultNodeFactory, Node, NodeFactory, NodeState, NodeTypeFilter};
pub use node_registry::{NodeHandle, NodeRegistry};
pub use object::{ChangeType, DirtyBits, Distributable, MapRequest, Object};
pub use packets::TIMEOUT_INDEFINITE;
pub use queue::{QueueMaster, QueueSlave};
pub use request_handler::{RequestError, RequestHandler};
pub use session::{ObjectEntry, Session};
