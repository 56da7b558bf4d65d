use std::{default::Default, time::Duration};

/// Tuning knobs of a local node, cloned into every node created from a
/// `Context`
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Upper bound for every blocking wait on a remote node: connect
    /// handshakes, mapping, syncing, barriers and queue pops.
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    /// How long the receiver thread blocks in one select before re-checking
    /// whether the node is shutting down
    pub select_timeout: Duration,
    /// Receive buffers kept for reuse
    pub command_cache_capacity: usize,
    /// Deltas a slave buffers ahead of its applied version before it gives
    /// up and reports a version gap
    pub max_buffered_versions: usize,
    /// Consecutive errors on one connection before it is dropped
    pub max_select_errors: u32,
    /// Bytes of received instance data kept for later mappings; 0 turns
    /// the instance cache off
    pub instance_cache_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            select_timeout: Duration::from_millis(500),
            command_cache_capacity: 256,
            max_buffered_versions: 1024,
            max_select_errors: 5,
            instance_cache_size: 16 << 20,
        }
    }
}

/// Retained history of a master object
#[derive(Clone, Debug, Default)]
pub struct ObjectConfig {
    /// Versions kept in addition to the head. Slaves may map any retained
    /// version; 0 keeps only the head.
    pub auto_obsolete: u32,
}

/// Prefetching behavior of a queue slave
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// Request more items once this many or fewer are left locally
    pub prefetch_mark: usize,
    /// Items requested per round trip
    pub prefetch_amount: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefetch_mark: 0,
            prefetch_amount: 1,
        }
    }
}
