use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Condvar, Mutex, Weak},
    time::Duration,
};

use thiserror::Error;

use coterie_serde::{ByteReader, ConstByteLength, Serde};

use crate::{
    dispatcher::CommandHandler,
    packet::{
        error::PacketError,
        header::{PacketHeader, HEADER_SIZE},
        packet_type::PacketType,
    },
    sync::{lock, wait_until},
    types::{NodeId, ObjectId},
};

// Free list shared by a cache and the commands allocated from it
struct CachePool {
    free: Vec<Vec<u8>>,
    capacity: usize,
}

/// Pool of receive buffers. Buffers of dropped commands come back here
/// instead of being freed, up to `capacity` of them.
#[derive(Clone)]
pub struct CommandCache {
    pool: Arc<Mutex<CachePool>>,
}

impl CommandCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Arc::new(Mutex::new(CachePool {
                free: Vec::new(),
                capacity,
            })),
        }
    }

    /// A zeroed buffer of exactly `size` bytes, reused when possible
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        let reused = lock(&self.pool).free.pop();
        match reused {
            Some(mut buffer) => {
                buffer.clear();
                buffer.resize(size, 0);
                buffer
            }
            None => vec![0u8; size],
        }
    }

    /// Wraps a complete received packet into a command
    pub fn command(
        &self,
        packet: Vec<u8>,
        sender: NodeId,
        local_node: NodeId,
    ) -> Result<Command, PacketError> {
        let header = match PacketHeader::parse(&packet) {
            Ok(header) => header,
            Err(error) => {
                self.release(packet);
                return Err(error);
            }
        };
        if header.size as usize != packet.len() {
            let size = packet.len();
            self.release(packet);
            return Err(PacketError::Truncated {
                size: size as u64,
                header_size: HEADER_SIZE,
            });
        }
        if header.packet_type.is_object_family()
            && packet.len() < HEADER_SIZE + ObjectId::const_byte_length()
        {
            let size = packet.len();
            self.release(packet);
            return Err(PacketError::MissingObjectId { size });
        }

        Ok(Command {
            inner: Arc::new(CommandInner {
                buffer: packet,
                header,
                sender,
                local_node,
                pool: Arc::downgrade(&self.pool),
            }),
        })
    }

    /// Number of pooled buffers
    pub fn free_count(&self) -> usize {
        lock(&self.pool).free.len()
    }

    /// Frees every pooled buffer
    pub fn flush(&self) {
        lock(&self.pool).free.clear();
    }

    fn release(&self, buffer: Vec<u8>) {
        release_to(&self.pool, buffer);
    }
}

fn release_to(pool: &Mutex<CachePool>, buffer: Vec<u8>) {
    let mut pool = lock(pool);
    if pool.free.len() < pool.capacity {
        pool.free.push(buffer);
    }
}

struct CommandInner {
    buffer: Vec<u8>,
    header: PacketHeader,
    sender: NodeId,
    local_node: NodeId,
    pool: Weak<Mutex<CachePool>>,
}

impl Drop for CommandInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            release_to(&pool, std::mem::take(&mut self.buffer));
        }
    }
}

/// One received packet. Cloning retains it; the buffer goes back to the
/// cache when the last clone is dropped.
#[derive(Clone)]
pub struct Command {
    inner: Arc<CommandInner>,
}

impl Command {
    pub fn header(&self) -> &PacketHeader {
        &self.inner.header
    }

    pub fn packet_type(&self) -> PacketType {
        self.inner.header.packet_type
    }

    /// Command id within the packet family
    pub fn command(&self) -> u32 {
        self.inner.header.command
    }

    pub fn size(&self) -> usize {
        self.inner.buffer.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.buffer
    }

    /// Node that sent the packet
    pub fn sender(&self) -> NodeId {
        self.inner.sender
    }

    /// Node that received the packet
    pub fn local_node(&self) -> NodeId {
        self.inner.local_node
    }

    /// Addressed object of an object-family packet
    pub fn object_id(&self) -> Option<ObjectId> {
        if !self.packet_type().is_object_family() {
            return None;
        }
        let mut reader = ByteReader::new(&self.inner.buffer[HEADER_SIZE..]);
        ObjectId::de(&mut reader).ok()
    }

    /// Reader over the packet body: after the header, and after the object
    /// id for object-family packets
    pub fn reader(&self) -> ByteReader<'_> {
        let mut offset = HEADER_SIZE;
        if self.packet_type().is_object_family() {
            offset += ObjectId::const_byte_length();
        }
        ByteReader::new(&self.inner.buffer[offset..])
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("type", &self.packet_type())
            .field("command", &self.command())
            .field("size", &self.size())
            .field("sender", &self.sender())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    #[error("Timed out waiting for a command")]
    Timeout,
    /// The queue was closed and every queued command was handed out
    #[error("Command queue closed")]
    Closed,
}

struct QueueState {
    items: VecDeque<(Command, CommandHandler)>,
    closed: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    pushed: Condvar,
}

/// Ordered multi-producer queue of commands waiting to be handled on a
/// worker thread. Clones share the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<QueueShared>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    closed: false,
                }),
                pushed: Condvar::new(),
            }),
        }
    }

    /// Appends and wakes one waiting worker. A closed queue rejects the
    /// command and returns false.
    pub fn push(&self, command: Command, handler: CommandHandler) -> bool {
        let mut state = lock(&self.shared.state);
        if state.closed {
            return false;
        }
        state.items.push_back((command, handler));
        self.shared.pushed.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<(Command, CommandHandler)> {
        lock(&self.shared.state).items.pop_front()
    }

    /// Blocks until a command is queued. After `close`, the remaining
    /// commands are still handed out before `PopError::Closed`.
    pub fn pop(&self, timeout: Option<Duration>) -> Result<(Command, CommandHandler), PopError> {
        let state = lock(&self.shared.state);
        let (mut state, ready) = wait_until(&self.shared.pushed, state, timeout, |state| {
            state.closed || !state.items.is_empty()
        });
        if !ready {
            return Err(PopError::Timeout);
        }
        state.items.pop_front().ok_or(PopError::Closed)
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting commands and wakes every waiter
    pub fn close(&self) {
        lock(&self.shared.state).closed = true;
        self.shared.pushed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
