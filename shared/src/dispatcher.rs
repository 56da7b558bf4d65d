use std::{collections::HashMap, sync::Arc, sync::RwLock};

use log::trace;
use thiserror::Error;

use coterie_serde::SerdeErr;

use crate::{
    command::{Command, CommandQueue},
    connection::ConnectionError,
    packet::{error::PacketError, packet_type::PacketType},
    sync::{read, write},
    types::ObjectId,
};

/// Errors raised while routing or handling a received command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No handler registered for this command id
    #[error("No handler for command {command} of packet type {packet_type:?}")]
    UnknownCommand {
        packet_type: PacketType,
        command: u32,
    },

    /// Object-family packet for an object not attached to this node
    #[error("No object {object_id} attached to receive command {command}")]
    UnknownObject { object_id: ObjectId, command: u32 },

    /// The destination queue was closed
    #[error("Command queue closed, dropped command {command}")]
    QueueClosed { command: u32 },

    #[error("Malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("Malformed command payload: {0}")]
    Serde(#[from] SerdeErr),

    #[error("Connection error while handling command: {0}")]
    Connection(#[from] ConnectionError),

    /// The handler rejected the command
    #[error("Command {command} rejected: {reason}")]
    Rejected { command: u32, reason: String },
}

pub type CommandHandler = Arc<dyn Fn(Command) -> Result<(), DispatchError> + Send + Sync>;

#[derive(Clone)]
struct Registration {
    handler: CommandHandler,
    queue: Option<CommandQueue>,
}

/// Per-entity routing table from command id to handler. A handler runs
/// inline on the dispatching thread unless a queue was given, in which case
/// the command is pushed there for the queue's worker.
#[derive(Default)]
pub struct Dispatcher {
    table: RwLock<HashMap<u32, Registration>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers, or replaces, the handler for `command`
    pub fn register_command<F>(&self, command: u32, handler: F, queue: Option<CommandQueue>)
    where
        F: Fn(Command) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        write(&self.table).insert(
            command,
            Registration {
                handler: Arc::new(handler),
                queue,
            },
        );
    }

    pub fn deregister_command(&self, command: u32) -> bool {
        write(&self.table).remove(&command).is_some()
    }

    pub fn is_registered(&self, command: u32) -> bool {
        read(&self.table).contains_key(&command)
    }

    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        let id = command.command();
        let registration = read(&self.table).get(&id).cloned();
        let Some(registration) = registration else {
            return Err(DispatchError::UnknownCommand {
                packet_type: command.packet_type(),
                command: id,
            });
        };

        match registration.queue {
            None => (registration.handler)(command),
            Some(queue) => {
                trace!("queueing command {}", id);
                if queue.push(command, registration.handler) {
                    Ok(())
                } else {
                    Err(DispatchError::QueueClosed { command: id })
                }
            }
        }
    }
}
