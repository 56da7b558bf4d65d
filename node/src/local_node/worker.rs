use log::{debug, warn};

use coterie_shared::{CommandQueue, PopError};

/// Body of the command thread and of extra workers: runs queued handlers
/// in arrival order until the queue is closed and drained
pub(crate) fn run(name: &str, queue: CommandQueue) {
    debug!("{} started", name);
    loop {
        match queue.pop(None) {
            Ok((command, handler)) => {
                let received = command.clone();
                if let Err(error) = handler(command) {
                    warn!("{}: dropping {:?}: {}", name, received, error);
                }
            }
            Err(PopError::Closed) => break,
            Err(PopError::Timeout) => continue,
        }
    }
    debug!("{} stopped", name);
}
