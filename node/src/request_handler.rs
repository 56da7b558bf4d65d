use std::{
    any::Any,
    collections::HashMap,
    sync::{Condvar, Mutex},
    time::Duration,
};

use log::debug;
use thiserror::Error;

use coterie_shared::{lock, wait_until, RequestId, REQUEST_INVALID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Request {request_id} timed out")]
    Timeout { request_id: RequestId },

    #[error("Request {request_id} is not registered")]
    Unknown { request_id: RequestId },

    /// Served with a different result type than the waiter expects
    #[error("Request {request_id} was served with an unexpected result")]
    TypeMismatch { request_id: RequestId },
}

struct Requests {
    next: RequestId,
    pending: HashMap<RequestId, Option<Box<dyn Any + Send>>>,
}

/// Matches replies to outstanding requests. The requesting thread registers
/// a request, sends its packet and waits; the receiver thread serves the
/// request with the reply's result.
pub struct RequestHandler {
    requests: Mutex<Requests>,
    served: Condvar,
}

impl RequestHandler {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Requests {
                // replies meant for an earlier node in this process must not match
                next: fastrand::u32(..REQUEST_INVALID),
                pending: HashMap::new(),
            }),
            served: Condvar::new(),
        }
    }

    pub fn register(&self) -> RequestId {
        let mut requests = lock(&self.requests);
        loop {
            let id = requests.next;
            requests.next = requests.next.wrapping_add(1);
            if id != REQUEST_INVALID && !requests.pending.contains_key(&id) {
                requests.pending.insert(id, None);
                return id;
            }
        }
    }

    /// Hands `result` to the waiter. False if nobody waits for `request_id`,
    /// which happens when a reply arrives after its waiter timed out.
    pub fn serve<T: Send + 'static>(&self, request_id: RequestId, result: T) -> bool {
        let mut requests = lock(&self.requests);
        match requests.pending.get_mut(&request_id) {
            Some(slot) => {
                *slot = Some(Box::new(result));
                self.served.notify_all();
                true
            }
            None => {
                debug!("dropping reply for unknown request {}", request_id);
                false
            }
        }
    }

    /// Blocks until the request is served. The request is unregistered
    /// afterwards, also on timeout.
    pub fn wait<T: 'static>(
        &self,
        request_id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<T, RequestError> {
        let requests = lock(&self.requests);
        if !requests.pending.contains_key(&request_id) {
            return Err(RequestError::Unknown { request_id });
        }
        let (mut requests, served) = wait_until(&self.served, requests, timeout, |requests| {
            !matches!(requests.pending.get(&request_id), Some(None))
        });

        let slot = requests.pending.remove(&request_id);
        if !served {
            return Err(RequestError::Timeout { request_id });
        }
        match slot {
            Some(Some(result)) => result
                .downcast::<T>()
                .map(|result| *result)
                .map_err(|_| RequestError::TypeMismatch { request_id }),
            _ => Err(RequestError::Unknown { request_id }),
        }
    }

    pub fn unregister(&self, request_id: RequestId) -> bool {
        lock(&self.requests).pending.remove(&request_id).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.requests).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestHandler {
    fn default() -> Self {
        Self::new()
    }
}
