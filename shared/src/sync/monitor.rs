use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

use super::{lock, wait_until};

/// A value other threads can block on until it reaches a wanted state.
pub struct Monitor<T> {
    value: Mutex<T>,
    changed: Condvar,
}

impl<T: Clone + PartialEq> Monitor<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> T {
        lock(&self.value).clone()
    }

    pub fn set(&self, value: T) {
        let mut guard = lock(&self.value);
        *guard = value;
        self.changed.notify_all();
    }

    /// Modifies the value in place and wakes every waiter
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = lock(&self.value);
        let result = f(&mut guard);
        self.changed.notify_all();
        result
    }

    /// Blocks until the value equals `expected`; false on timeout
    pub fn wait_eq(&self, expected: &T, timeout: Option<Duration>) -> bool {
        self.wait_for(|value| value == expected, timeout).is_some()
    }

    /// Blocks until the value differs from `current`, returning the new value
    pub fn wait_ne(&self, current: &T, timeout: Option<Duration>) -> Option<T> {
        self.wait_for(|value| value != current, timeout)
    }

    /// Blocks until `predicate` holds, returning the value that satisfied it
    pub fn wait_for(
        &self,
        mut predicate: impl FnMut(&T) -> bool,
        timeout: Option<Duration>,
    ) -> Option<T> {
        let guard = lock(&self.value);
        let (guard, done) = wait_until(&self.changed, guard, timeout, |value| predicate(value));
        done.then(|| guard.clone())
    }
}

impl<T: Clone + PartialEq + Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + Ord> Monitor<T> {
    /// Blocks until the value is at least `minimum`
    pub fn wait_ge(&self, minimum: &T, timeout: Option<Duration>) -> Option<T> {
        self.wait_for(|value| value >= minimum, timeout)
    }
}
