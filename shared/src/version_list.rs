use std::collections::VecDeque;

use thiserror::Error;

use crate::types::Version;

/// Errors that can occur during VersionList operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionListError {
    /// Attempted to insert a version that is already held
    #[error("Duplicate version {version} not allowed in VersionList")]
    DuplicateVersion { version: Version },

    /// The list holds its maximum number of entries
    #[error("VersionList full ({capacity} entries), cannot insert version {version}")]
    Full { version: Version, capacity: usize },
}

/// Items ordered by version, oldest first. Inserts scan from the back since
/// versions mostly arrive in order.
pub struct VersionList<T> {
    list: VecDeque<(Version, T)>,
    capacity: Option<usize>,
}

impl<T> VersionList<T> {
    pub fn new() -> Self {
        Self {
            list: VecDeque::new(),
            capacity: None,
        }
    }

    /// A list refusing inserts past `capacity` entries
    pub fn bounded(capacity: usize) -> Self {
        Self {
            list: VecDeque::new(),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn front(&self) -> Option<&(Version, T)> {
        self.list.front()
    }

    pub fn back(&self) -> Option<&(Version, T)> {
        self.list.back()
    }

    pub fn pop_front(&mut self) -> Option<(Version, T)> {
        self.list.pop_front()
    }

    /// Oldest version held
    pub fn first_version(&self) -> Option<Version> {
        self.list.front().map(|(version, _)| *version)
    }

    /// Newest version held
    pub fn last_version(&self) -> Option<Version> {
        self.list.back().map(|(version, _)| *version)
    }

    pub fn contains(&self, version: Version) -> bool {
        self.get(version).is_some()
    }

    pub fn get(&self, version: Version) -> Option<&T> {
        for (held, item) in self.list.iter().rev() {
            if *held == version {
                return Some(item);
            }
            if *held < version {
                return None;
            }
        }
        None
    }

    /// Inserts keeping version order. Fails on duplicates and when full.
    pub fn try_insert(&mut self, version: Version, item: T) -> Result<(), VersionListError> {
        let mut index = self.list.len();
        loop {
            if index == 0 {
                break;
            }
            let held = self.list[index - 1].0;
            if held == version {
                return Err(VersionListError::DuplicateVersion { version });
            }
            if held < version {
                break;
            }
            index -= 1;
        }

        if let Some(capacity) = self.capacity {
            if self.list.len() >= capacity {
                return Err(VersionListError::Full { version, capacity });
            }
        }
        self.list.insert(index, (version, item));
        Ok(())
    }

    /// Drops every entry older than `version`
    pub fn remove_before(&mut self, version: Version) -> usize {
        let mut removed = 0;
        while let Some((held, _)) = self.list.front() {
            if *held >= version {
                break;
            }
            self.list.pop_front();
            removed += 1;
        }
        removed
    }

    /// Keeps only the newest `count` entries
    pub fn truncate_front(&mut self, count: usize) {
        while self.list.len() > count {
            self.list.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Version, T)> {
        self.list.iter()
    }
}

impl<T> Default for VersionList<T> {
    fn default() -> Self {
        Self::new()
    }
}
