use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use log::{debug, trace};

use coterie_shared::{lock, InstanceId, NodeId, ObjectId, Version, VersionList};

struct Cached {
    data: Arc<Vec<u8>>,
    added: Instant,
}

struct Item {
    /// Master node the data came from
    from: NodeId,
    /// Instance of the master object on that node
    master_instance: InstanceId,
    /// A run of consecutive versions
    versions: VersionList<Cached>,
    /// Tick of the last add or lookup, for eviction
    used: u64,
}

#[derive(Default)]
struct Items {
    items: HashMap<ObjectId, Item>,
    size: usize,
    tick: u64,
}

impl Items {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn release_item(&mut self, object_id: &ObjectId) {
        if let Some(item) = self.items.remove(object_id) {
            self.size -= item.versions.iter().map(|(_, cached)| cached.data.len()).sum::<usize>();
        }
    }
}

/// Instance data of objects this node received, by object and version.
/// Mapping an object at a cached version needs no instance data from the
/// master. Filled by map replies, by commits of instance objects and by
/// masters pushing their data.
///
/// The cache keeps at most `max_size` bytes. When full it drops whole
/// objects, least recently used first, down to 80% of that.
pub struct InstanceCache {
    max_size: usize,
    items: Mutex<Items>,
    hits: AtomicU64,
}

/// Cached versions of one object. The data stays alive as long as the
/// snapshot does, even if the cache drops it meanwhile.
#[derive(Debug, Clone)]
pub struct CachedInstance {
    pub from: NodeId,
    pub master_instance: InstanceId,
    pub versions: Vec<(Version, Arc<Vec<u8>>)>,
}

impl CachedInstance {
    pub fn first_version(&self) -> Option<Version> {
        self.versions.first().map(|(version, _)| *version)
    }

    pub fn last_version(&self) -> Option<Version> {
        self.versions.last().map(|(version, _)| *version)
    }

    pub fn get(&self, version: Version) -> Option<&Arc<Vec<u8>>> {
        self.versions
            .iter()
            .find(|(cached, _)| *cached == version)
            .map(|(_, data)| data)
    }
}

impl InstanceCache {
    /// A cache of `max_size` bytes; 0 disables it
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            items: Mutex::new(Items::default()),
            hits: AtomicU64::new(0),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes of instance data held
    pub fn size(&self) -> usize {
        lock(&self.items).size
    }

    /// Objects with cached data
    pub fn len(&self) -> usize {
        lock(&self.items).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mappings served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds the instance data of `version`. Data from another master, or
    /// another registration of it, replaces what was cached; a version that
    /// does not follow the newest cached one starts a new run. Old and
    /// duplicate versions are ignored.
    pub fn add(
        &self,
        object_id: ObjectId,
        from: NodeId,
        master_instance: InstanceId,
        version: Version,
        data: Vec<u8>,
    ) -> bool {
        if data.len() > self.max_size {
            return false;
        }
        let mut items = lock(&self.items);
        let tick = items.touch();

        let mut dropped = 0;
        let item = items.items.entry(object_id).or_insert_with(|| Item {
            from,
            master_instance,
            versions: VersionList::new(),
            used: tick,
        });
        let restart = match item.versions.last_version() {
            _ if item.from != from || item.master_instance != master_instance => true,
            Some(last) if last >= version => return false,
            Some(last) => last + 1 != version,
            None => false,
        };
        if restart {
            dropped = item.versions.iter().map(|(_, cached)| cached.data.len()).sum();
            item.versions.clear();
            item.from = from;
            item.master_instance = master_instance;
        }
        item.used = tick;
        let size = data.len();
        // the run only grows at the back, so the insert cannot collide
        let _ = item.versions.try_insert(
            version,
            Cached {
                data: Arc::new(data),
                added: Instant::now(),
            },
        );
        items.size = items.size + size - dropped;
        trace!("{}: cached version {} ({} bytes)", object_id, version, size);

        self.release_items(&mut items, &object_id);
        true
    }

    /// Snapshot of what is cached for `object_id`
    pub fn get(&self, object_id: &ObjectId) -> Option<CachedInstance> {
        let mut items = lock(&self.items);
        let tick = items.touch();
        let item = items.items.get_mut(object_id)?;
        item.used = tick;
        Some(CachedInstance {
            from: item.from,
            master_instance: item.master_instance,
            versions: item
                .versions
                .iter()
                .map(|(version, cached)| (*version, cached.data.clone()))
                .collect(),
        })
    }

    pub fn erase(&self, object_id: &ObjectId) -> bool {
        let mut items = lock(&self.items);
        let known = items.items.contains_key(object_id);
        items.release_item(object_id);
        known
    }

    /// Drops everything received from `node_id`
    pub fn remove_node(&self, node_id: &NodeId) {
        let mut items = lock(&self.items);
        let stale: Vec<ObjectId> = items
            .items
            .iter()
            .filter(|(_, item)| item.from == *node_id)
            .map(|(object_id, _)| *object_id)
            .collect();
        for object_id in &stale {
            items.release_item(object_id);
        }
        if !stale.is_empty() {
            debug!("Dropped cached data of {} objects from {}", stale.len(), node_id);
        }
    }

    /// Drops versions cached longer than `max_age` ago
    pub fn expire(&self, max_age: Duration) {
        let Some(limit) = Instant::now().checked_sub(max_age) else {
            return;
        };
        let mut items = lock(&self.items);
        let mut released = 0;
        for item in items.items.values_mut() {
            while item
                .versions
                .front()
                .is_some_and(|(_, cached)| cached.added <= limit)
            {
                if let Some((_, cached)) = item.versions.pop_front() {
                    released += cached.data.len();
                }
            }
        }
        items.size -= released;
        items.items.retain(|_, item| !item.versions.is_empty());
    }

    pub fn clear(&self) {
        let mut items = lock(&self.items);
        items.items.clear();
        items.size = 0;
    }

    /// Evicts least recently used objects other than `keep` until the
    /// cache is back under its target
    fn release_items(&self, items: &mut Items, keep: &ObjectId) {
        if items.size <= self.max_size {
            return;
        }
        let target = self.max_size / 10 * 8;
        let mut by_use: Vec<(u64, ObjectId)> = items
            .items
            .iter()
            .filter(|(object_id, _)| *object_id != keep)
            .map(|(object_id, item)| (item.used, *object_id))
            .collect();
        by_use.sort_unstable();

        for (_, object_id) in by_use {
            if items.size <= target {
                break;
            }
            items.release_item(&object_id);
        }
        // the newest object alone may still exceed the target
        if items.size > self.max_size {
            if let Some(item) = items.items.get_mut(keep) {
                while items.size > target && item.versions.len() > 1 {
                    if let Some((_, cached)) = item.versions.pop_front() {
                        items.size -= cached.data.len();
                    }
                }
            }
        }
        trace!("Instance cache at {} of {} bytes", items.size, self.max_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(size: usize) -> Vec<u8> {
        vec![7; size]
    }

    #[test]
    fn consecutive_versions_form_a_run() {
        let cache = InstanceCache::new(1024);
        let object_id = ObjectId::generate();
        let master = NodeId::generate();
        assert!(cache.add(object_id, master, 1, 3, data(4)));
        assert!(cache.add(object_id, master, 1, 4, data(4)));
        // old and duplicate versions are ignored
        assert!(!cache.add(object_id, master, 1, 4, data(4)));
        assert!(!cache.add(object_id, master, 1, 2, data(4)));

        let cached = cache.get(&object_id).unwrap();
        assert_eq!(cached.from, master);
        assert_eq!((cached.first_version(), cached.last_version()), (Some(3), Some(4)));
        assert_eq!(cache.size(), 8);
    }

    #[test]
    fn hole_or_other_master_starts_over() {
        let cache = InstanceCache::new(1024);
        let object_id = ObjectId::generate();
        let master = NodeId::generate();
        cache.add(object_id, master, 1, 1, data(4));
        cache.add(object_id, master, 1, 2, data(4));

        cache.add(object_id, master, 1, 5, data(4));
        let cached = cache.get(&object_id).unwrap();
        assert_eq!(cached.first_version(), Some(5));
        assert_eq!(cache.size(), 4);

        let other = NodeId::generate();
        cache.add(object_id, other, 1, 1, data(2));
        let cached = cache.get(&object_id).unwrap();
        assert_eq!(cached.from, other);
        assert_eq!(cached.versions.len(), 1);
        assert_eq!(cache.size(), 2);

        // a new registration of the master restarts versions from zero
        assert!(cache.add(object_id, other, 2, 0, data(2)));
        let cached = cache.get(&object_id).unwrap();
        assert_eq!(cached.master_instance, 2);
        assert_eq!(cached.first_version(), Some(0));
    }

    #[test]
    fn full_cache_drops_least_recently_used() {
        let cache = InstanceCache::new(100);
        let master = NodeId::generate();
        let old = ObjectId::generate();
        let recent = ObjectId::generate();
        let newest = ObjectId::generate();
        cache.add(old, master, 1, 0, data(40));
        cache.add(recent, master, 1, 0, data(40));
        assert!(cache.get(&recent).is_some());
        cache.add(newest, master, 1, 0, data(40));

        assert!(cache.get(&old).is_none());
        assert!(cache.get(&recent).is_some());
        assert!(cache.get(&newest).is_some());
        assert_eq!(cache.size(), 80);
    }

    #[test]
    fn snapshot_outlives_eviction() {
        let cache = InstanceCache::new(10);
        let object_id = ObjectId::generate();
        cache.add(object_id, NodeId::generate(), 1, 0, data(8));
        let cached = cache.get(&object_id).unwrap();
        assert!(cache.erase(&object_id));
        assert!(cache.is_empty());
        assert_eq!(cached.get(0).map(|data| data.len()), Some(8));
    }

    #[test]
    fn disabled_cache_keeps_nothing() {
        let cache = InstanceCache::new(0);
        assert!(!cache.add(ObjectId::generate(), NodeId::generate(), 1, 0, data(1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn removing_a_node_drops_its_objects() {
        let cache = InstanceCache::new(1024);
        let (gone, stays) = (NodeId::generate(), NodeId::generate());
        let object_id = ObjectId::generate();
        cache.add(object_id, gone, 1, 0, data(4));
        cache.add(ObjectId::generate(), stays, 1, 0, data(4));

        cache.remove_node(&gone);
        assert!(cache.get(&object_id).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn expire_drops_old_versions() {
        let cache = InstanceCache::new(1024);
        let object_id = ObjectId::generate();
        cache.add(object_id, NodeId::generate(), 1, 0, data(4));
        cache.expire(Duration::from_secs(60));
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        cache.expire(Duration::ZERO);
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }
}
