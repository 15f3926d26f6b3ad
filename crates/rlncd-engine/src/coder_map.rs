//! Per-role coder registry.
//!
//! Tracks live coders by flow key, remembers the latest block per
//! `(src, dst)` path, and keeps a retired-key set so a finished generation
//! can never be revived: once a key retires, lookups yield `None` and the
//! kernel's stale frames for it fall on the floor.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use rlncd_core::types::{FlowKey, MeshAddr};
use tokio::task::JoinHandle;

/// Interface the map needs from a role coder.
pub trait MapCoder: Send + Sync + 'static {
    /// Reset state, compute budgets, solicit link data. Runs before the
    /// coder is published in the map.
    fn init(self: &Arc<Self>);

    /// Spawn the driver task that runs state handlers.
    fn start(self: &Arc<Self>) -> JoinHandle<()>;

    /// Housekeeping visit. Returns true when the coder should be retired.
    fn process(&self) -> bool;

    /// Whether the coder can still accept input (role-specific).
    fn is_valid(&self) -> bool;

    /// Stop the driver task.
    fn stop(&self);
}

struct Entry<C> {
    coder: Arc<C>,
    driver: JoinHandle<()>,
}

struct MapInner<C> {
    live: BTreeMap<FlowKey, Entry<C>>,
    latest_block: HashMap<(MeshAddr, MeshAddr), u16>,
    retired: HashSet<FlowKey>,
}

type Factory<C> = Box<dyn Fn(FlowKey) -> Arc<C> + Send + Sync>;

/// Registry of live coders for one role.
pub struct CoderMap<C> {
    inner: Mutex<MapInner<C>>,
    factory: Factory<C>,
}

impl<C: MapCoder> CoderMap<C> {
    pub fn new(factory: impl Fn(FlowKey) -> Arc<C> + Send + Sync + 'static) -> Self {
        Self {
            inner: Mutex::new(MapInner {
                live: BTreeMap::new(),
                latest_block: HashMap::new(),
                retired: HashSet::new(),
            }),
            factory: Box::new(factory),
        }
    }

    fn create(&self, inner: &mut MapInner<C>, key: FlowKey) -> Arc<C> {
        let coder = (self.factory)(key);
        coder.init();
        let driver = coder.start();
        tracing::trace!(%key, "created coder");
        inner.live.insert(
            key,
            Entry {
                coder: coder.clone(),
                driver,
            },
        );
        coder
    }

    /// Look up the coder for `key`, creating it when absent. Retired keys
    /// yield `None`.
    pub fn get_coder(&self, key: FlowKey) -> Option<Arc<C>> {
        let mut inner = self.inner.lock().expect("coder map poisoned");
        if inner.retired.contains(&key) {
            return None;
        }
        if let Some(entry) = inner.live.get(&key) {
            return Some(entry.coder.clone());
        }
        Some(self.create(&mut inner, key))
    }

    /// Look up a live coder without creating one.
    pub fn find_coder(&self, key: FlowKey) -> Option<Arc<C>> {
        let inner = self.inner.lock().expect("coder map poisoned");
        inner.live.get(&key).map(|e| e.coder.clone())
    }

    /// The coder for the latest block on `key`'s path, rolling over to a
    /// fresh block when the current coder is gone or no longer accepts
    /// input. Used by encoders only.
    pub fn get_latest_coder(&self, key: FlowKey) -> Arc<C> {
        let mut inner = self.inner.lock().expect("coder map poisoned");
        let path = key.path();
        let block = *inner.latest_block.entry(path).or_insert(0);

        let current = key.with_block(block);
        if let Some(entry) = inner.live.get(&current) {
            if entry.coder.is_valid() {
                return entry.coder.clone();
            }
        }

        let next = block.wrapping_add(1);
        inner.latest_block.insert(path, next);
        self.create(&mut inner, key.with_block(next))
    }

    /// Housekeeping sweep: visit every live coder, retire those done.
    pub fn process_coders(&self) {
        let mut inner = self.inner.lock().expect("coder map poisoned");
        let finished: Vec<FlowKey> = inner
            .live
            .iter()
            .filter(|(_, entry)| entry.coder.process())
            .map(|(key, _)| *key)
            .collect();

        for key in finished {
            if let Some(entry) = inner.live.remove(&key) {
                tracing::trace!(%key, "retiring coder");
                entry.coder.stop();
                entry.driver.abort();
            }
            inner.retired.insert(key);
        }
    }

    /// Stop every driver; used at daemon shutdown.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("coder map poisoned");
        let keys: Vec<FlowKey> = inner.live.keys().copied().collect();
        for key in keys {
            if let Some(entry) = inner.live.remove(&key) {
                entry.coder.stop();
                entry.driver.abort();
            }
        }
    }

    /// Latest block recorded for a path, if any.
    pub fn latest_block(&self, src: MeshAddr, dst: MeshAddr) -> Option<u16> {
        let inner = self.inner.lock().expect("coder map poisoned");
        inner.latest_block.get(&(src, dst)).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("coder map poisoned").live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeCoder {
        key: FlowKey,
        valid: AtomicBool,
        done: AtomicBool,
        initialized: AtomicBool,
    }

    impl FakeCoder {
        fn new(key: FlowKey) -> Arc<Self> {
            Arc::new(Self {
                key,
                valid: AtomicBool::new(true),
                done: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
            })
        }
    }

    impl MapCoder for FakeCoder {
        fn init(self: &Arc<Self>) {
            self.initialized.store(true, Ordering::SeqCst);
        }

        fn start(self: &Arc<Self>) -> JoinHandle<()> {
            tokio::spawn(async {})
        }

        fn process(&self) -> bool {
            self.done.load(Ordering::SeqCst)
        }

        fn is_valid(&self) -> bool {
            self.valid.load(Ordering::SeqCst)
        }

        fn stop(&self) {}
    }

    fn key(block: u16) -> FlowKey {
        FlowKey::new(MeshAddr::new([1; 6]), MeshAddr::new([2; 6]), block)
    }

    fn map() -> CoderMap<FakeCoder> {
        CoderMap::new(FakeCoder::new)
    }

    #[tokio::test]
    async fn get_coder_creates_once() {
        let m = map();
        let a = m.get_coder(key(0)).unwrap();
        assert!(a.initialized.load(Ordering::SeqCst));
        let b = m.get_coder(key(0)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn retired_keys_stay_absent() {
        let m = map();
        let c = m.get_coder(key(0)).unwrap();
        c.done.store(true, Ordering::SeqCst);
        m.process_coders();

        assert!(m.is_empty());
        assert!(m.get_coder(key(0)).is_none());
        assert!(m.find_coder(key(0)).is_none());
        // Other blocks are unaffected.
        assert!(m.get_coder(key(1)).is_some());
    }

    #[tokio::test]
    async fn find_never_creates() {
        let m = map();
        assert!(m.find_coder(key(0)).is_none());
        assert!(m.is_empty());
    }

    #[tokio::test]
    async fn latest_coder_reuses_valid() {
        let m = map();
        let a = m.get_latest_coder(key(9));
        let b = m.get_latest_coder(key(3));
        // Block in the request key is ignored; same path, same coder.
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.len(), 1);
    }

    #[tokio::test]
    async fn latest_coder_rolls_over_when_invalid() {
        let m = map();
        // No coder exists at the recorded block, so the first request
        // already bumps to block 1.
        let a = m.get_latest_coder(key(0));
        assert_eq!(a.key.block, 1);

        a.valid.store(false, Ordering::SeqCst);
        let b = m.get_latest_coder(key(0));
        assert_eq!(b.key.block, 2);
        assert!(!Arc::ptr_eq(&a, &b));

        let src = MeshAddr::new([1; 6]);
        let dst = MeshAddr::new([2; 6]);
        assert_eq!(m.latest_block(src, dst), Some(2));
    }

    #[tokio::test]
    async fn latest_block_is_monotone() {
        let m = map();
        let src = MeshAddr::new([1; 6]);
        let dst = MeshAddr::new([2; 6]);

        let mut last = 0u16;
        for _ in 0..5 {
            let c = m.get_latest_coder(key(0));
            c.valid.store(false, Ordering::SeqCst);
            let block = m.latest_block(src, dst).unwrap_or(0);
            assert!(block >= last);
            last = block;
        }
    }

    #[tokio::test]
    async fn process_retires_only_finished() {
        let m = map();
        let a = m.get_coder(key(0)).unwrap();
        let _b = m.get_coder(key(1)).unwrap();
        a.done.store(true, Ordering::SeqCst);

        m.process_coders();
        assert_eq!(m.len(), 1);
        assert!(m.find_coder(key(1)).is_some());
    }
}
