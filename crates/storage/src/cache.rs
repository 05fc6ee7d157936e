//! Registry of opened datasets.
//!
//! Each configured dataset owns a slot guarded by its own mutex. Opening
//! happens while holding that slot lock only, so concurrent first access to
//! one dataset results in a single open while other datasets proceed
//! independently. Callers hold a [`DatasetHandle`]; dropping it releases the
//! reference. The idle sweep only closes datasets without references, and
//! takes the slot lock (non-blocking) so it cannot race an acquire.

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dataset::{DatasetDescriptor, OpenDataset, SourceFormat};
use crate::source::DataSource;
use crate::{MemorySource, SourceError, ZarrSource};

/// Default time a dataset may stay unused before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Opens the data source behind a descriptor.
pub trait DatasetOpener: Send + Sync {
    fn open(&self, descriptor: &DatasetDescriptor) -> Result<Box<dyn DataSource>, SourceError>;
}

/// Opens descriptors by their declared format.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceOpener;

impl DatasetOpener for SourceOpener {
    fn open(&self, descriptor: &DatasetDescriptor) -> Result<Box<dyn DataSource>, SourceError> {
        match descriptor.format {
            SourceFormat::Zarr => Ok(Box::new(ZarrSource::open(Path::new(&descriptor.path))?)),
            SourceFormat::Memory => Ok(Box::new(MemorySource::synthetic(descriptor.path.clone()))),
        }
    }
}

/// Lifetime counters of a [`DatasetCache`].
#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    open_failures: AtomicU64,
    closes: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatasetCacheStats {
    pub opens: u64,
    pub open_failures: u64,
    pub closes: u64,
    pub evictions: u64,
    /// Datasets currently open
    pub open: usize,
}

/// A cached open dataset plus its bookkeeping.
struct Entry {
    dataset: OpenDataset,
    refs: AtomicUsize,
    last_access: Mutex<Instant>,
    retired: AtomicBool,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl Entry {
    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_access.lock())
    }

    /// Close the source once; later calls are no-ops.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.dataset.close();
            self.counters.closes.fetch_add(1, Ordering::Relaxed);
            debug!(dataset = %self.dataset.identifier(), "closed dataset");
        }
    }
}

enum SlotState {
    Empty,
    Open(Arc<Entry>),
    /// Removed from the cache; acquirers must look the slot up again.
    Retired,
}

struct Slot {
    descriptor: DatasetDescriptor,
    state: Mutex<SlotState>,
}

/// Reference to an open dataset. Dropping it releases the reference.
pub struct DatasetHandle {
    entry: Arc<Entry>,
}

impl DatasetHandle {
    /// True when both handles refer to the same open dataset.
    pub fn same_dataset(&self, other: &DatasetHandle) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// References currently held on the dataset, this one included.
    pub fn ref_count(&self) -> usize {
        self.entry.refs.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("dataset", &self.entry.dataset)
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl Deref for DatasetHandle {
    type Target = OpenDataset;

    fn deref(&self) -> &OpenDataset {
        &self.entry.dataset
    }
}

impl Drop for DatasetHandle {
    fn drop(&mut self) {
        self.entry.touch();
        let remaining = self.entry.refs.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.entry.retired.load(Ordering::SeqCst) {
            self.entry.close();
        }
    }
}

pub struct DatasetCache {
    opener: Arc<dyn DatasetOpener>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    idle_timeout: Duration,
    counters: Arc<Counters>,
}

impl DatasetCache {
    pub fn new(opener: Arc<dyn DatasetOpener>, idle_timeout: Duration) -> Self {
        Self {
            opener,
            slots: Mutex::new(HashMap::new()),
            idle_timeout,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Open the dataset for `descriptor`, or share the already open one.
    ///
    /// Blocks while another caller opens the same descriptor. A descriptor
    /// that changed since the dataset was opened retires the old instance.
    pub fn acquire(&self, descriptor: &DatasetDescriptor) -> Result<DatasetHandle, SourceError> {
        loop {
            let slot = self.slot_for(descriptor);
            let mut state = slot.state.lock();

            match &*state {
                SlotState::Retired => continue,
                SlotState::Open(entry) => {
                    entry.refs.fetch_add(1, Ordering::SeqCst);
                    entry.touch();
                    return Ok(DatasetHandle {
                        entry: entry.clone(),
                    });
                }
                SlotState::Empty => {
                    let started = Instant::now();
                    let dataset = self
                        .opener
                        .open(descriptor)
                        .and_then(|source| OpenDataset::new(descriptor.clone(), source));

                    let dataset = match dataset {
                        Ok(dataset) => dataset,
                        Err(e) => {
                            self.counters.open_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(dataset = %descriptor.identifier, path = %descriptor.path, error = %e, "failed to open dataset");
                            return Err(e);
                        }
                    };

                    self.counters.opens.fetch_add(1, Ordering::Relaxed);
                    counter!("wmts_dataset_opens_total").increment(1);
                    info!(
                        dataset = %descriptor.identifier,
                        path = %descriptor.path,
                        variables = dataset.variables.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "opened dataset"
                    );

                    let entry = Arc::new(Entry {
                        dataset,
                        refs: AtomicUsize::new(1),
                        last_access: Mutex::new(Instant::now()),
                        retired: AtomicBool::new(false),
                        closed: AtomicBool::new(false),
                        counters: self.counters.clone(),
                    });
                    *state = SlotState::Open(entry.clone());
                    return Ok(DatasetHandle { entry });
                }
            }
        }
    }

    /// Give a handle back. Equivalent to dropping it.
    pub fn release(&self, handle: DatasetHandle) {
        drop(handle);
    }

    /// Close datasets that have no references and were idle for at least
    /// the idle timeout. Returns the number closed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let slots: Vec<Arc<Slot>> = self.slots.lock().values().cloned().collect();
        let mut evicted = 0;

        for slot in slots {
            // Busy slots are being opened or acquired; skip them this round
            let Some(mut state) = slot.state.try_lock() else {
                continue;
            };
            let SlotState::Open(entry) = &*state else {
                continue;
            };
            if entry.refs.load(Ordering::SeqCst) != 0 || entry.idle_for(now) < self.idle_timeout {
                continue;
            }

            entry.close();
            *state = SlotState::Empty;
            evicted += 1;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            counter!("wmts_dataset_evictions_total").increment(1);
            info!(dataset = %slot.descriptor.identifier, "evicted idle dataset");
        }

        evicted
    }

    /// Retire every slot whose descriptor is not in `current` (or differs).
    ///
    /// Retired datasets close as soon as their last handle is dropped.
    pub fn retain(&self, current: &[DatasetDescriptor]) -> usize {
        let stale: Vec<Arc<Slot>> = {
            let mut slots = self.slots.lock();
            let stale_ids: Vec<String> = slots
                .iter()
                .filter(|(id, slot)| {
                    !current
                        .iter()
                        .any(|d| &d.identifier == *id && d == &slot.descriptor)
                })
                .map(|(id, _)| id.clone())
                .collect();
            stale_ids.iter().filter_map(|id| slots.remove(id)).collect()
        };

        for slot in &stale {
            retire_slot(slot);
        }
        stale.len()
    }

    /// Close every dataset, e.g. on shutdown.
    pub fn close_all(&self) {
        let slots: Vec<Arc<Slot>> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            retire_slot(slot);
        }
    }

    /// True if the dataset is currently open.
    pub fn is_open(&self, identifier: &str) -> bool {
        let slot = self.slots.lock().get(identifier).cloned();
        slot.map(|s| matches!(&*s.state.lock(), SlotState::Open(_)))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> DatasetCacheStats {
        let slots: Vec<Arc<Slot>> = self.slots.lock().values().cloned().collect();
        let open = slots
            .iter()
            .filter(|s| matches!(s.state.try_lock().as_deref(), Some(SlotState::Open(_))))
            .count();
        DatasetCacheStats {
            opens: self.counters.opens.load(Ordering::Relaxed),
            open_failures: self.counters.open_failures.load(Ordering::Relaxed),
            closes: self.counters.closes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            open,
        }
    }

    /// Find or create the slot for a descriptor.
    fn slot_for(&self, descriptor: &DatasetDescriptor) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&descriptor.identifier) {
            if slot.descriptor == *descriptor {
                return slot.clone();
            }
            if let Some(old) = slots.remove(&descriptor.identifier) {
                debug!(dataset = %descriptor.identifier, "descriptor changed, retiring old dataset");
                // Retiring takes the slot lock; never do that under the map lock
                let new = new_slot(descriptor);
                slots.insert(descriptor.identifier.clone(), new.clone());
                drop(slots);
                retire_slot(&old);
                return new;
            }
        }
        let slot = new_slot(descriptor);
        slots.insert(descriptor.identifier.clone(), slot.clone());
        slot
    }
}

fn new_slot(descriptor: &DatasetDescriptor) -> Arc<Slot> {
    Arc::new(Slot {
        descriptor: descriptor.clone(),
        state: Mutex::new(SlotState::Empty),
    })
}

fn retire_slot(slot: &Slot) {
    let mut state = slot.state.lock();
    if let SlotState::Open(entry) = std::mem::replace(&mut *state, SlotState::Retired) {
        entry.retired.store(true, Ordering::SeqCst);
        if entry.refs.load(Ordering::SeqCst) == 0 {
            entry.close();
        } else {
            debug!(
                dataset = %slot.descriptor.identifier,
                refs = entry.refs.load(Ordering::SeqCst),
                "dataset retired, closing after release"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOpener {
        opens: AtomicUsize,
        delay: Duration,
    }

    impl CountingOpener {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                delay,
            })
        }
    }

    impl DatasetOpener for CountingOpener {
        fn open(&self, descriptor: &DatasetDescriptor) -> Result<Box<dyn DataSource>, SourceError> {
            std::thread::sleep(self.delay);
            self.opens.fetch_add(1, Ordering::SeqCst);
            if descriptor.path.contains("missing") {
                return Err(SourceError::open(&descriptor.path, "no such directory"));
            }
            Ok(Box::new(MemorySource::synthetic(descriptor.path.clone())))
        }
    }

    fn descriptor(id: &str) -> DatasetDescriptor {
        DatasetDescriptor::new(id, format!("memory://{}", id), SourceFormat::Memory)
    }

    #[test]
    fn test_concurrent_acquire_opens_once() {
        let opener = CountingOpener::new(Duration::from_millis(50));
        let cache = Arc::new(DatasetCache::new(opener.clone(), Duration::ZERO));
        let desc = descriptor("local");

        let handles: Vec<DatasetHandle> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.acquire(&desc).unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| h.same_dataset(&handles[0])));
        assert_eq!(handles[0].ref_count(), 8);

        // Referenced datasets are never evicted
        assert_eq!(cache.evict_idle(), 0);

        drop(handles);
        assert_eq!(cache.evict_idle(), 1);
        let stats = cache.stats();
        assert_eq!((stats.opens, stats.closes, stats.open), (1, 1, 0));
    }

    #[test]
    fn test_idle_threshold_is_respected() {
        let cache = DatasetCache::new(Arc::new(SourceOpener), Duration::from_secs(60));
        let handle = cache.acquire(&descriptor("local")).unwrap();
        cache.release(handle);

        assert_eq!(cache.evict_idle(), 0);
        assert!(cache.is_open("local"));
        assert_eq!(cache.evict_idle_at(Instant::now() + Duration::from_secs(61)), 1);
        assert!(!cache.is_open("local"));

        // Reacquiring reopens
        let _handle = cache.acquire(&descriptor("local")).unwrap();
        assert_eq!(cache.stats().opens, 2);
    }

    #[test]
    fn test_open_failure_is_not_cached() {
        let opener = CountingOpener::new(Duration::ZERO);
        let cache = DatasetCache::new(opener.clone(), Duration::ZERO);
        let desc = DatasetDescriptor::new("ghost", "/data/missing.zarr", SourceFormat::Zarr);

        assert!(cache.acquire(&desc).unwrap_err().is_open_failure());
        assert!(cache.acquire(&desc).is_err());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().open_failures, 2);
    }

    #[test]
    fn test_retired_dataset_closes_after_last_release() {
        let cache = DatasetCache::new(Arc::new(SourceOpener), DEFAULT_IDLE_TIMEOUT);
        let handle = cache.acquire(&descriptor("local")).unwrap();

        assert_eq!(cache.retain(&[descriptor("other")]), 1);
        assert_eq!(cache.stats().closes, 0);
        // The handle stays usable until dropped
        assert!(handle.variable("conc_chl").is_some());

        drop(handle);
        assert_eq!(cache.stats().closes, 1);
    }

    #[test]
    fn test_changed_descriptor_reopens() {
        let cache = DatasetCache::new(Arc::new(SourceOpener), DEFAULT_IDLE_TIMEOUT);
        let first = cache.acquire(&descriptor("local")).unwrap();
        let moved = DatasetDescriptor::new("local", "memory://elsewhere", SourceFormat::Memory);
        let second = cache.acquire(&moved).unwrap();

        assert!(!first.same_dataset(&second));
        assert_eq!(second.source().path(), "memory://elsewhere");
        drop(first);
        assert_eq!(cache.stats().closes, 1);
    }

    #[test]
    fn test_close_all() {
        let cache = DatasetCache::new(Arc::new(SourceOpener), DEFAULT_IDLE_TIMEOUT);
        drop(cache.acquire(&descriptor("a")).unwrap());
        drop(cache.acquire(&descriptor("b")).unwrap());
        cache.close_all();
        assert_eq!(cache.stats().closes, 2);
        assert_eq!(cache.stats().open, 0);
    }
}
