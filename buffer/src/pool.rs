//! Pooled, zero-initialized byte regions.

use std::collections::HashSet;
use std::collections::TryReserveError;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::BufferError;

/// Smallest pooled size class in bytes.
const MIN_REGION: usize = 64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A thread-safe pool of reusable byte regions.
///
/// Regions are handed out zeroed and sized to a power-of-two size class so
/// that a steady-state stream keeps cycling through the same memory. The pool
/// grows monotonically until its pooled bytes reach `ceiling_bytes`; after
/// that, requests are served by one-off allocations that are freed on
/// release instead of being pooled.
///
/// `BufferPool` is cheap to clone: clones share the same regions.
///
/// # Example
///
/// ```
/// use opuskit_buffer::BufferPool;
///
/// let pool = BufferPool::new(64 * 1024);
/// let mut region = pool.acquire(1275).unwrap();
/// assert!(region.iter().all(|&b| b == 0));
/// region[0] = 0x48;
/// pool.release(region).unwrap();
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: u64,
    ceiling_bytes: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    pooled_bytes: usize,
    on_loan: HashSet<u64>,
    next_lease: u64,
    fallbacks: u64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Bytes owned by the pool, on loan or free.
    pub pooled_bytes: usize,
    /// Pooled regions waiting to be reused.
    pub free_regions: usize,
    /// Regions currently on loan, pooled or one-off.
    pub on_loan: usize,
    /// One-off allocations served because the ceiling was reached.
    pub fallback_allocations: u64,
}

impl BufferPool {
    /// Creates an empty pool that may grow up to `ceiling_bytes`.
    pub fn new(ceiling_bytes: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(pool = id, ceiling_bytes, "pool: created");
        Self {
            inner: Arc::new(PoolInner {
                id,
                ceiling_bytes,
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    pooled_bytes: 0,
                    on_loan: HashSet::new(),
                    next_lease: 1,
                    fallbacks: 0,
                }),
            }),
        }
    }

    /// Returns the configured growth ceiling.
    pub fn ceiling_bytes(&self) -> usize {
        self.inner.ceiling_bytes
    }

    /// Acquires a zeroed region of at least `capacity` bytes.
    ///
    /// Reuses the smallest free pooled region that fits, grows the pool while
    /// under the ceiling, and otherwise falls back to a one-off allocation.
    /// Fails with [`BufferError::OutOfMemory`] only when the fallback
    /// allocation fails too.
    pub fn acquire(&self, capacity: usize) -> Result<BufferHandle, BufferError> {
        let mut state = self.inner.state.lock();

        if let Some(idx) = best_fit(&state.free, capacity) {
            let mut region = state.free.swap_remove(idx);
            region.fill(0);
            trace!(pool = self.inner.id, capacity, size = region.len(), "pool: reuse");
            return Ok(self.lend(&mut state, region, capacity, true));
        }

        match size_class(capacity) {
            Some(class) if state.pooled_bytes.saturating_add(class) <= self.inner.ceiling_bytes => {
                match alloc_zeroed(class) {
                    Ok(region) => {
                        state.pooled_bytes += class;
                        debug!(
                            pool = self.inner.id,
                            size = class,
                            pooled_bytes = state.pooled_bytes,
                            "pool: grow"
                        );
                        return Ok(self.lend(&mut state, region, capacity, true));
                    }
                    Err(e) => {
                        warn!(pool = self.inner.id, size = class, "pool: grow failed: {}", e);
                    }
                }
            }
            _ => {
                warn!(
                    pool = self.inner.id,
                    capacity,
                    pooled_bytes = state.pooled_bytes,
                    ceiling_bytes = self.inner.ceiling_bytes,
                    "pool: ceiling reached, using one-off allocation"
                );
            }
        }

        let region = alloc_zeroed(capacity).map_err(|e| {
            warn!(pool = self.inner.id, capacity, "pool: fallback allocation failed: {}", e);
            BufferError::OutOfMemory { requested: capacity }
        })?;
        state.fallbacks += 1;
        Ok(self.lend(&mut state, region, capacity, false))
    }

    /// Returns a region to the pool.
    ///
    /// Fails with [`BufferError::InvalidHandle`] if the handle is not on loan
    /// from this pool. The handle is consumed either way; a foreign handle
    /// goes back to the pool it came from.
    pub fn release(&self, mut handle: BufferHandle) -> Result<(), BufferError> {
        if handle.pool_id != self.inner.id {
            return Err(BufferError::InvalidHandle);
        }
        let region = handle.take().ok_or(BufferError::InvalidHandle)?;
        self.inner.give_back(handle.lease, region, handle.pooled)
    }

    /// Returns the current pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            pooled_bytes: state.pooled_bytes,
            free_regions: state.free.len(),
            on_loan: state.on_loan.len(),
            fallback_allocations: state.fallbacks,
        }
    }

    fn lend(
        &self,
        state: &mut PoolState,
        region: Vec<u8>,
        len: usize,
        pooled: bool,
    ) -> BufferHandle {
        let lease = state.next_lease;
        state.next_lease += 1;
        state.on_loan.insert(lease);
        BufferHandle {
            region,
            len,
            lease,
            pooled,
            pool_id: self.inner.id,
            pool: Some(Arc::downgrade(&self.inner)),
        }
    }
}

impl PoolInner {
    fn give_back(&self, lease: u64, region: Vec<u8>, pooled: bool) -> Result<(), BufferError> {
        let mut state = self.state.lock();
        if !state.on_loan.remove(&lease) {
            return Err(BufferError::InvalidHandle);
        }
        if pooled {
            state.free.push(region);
        } else {
            trace!(pool = self.id, size = region.len(), "pool: one-off region freed");
        }
        Ok(())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.inner.id)
            .field("ceiling_bytes", &self.inner.ceiling_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A zeroed region on loan from a [`BufferPool`].
///
/// Dereferences to exactly the requested number of bytes. Dropping a handle
/// returns the region to its pool; [`BufferPool::release`] does the same but
/// reports invalid handles.
pub struct BufferHandle {
    region: Vec<u8>,
    len: usize,
    lease: u64,
    pooled: bool,
    pool_id: u64,
    pool: Option<Weak<PoolInner>>,
}

impl BufferHandle {
    /// Returns the usable size of the region in bytes.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Returns true if the region came from the pool rather than a one-off
    /// fallback allocation.
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// Shortens the visible length to `len` bytes. Has no effect if `len`
    /// is not shorter. The whole region still goes back to the pool.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    fn take(&mut self) -> Option<Vec<u8>> {
        self.pool.take()?;
        Some(std::mem::take(&mut self.region))
    }
}

impl Deref for BufferHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region[..self.len]
    }
}

impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.region[..self.len]
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("len", &self.len)
            .field("capacity", &self.region.len())
            .field("pooled", &self.pooled)
            .finish()
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        let region = std::mem::take(&mut self.region);
        let _ = pool.give_back(self.lease, region, self.pooled);
    }
}

fn size_class(capacity: usize) -> Option<usize> {
    capacity.max(MIN_REGION).checked_next_power_of_two()
}

fn best_fit(free: &[Vec<u8>], capacity: usize) -> Option<usize> {
    free.iter()
        .enumerate()
        .filter(|(_, region)| region.len() >= capacity)
        .min_by_key(|(_, region)| region.len())
        .map(|(idx, _)| idx)
}

fn alloc_zeroed(len: usize) -> Result<Vec<u8>, TryReserveError> {
    let mut region = Vec::new();
    region.try_reserve_exact(len)?;
    region.resize(len, 0);
    Ok(region)
}
