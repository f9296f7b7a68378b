//! Free lists for scratch buffers and reusable stateful instances.
//!
//! [`BufferPool`] recycles fixed-capacity arrays (power-of-two sizes, at
//! least [`MIN_BUFFER_CAPACITY`] elements) and [`InstanceCache`] recycles
//! whole objects such as serialization contexts. Both hand out RAII guards
//! that return their contents on `free()` or on drop; `free()` is
//! idempotent and any access after it fails with
//! [`CodecError::InvalidState`].
//!
//! `shared()` gives the process-wide pool for an element type. Each pool
//! guards its free list with one lock; the "already free" check needs no
//! lock because a guard is exclusively owned by its holder.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::CodecError;

/// Smallest capacity ever handed out by a [`BufferPool`].
pub const MIN_BUFFER_CAPACITY: usize = 256;

/// Capacity actually allocated for a request of `minimum` elements.
pub fn rounded_capacity(minimum: usize) -> Result<usize, CodecError> {
    minimum
        .max(MIN_BUFFER_CAPACITY)
        .checked_next_power_of_two()
        .ok_or_else(|| {
            CodecError::InvalidArgument(format!("buffer capacity {minimum} is too large"))
        })
}

/// One leaked instance of `P` per type for the life of the process.
fn process_singleton<P: Default + Send + Sync + 'static>() -> &'static P {
    type Registry = Mutex<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;
    static SINGLETONS: OnceLock<Registry> = OnceLock::new();

    let mut singletons = SINGLETONS.get_or_init(Registry::default).lock();
    let entry: &'static (dyn Any + Send + Sync) = *singletons
        .entry(TypeId::of::<P>())
        .or_insert_with(|| -> &'static (dyn Any + Send + Sync) { Box::leak(Box::new(P::default())) });
    match entry.downcast_ref::<P>() {
        Some(pool) => pool,
        None => unreachable!("process singleton registered under a foreign TypeId"),
    }
}

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

/// First-fit free list of boxed slices.
#[derive(Debug)]
pub struct BufferPool<T: Default + Send + 'static> {
    free: Mutex<Vec<Option<Box<[T]>>>>,
    allocations: AtomicUsize,
}

impl<T: Default + Send + 'static> Default for BufferPool<T> {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            allocations: AtomicUsize::new(0),
        }
    }
}

impl<T: Default + Send + 'static> BufferPool<T> {
    /// A private pool, independent of the shared one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide pool for `T`.
    pub fn shared() -> &'static Self {
        process_singleton::<Self>()
    }

    /// Claim a buffer of at least `minimum_capacity` elements.
    ///
    /// Negative capacities are rejected with `InvalidArgument`.
    pub fn claim(&self, minimum_capacity: isize) -> Result<PooledBuffer<'_, T>, CodecError> {
        let minimum = usize::try_from(minimum_capacity).map_err(|_| {
            CodecError::InvalidArgument(format!(
                "buffer capacity must not be negative, got {minimum_capacity}"
            ))
        })?;
        self.claim_at_least(minimum)
    }

    /// Claim a buffer of at least `minimum` elements.
    pub fn claim_at_least(&self, minimum: usize) -> Result<PooledBuffer<'_, T>, CodecError> {
        let capacity = rounded_capacity(minimum)?;
        let reused = {
            let mut free = self.free.lock();
            free.iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|b| b.len() >= capacity))
                .and_then(Option::take)
        };
        let storage = match reused {
            Some(storage) => storage,
            None => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                log::trace!("allocating pooled buffer of {capacity} elements");
                (0..capacity).map(|_| T::default()).collect()
            }
        };
        Ok(PooledBuffer {
            pool: self,
            storage: Some(storage),
        })
    }

    fn release(&self, storage: Box<[T]>) {
        let mut free = self.free.lock();
        match free.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(storage),
            None => free.push(Some(storage)),
        }
    }

    /// Buffers currently waiting in the free list.
    pub fn free_count(&self) -> usize {
        self.free.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Buffers allocated by this pool so far (reuses not counted).
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// A buffer claimed from a [`BufferPool`]. Returned to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer<'p, T: Default + Send + 'static> {
    pool: &'p BufferPool<T>,
    storage: Option<Box<[T]>>,
}

impl<T: Default + Send + 'static> PooledBuffer<'_, T> {
    /// Number of elements in the backing array.
    pub fn capacity(&self) -> Result<usize, CodecError> {
        self.as_slice().map(<[T]>::len)
    }

    pub fn as_slice(&self) -> Result<&[T], CodecError> {
        self.storage
            .as_deref()
            .ok_or(CodecError::InvalidState("buffer was returned to its pool"))
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [T], CodecError> {
        self.storage
            .as_deref_mut()
            .ok_or(CodecError::InvalidState("buffer was returned to its pool"))
    }

    pub fn is_free(&self) -> bool {
        self.storage.is_none()
    }

    /// Return the storage to the pool. Calling this again is a no-op.
    pub fn free(&mut self) {
        if let Some(storage) = self.storage.take() {
            self.pool.release(storage);
        }
    }
}

impl<T: Default + Send + 'static> Drop for PooledBuffer<'_, T> {
    fn drop(&mut self) {
        self.free();
    }
}

// ---------------------------------------------------------------------------
// InstanceCache
// ---------------------------------------------------------------------------

/// State that can be handed from one caller to the next.
pub trait Reusable: Default + Send + 'static {
    /// Drop per-session state so the instance is ready for a new caller.
    fn prepare_new_session(&mut self);
}

/// Free list of long-lived instances of `T`.
///
/// Instances are reset with [`Reusable::prepare_new_session`] as they go
/// back into the cache, so a claimed instance never sees stale state.
#[derive(Debug)]
pub struct InstanceCache<T: Reusable> {
    free: Mutex<Vec<Option<T>>>,
    created: AtomicUsize,
}

impl<T: Reusable> Default for InstanceCache<T> {
    fn default() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }
}

impl<T: Reusable> InstanceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache for `T`.
    pub fn shared() -> &'static Self {
        process_singleton::<Self>()
    }

    pub fn claim(&self) -> Cached<'_, T> {
        let reused = {
            let mut free = self.free.lock();
            free.iter_mut().find_map(Option::take)
        };
        let value = reused.unwrap_or_else(|| {
            self.created.fetch_add(1, Ordering::Relaxed);
            log::trace!("creating cached {}", std::any::type_name::<T>());
            T::default()
        });
        Cached {
            cache: self,
            value: Some(value),
        }
    }

    fn release(&self, mut value: T) {
        value.prepare_new_session();
        let mut free = self.free.lock();
        match free.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(value),
            None => free.push(Some(value)),
        }
    }

    /// Instances currently waiting in the free list.
    pub fn free_count(&self) -> usize {
        self.free.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Instances constructed by this cache so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

/// An instance claimed from an [`InstanceCache`]. Released on drop.
#[derive(Debug)]
pub struct Cached<'c, T: Reusable> {
    cache: &'c InstanceCache<T>,
    value: Option<T>,
}

impl<T: Reusable> Cached<'_, T> {
    pub fn get(&self) -> Result<&T, CodecError> {
        self.value
            .as_ref()
            .ok_or(CodecError::InvalidState("instance was returned to its cache"))
    }

    pub fn get_mut(&mut self) -> Result<&mut T, CodecError> {
        self.value
            .as_mut()
            .ok_or(CodecError::InvalidState("instance was returned to its cache"))
    }

    pub fn is_free(&self) -> bool {
        self.value.is_none()
    }

    /// Return the instance to the cache. Calling this again is a no-op.
    pub fn free(&mut self) {
        if let Some(value) = self.value.take() {
            self.cache.release(value);
        }
    }
}

impl<T: Reusable> Drop for Cached<'_, T> {
    fn drop(&mut self) {
        self.free();
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Session {
        log: Vec<String>,
        resets: u32,
    }

    impl Reusable for Session {
        fn prepare_new_session(&mut self) {
            self.log.clear();
            self.resets += 1;
        }
    }

    // Test 1: capacity_rounds_up_to_power_of_two
    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let pool = BufferPool::<u8>::new();
        for (requested, expected) in [(0, 256), (1, 256), (256, 256), (257, 512), (1000, 1024)] {
            let buf = pool.claim(requested).unwrap();
            assert_eq!(buf.capacity().unwrap(), expected, "requested {requested}");
        }
    }

    // Test 2: negative_capacity_is_invalid_argument
    #[test]
    fn negative_capacity_is_invalid_argument() {
        let pool = BufferPool::<u8>::new();
        let err = pool.claim(-1).unwrap_err();
        assert!(matches!(err, CodecError::InvalidArgument(_)));
    }

    // Test 3: freed_buffer_is_reused_without_allocating
    #[test]
    fn freed_buffer_is_reused_without_allocating() {
        let pool = BufferPool::<u32>::new();
        let mut first = pool.claim(600).unwrap();
        let address = first.as_slice().unwrap().as_ptr();
        first.free();
        assert_eq!(pool.allocations(), 1);

        let second = pool.claim(300).unwrap();
        assert_eq!(second.as_slice().unwrap().as_ptr(), address);
        assert_eq!(second.capacity().unwrap(), 1024);
        assert_eq!(pool.allocations(), 1);
    }

    // Test 4: access_after_free_is_invalid_state
    #[test]
    fn access_after_free_is_invalid_state() {
        let pool = BufferPool::<u8>::new();
        let mut buf = pool.claim(10).unwrap();
        buf.free();
        assert!(buf.is_free());
        assert!(matches!(buf.capacity(), Err(CodecError::InvalidState(_))));
        assert!(matches!(buf.as_mut_slice(), Err(CodecError::InvalidState(_))));
    }

    // Test 5: double_free_does_not_duplicate
    #[test]
    fn double_free_does_not_duplicate() {
        let pool = BufferPool::<u8>::new();
        let mut buf = pool.claim(10).unwrap();
        buf.free();
        buf.free();
        drop(buf);
        assert_eq!(pool.free_count(), 1);

        let a = pool.claim(10).unwrap();
        let b = pool.claim(10).unwrap();
        assert_ne!(a.as_slice().unwrap().as_ptr(), b.as_slice().unwrap().as_ptr());
        assert_eq!(pool.allocations(), 2);
    }

    // Test 6: drop_returns_buffer
    #[test]
    fn drop_returns_buffer() {
        let pool = BufferPool::<u8>::new();
        {
            let _a = pool.claim(10).unwrap();
            let _b = pool.claim(10).unwrap();
            assert_eq!(pool.free_count(), 0);
        }
        assert_eq!(pool.free_count(), 2);
    }

    // Test 7: first_fit_skips_small_buffers
    #[test]
    fn first_fit_skips_small_buffers() {
        let pool = BufferPool::<u8>::new();
        let small = pool.claim(10).unwrap();
        let large = pool.claim(4000).unwrap();
        let large_addr = large.as_slice().unwrap().as_ptr();
        drop(small);
        drop(large);

        let claimed = pool.claim(2000).unwrap();
        assert_eq!(claimed.as_slice().unwrap().as_ptr(), large_addr);
        assert_eq!(pool.allocations(), 2);
    }

    // Test 8: shared_pool_is_per_type
    #[test]
    fn shared_pool_is_per_type() {
        let a = BufferPool::<u16>::shared();
        let b = BufferPool::<u16>::shared();
        assert!(std::ptr::eq(a, b));
        let c = BufferPool::<i16>::shared();
        assert_ne!(
            std::ptr::from_ref(a).cast::<()>(),
            std::ptr::from_ref(c).cast::<()>()
        );
    }

    // Test 9: concurrent_claims_never_share_storage
    #[test]
    fn concurrent_claims_never_share_storage() {
        let pool = BufferPool::<u64>::new();
        std::thread::scope(|scope| {
            for worker in 0..4u64 {
                let pool = &pool;
                scope.spawn(move || {
                    for round in 0..200u64 {
                        let mut buf = pool.claim(300).unwrap();
                        let marker = worker * 1000 + round;
                        buf.as_mut_slice().unwrap().fill(marker);
                        std::thread::yield_now();
                        assert!(buf.as_slice().unwrap().iter().all(|&v| v == marker));
                        buf.free();
                        buf.free();
                    }
                });
            }
        });
        assert!(pool.free_count() <= 4);
        assert_eq!(pool.free_count(), pool.allocations());
    }

    // Test 10: instance_cache_reuses_and_resets
    #[test]
    fn instance_cache_reuses_and_resets() {
        let cache = InstanceCache::<Session>::new();
        {
            let mut session = cache.claim();
            session.get_mut().unwrap().log.push("loaded save".into());
        }
        assert_eq!(cache.free_count(), 1);

        let session = cache.claim();
        let state = session.get().unwrap();
        assert!(state.log.is_empty());
        assert_eq!(state.resets, 1);
        assert_eq!(cache.created(), 1);
    }

    // Test 11: cached_free_is_idempotent
    #[test]
    fn cached_free_is_idempotent() {
        let cache = InstanceCache::<Session>::new();
        let mut session = cache.claim();
        session.free();
        session.free();
        assert!(session.is_free());
        assert!(matches!(session.get(), Err(CodecError::InvalidState(_))));
        drop(session);
        assert_eq!(cache.free_count(), 1);
    }
}
