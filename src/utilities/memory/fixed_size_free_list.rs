use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// Index returned when the list has no room left, and used as the end-of-list marker.
pub const INVALID_OBJECT_INDEX: u32 = u32::MAX;

struct ObjectStorage<T> {
    object: T,
    /// Next object in the free list, the object's own index while it is constructed,
    /// or `INVALID_OBJECT_INDEX` while it sits in a pending batch.
    next_free_object: AtomicU32,
}

/// A chain of objects collected for release in a single operation.
///
/// Objects added to a batch stay readable until the batch is passed to
/// [`FixedSizeFreeList::destruct_object_batch`].
#[derive(Debug)]
pub struct Batch {
    first_object_index: u32,
    last_object_index: u32,
    num_objects: u32,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            first_object_index: INVALID_OBJECT_INDEX,
            last_object_index: INVALID_OBJECT_INDEX,
            num_objects: 0,
        }
    }
}

impl Batch {
    #[inline(always)]
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.num_objects == 0
    }
}

/// Fixed capacity pool of objects addressed by `u32` index that can be allocated from and freed to
/// by many threads at once without locking.
///
/// Freed slots are kept on an intrusive singly linked list whose head is packed together with an
/// allocation tag into one 64 bit word, so a head that was popped and pushed back in between a
/// reader's load and its compare-exchange is detected.
pub struct FixedSizeFreeList<T> {
    storage: Box<[ObjectStorage<T>]>,
    num_free_objects: CachePadded<AtomicU32>,
    allocation_tag: CachePadded<AtomicU32>,
    /// Low 32 bits: index of the first free object. High 32 bits: tag.
    first_free_object_and_tag: CachePadded<AtomicU64>,
    /// Objects at or beyond this index have never been handed out.
    first_unused_object: CachePadded<AtomicU32>,
}

impl<T: Default> FixedSizeFreeList<T> {
    /// Creates a list that can hold `capacity` objects. All storage is allocated up front.
    pub fn new(capacity: u32) -> Self {
        debug_assert!(capacity < INVALID_OBJECT_INDEX, "Capacity collides with the invalid index!");
        let storage = (0..capacity)
            .map(|_| ObjectStorage {
                object: T::default(),
                next_free_object: AtomicU32::new(INVALID_OBJECT_INDEX),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            storage,
            num_free_objects: CachePadded::new(AtomicU32::new(capacity)),
            allocation_tag: CachePadded::new(AtomicU32::new(1)),
            first_free_object_and_tag: CachePadded::new(AtomicU64::new(
                INVALID_OBJECT_INDEX as u64,
            )),
            first_unused_object: CachePadded::new(AtomicU32::new(0)),
        }
    }
}

impl<T> FixedSizeFreeList<T> {
    #[inline(always)]
    pub fn capacity(&self) -> u32 {
        self.storage.len() as u32
    }

    /// Number of objects that can still be constructed.
    #[inline(always)]
    pub fn num_free_objects(&self) -> u32 {
        self.num_free_objects.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn pack(&self, index: u32) -> u64 {
        let tag = self.allocation_tag.fetch_add(1, Ordering::Relaxed);
        index as u64 | ((tag as u64) << 32)
    }

    /// Takes an object from the list and runs `construct` on it before handing out its index.
    ///
    /// # Returns
    /// The index of the object, or `INVALID_OBJECT_INDEX` when the list is exhausted.
    pub fn construct_object<F>(&self, construct: F) -> u32
    where
        F: FnOnce(&T),
    {
        let backoff = Backoff::new();
        let index = loop {
            let first_free_object_and_tag = self.first_free_object_and_tag.load(Ordering::Acquire);
            let first_free = first_free_object_and_tag as u32;
            if first_free == INVALID_OBJECT_INDEX {
                // Nothing recycled, hand out a slot that was never used.
                match self.first_unused_object.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |next| (next < self.capacity()).then_some(next + 1),
                ) {
                    Ok(index) => break index,
                    Err(_) => return INVALID_OBJECT_INDEX,
                }
            }

            let next_free = self.storage[first_free as usize]
                .next_free_object
                .load(Ordering::Acquire);
            let new_first_free = self.pack(next_free);
            if self
                .first_free_object_and_tag
                .compare_exchange_weak(
                    first_free_object_and_tag,
                    new_first_free,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break first_free;
            }
            backoff.spin();
        };

        self.num_free_objects.fetch_sub(1, Ordering::Relaxed);
        let storage = &self.storage[index as usize];
        storage.next_free_object.store(index, Ordering::Relaxed);
        construct(&storage.object);
        index
    }

    /// Returns a single object to the list.
    pub fn destruct_object(&self, index: u32) {
        debug_assert!(index < self.capacity(), "Object index out of range!");
        let storage = &self.storage[index as usize];
        debug_assert_eq!(
            storage.next_free_object.load(Ordering::Relaxed),
            index,
            "Trying to free an object that is not constructed!"
        );

        let backoff = Backoff::new();
        loop {
            let first_free_object_and_tag = self.first_free_object_and_tag.load(Ordering::Acquire);
            storage
                .next_free_object
                .store(first_free_object_and_tag as u32, Ordering::Release);
            let new_first_free = self.pack(index);
            if self
                .first_free_object_and_tag
                .compare_exchange_weak(
                    first_free_object_and_tag,
                    new_first_free,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.num_free_objects.fetch_add(1, Ordering::Relaxed);
                return;
            }
            backoff.spin();
        }
    }

    /// Appends a constructed object to `batch`. The object stays valid until the batch is released.
    pub fn add_object_to_batch(&self, batch: &mut Batch, index: u32) {
        debug_assert!(index < self.capacity(), "Object index out of range!");
        let storage = &self.storage[index as usize];
        debug_assert_eq!(
            storage.next_free_object.load(Ordering::Relaxed),
            index,
            "Trying to add an object to a batch that is not constructed or already in a batch!"
        );
        storage
            .next_free_object
            .store(INVALID_OBJECT_INDEX, Ordering::Relaxed);

        if batch.first_object_index == INVALID_OBJECT_INDEX {
            batch.first_object_index = index;
        } else {
            self.storage[batch.last_object_index as usize]
                .next_free_object
                .store(index, Ordering::Relaxed);
        }
        batch.last_object_index = index;
        batch.num_objects += 1;
    }

    /// Returns every object in `batch` to the list with a single exchange of the list head.
    pub fn destruct_object_batch(&self, batch: Batch) {
        if batch.first_object_index == INVALID_OBJECT_INDEX {
            return;
        }

        let last = &self.storage[batch.last_object_index as usize];
        let backoff = Backoff::new();
        loop {
            let first_free_object_and_tag = self.first_free_object_and_tag.load(Ordering::Acquire);
            last.next_free_object
                .store(first_free_object_and_tag as u32, Ordering::Release);
            let new_first_free = self.pack(batch.first_object_index);
            if self
                .first_free_object_and_tag
                .compare_exchange_weak(
                    first_free_object_and_tag,
                    new_first_free,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.num_free_objects
                    .fetch_add(batch.num_objects, Ordering::Relaxed);
                return;
            }
            backoff.spin();
        }
    }

    /// Gets the object at `index`.
    #[inline(always)]
    pub fn get(&self, index: u32) -> &T {
        &self.storage[index as usize].object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Counter {
        value: AtomicU32,
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let list = FixedSizeFreeList::<Counter>::new(4);
        let indices: Vec<u32> = (0..4).map(|_| list.construct_object(|_| {})).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(list.num_free_objects(), 0);
        assert_eq!(list.construct_object(|_| {}), INVALID_OBJECT_INDEX);

        list.destruct_object(2);
        assert_eq!(list.num_free_objects(), 1);
        let reused = list.construct_object(|c| c.value.store(7, Ordering::Relaxed));
        assert_eq!(reused, 2);
        assert_eq!(list.get(2).value.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_batch_release() {
        let list = FixedSizeFreeList::<Counter>::new(8);
        let mut batch = Batch::default();
        for _ in 0..5 {
            let index = list.construct_object(|_| {});
            list.add_object_to_batch(&mut batch, index);
        }
        assert_eq!(batch.num_objects(), 5);
        assert_eq!(list.num_free_objects(), 3);

        list.destruct_object_batch(batch);
        assert_eq!(list.num_free_objects(), 8);

        // All eight objects must be obtainable again without duplicates.
        let indices: HashSet<u32> = (0..8).map(|_| list.construct_object(|_| {})).collect();
        assert_eq!(indices.len(), 8);
        assert!(!indices.contains(&INVALID_OBJECT_INDEX));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let list = FixedSizeFreeList::<Counter>::new(2);
        list.destruct_object_batch(Batch::default());
        assert_eq!(list.num_free_objects(), 2);
    }

    #[test]
    fn test_concurrent_construct_destruct() {
        let list = FixedSizeFreeList::<Counter>::new(64);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let list = &list;
                scope.spawn(move || {
                    for _ in 0..2000 {
                        let index = list.construct_object(|c| {
                            c.value.fetch_add(1, Ordering::Relaxed);
                        });
                        assert_ne!(index, INVALID_OBJECT_INDEX);
                        list.destruct_object(index);
                    }
                });
            }
        });
        assert_eq!(list.num_free_objects(), 64);
        let total: u32 = (0..64)
            .map(|i| list.get(i).value.load(Ordering::Relaxed))
            .sum();
        assert_eq!(total, 8000);
    }
}
