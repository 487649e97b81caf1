//! # Cached-Index Producers and Consumers
//!
//! ## Purpose
//!
//! This file implements the two view types over a mapped ring region and the
//! four typed queues built from them. A producer view owns the ring's
//! producer role from user-space (fill, tx); a consumer view owns the
//! consumer role (rx, completion). Exactly one view per ring side may exist,
//! the same single-producer/single-consumer discipline the rings themselves
//! enforce.
//!
//! ## Main components
//!
//! - `UserProd<T>`: Batch enqueue with a cached consumer index.
//! - `UserCons<T>`: Batch dequeue with a cached producer index.
//! - `FillQueue` / `CompQueue` / `RxQueue` / `TxQueue`: The typed aliases.

use std::sync::atomic::{AtomicU32, Ordering};
use xsk_socket::{RingDesc, RingMapping, XskError, RING_OFF_CONSUMER, RING_OFF_DESC, RING_OFF_PRODUCER};

/// User-space donates frame indices for reception.
pub type FillQueue = UserProd<u32>;
/// User-space reclaims frame indices after transmit completion.
pub type CompQueue = UserCons<u32>;
/// User-space drains received descriptors.
pub type RxQueue = UserCons<RingDesc>;
/// User-space submits descriptors for transmission.
pub type TxQueue = UserProd<RingDesc>;

/// The producer side of a mapped ring.
pub struct UserProd<T> {
    map: RingMapping,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    slots: *mut T,
    mask: u32,
    size: u32,
    cached_prod: u32,
    cached_cons: u32,
}

unsafe impl<T: Copy + Send> Send for UserProd<T> {}

/// The consumer side of a mapped ring.
pub struct UserCons<T> {
    map: RingMapping,
    producer: *const AtomicU32,
    consumer: *const AtomicU32,
    slots: *const T,
    mask: u32,
    cached_prod: u32,
    cached_cons: u32,
}

unsafe impl<T: Copy + Send> Send for UserCons<T> {}

fn check_layout<T>(map: &RingMapping, entries: u32) -> Result<(), XskError> {
    if entries == 0 || !entries.is_power_of_two() {
        return Err(XskError::Invalid);
    }
    let need = RING_OFF_DESC + entries as usize * std::mem::size_of::<T>();
    if map.len() < need {
        return Err(XskError::Invalid);
    }
    Ok(())
}

impl<T: Copy> UserProd<T> {
    /// Builds the producer view over a mapped ring of `entries` slots.
    ///
    /// # Safety
    ///
    /// The mapping must come from the socket's `mmap` contract for a ring
    /// whose slots are `T`-typed, `entries` must match the ring's capacity,
    /// and the caller must be the ring's only producer.
    pub unsafe fn from_mapping(map: RingMapping, entries: u32) -> Result<Self, XskError> {
        check_layout::<T>(&map, entries)?;
        let base = map.as_ptr();
        let producer = base.add(RING_OFF_PRODUCER) as *const AtomicU32;
        let consumer = base.add(RING_OFF_CONSUMER) as *const AtomicU32;
        let slots = base.add(RING_OFF_DESC) as *mut T;
        let cached_prod = (*producer).load(Ordering::Relaxed);
        let cached_cons = (*consumer).load(Ordering::Acquire);
        Ok(UserProd {
            map,
            producer,
            consumer,
            slots,
            mask: entries - 1,
            size: entries,
            cached_prod,
            cached_cons,
        })
    }

    /// Number of free slots, refreshing the cached consumer index only when
    /// the cache cannot satisfy `want`.
    pub fn nb_free(&mut self, want: u32) -> u32 {
        let free = self.size - self.cached_prod.wrapping_sub(self.cached_cons);
        if free >= want {
            return free;
        }
        self.cached_cons = unsafe { (*self.consumer).load(Ordering::Acquire) };
        self.size - self.cached_prod.wrapping_sub(self.cached_cons)
    }

    /// Enqueues as many of `items` as fit and publishes them with a single
    /// release store. Returns the number enqueued.
    pub fn enqueue(&mut self, items: &[T]) -> usize {
        let n = (items.len() as u32).min(self.nb_free(items.len() as u32));
        if n == 0 {
            return 0;
        }
        for (i, item) in items.iter().take(n as usize).enumerate() {
            unsafe {
                self.slots
                    .add((self.cached_prod.wrapping_add(i as u32) & self.mask) as usize)
                    .write(*item)
            };
        }
        self.cached_prod = self.cached_prod.wrapping_add(n);
        unsafe { (*self.producer).store(self.cached_prod, Ordering::Release) };
        n as usize
    }

    /// The underlying mapping.
    pub fn mapping(&self) -> &RingMapping {
        &self.map
    }
}

impl<T: Copy> UserCons<T> {
    /// Builds the consumer view over a mapped ring of `entries` slots.
    ///
    /// # Safety
    ///
    /// The mapping must come from the socket's `mmap` contract for a ring
    /// whose slots are `T`-typed, `entries` must match the ring's capacity,
    /// and the caller must be the ring's only consumer.
    pub unsafe fn from_mapping(map: RingMapping, entries: u32) -> Result<Self, XskError> {
        check_layout::<T>(&map, entries)?;
        let base = map.as_ptr();
        let producer = base.add(RING_OFF_PRODUCER) as *const AtomicU32;
        let consumer = base.add(RING_OFF_CONSUMER) as *const AtomicU32;
        let slots = base.add(RING_OFF_DESC) as *const T;
        let cached_prod = (*producer).load(Ordering::Acquire);
        let cached_cons = (*consumer).load(Ordering::Relaxed);
        Ok(UserCons {
            map,
            producer,
            consumer,
            slots,
            mask: entries - 1,
            cached_prod,
            cached_cons,
        })
    }

    /// Number of published entries waiting, refreshing the cached producer
    /// index only when the cache is empty.
    pub fn nb_avail(&mut self, want: u32) -> u32 {
        let avail = self.cached_prod.wrapping_sub(self.cached_cons);
        if avail >= want {
            return avail;
        }
        self.cached_prod = unsafe { (*self.producer).load(Ordering::Acquire) };
        self.cached_prod.wrapping_sub(self.cached_cons)
    }

    /// Dequeues up to `out.len()` entries and releases them to the producer
    /// with a single release store. Returns the number dequeued.
    pub fn dequeue(&mut self, out: &mut [T]) -> usize {
        let n = (out.len() as u32).min(self.nb_avail(out.len() as u32));
        if n == 0 {
            return 0;
        }
        for (i, slot) in out.iter_mut().take(n as usize).enumerate() {
            *slot = unsafe {
                *self
                    .slots
                    .add((self.cached_cons.wrapping_add(i as u32) & self.mask) as usize)
            };
        }
        self.cached_cons = self.cached_cons.wrapping_add(n);
        unsafe { (*self.consumer).store(self.cached_cons, Ordering::Release) };
        n as usize
    }

    /// The underlying mapping.
    pub fn mapping(&self) -> &RingMapping {
        &self.map
    }
}
