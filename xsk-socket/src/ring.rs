//! # SPSC Descriptor Rings
//!
//! ## Purpose
//!
//! This file defines the ring protocol both address spaces speak: a bounded
//! single-producer/single-consumer ring of fixed-size slots over a contiguous,
//! mappable memory region. The fill and completion rings carry bare 32-bit
//! frame indices; the rx and tx rings carry `{index, length, offset}`
//! descriptors.
//!
//! ## How it works
//!
//! The backing region starts with a `RingHeader` of two free-running 32-bit
//! counters, each padded to its own 128-byte stripe, followed by a
//! power-of-two slot array at byte offset 256. The counters are the only
//! synchronization: the producer writes slots, then publishes its counter
//! with release ordering; the consumer snapshots the producer counter with
//! acquire ordering before reading slots and publishes its own counter with
//! release ordering after. All counter arithmetic wraps modulo 2^32.
//!
//! Rings that carry descriptors validate them against the umem properties
//! bound at bind time; invalid entries are counted and silently skipped.
//!
//! ## Main components
//!
//! - `Ring<T>`: The generic ring over one slot type.
//! - `RingDesc`: The rx/tx descriptor.
//! - `RingType`: The four ring roles and their fixed mmap page offsets.
//! - `RingMapping`: A borrowed view of a ring's backing bytes for user-space.

use crate::error::XskError;
use crate::mmap::OwnedMmap;
use bytemuck::{Pod, Zeroable};
use std::any::Any;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Byte offset of the producer counter within a mapped ring region.
pub const RING_OFF_PRODUCER: usize = 0;
/// Byte offset of the consumer counter within a mapped ring region.
pub const RING_OFF_CONSUMER: usize = 128;
/// Byte offset of the slot array within a mapped ring region.
pub const RING_OFF_DESC: usize = 256;

/// Fixed mmap page offset of the rx ring.
pub const XSK_PGOFF_RX_RING: u64 = 0;
/// Fixed mmap page offset of the tx ring.
pub const XSK_PGOFF_TX_RING: u64 = 0x8000_0000;
/// Fixed mmap page offset of the umem fill ring.
pub const XSK_PGOFF_FILL_RING: u64 = 0x1_0000_0000;
/// Fixed mmap page offset of the umem completion ring.
pub const XSK_PGOFF_COMPLETION_RING: u64 = 0x1_8000_0000;

/// Pads a counter to a 128-byte stripe.
///
/// 128 bytes covers both the L1 line and the adjacent-line prefetcher pair,
/// so the producer and consumer counters never share a fetched stripe.
#[repr(C, align(128))]
pub struct CachePadded<T> {
    pub value: T,
}

/// The fixed header at the start of every ring's backing region.
#[repr(C)]
pub struct RingHeader {
    /// Free-running producer counter, published with release ordering.
    pub producer: CachePadded<AtomicU32>,
    /// Free-running consumer counter, published with release ordering.
    pub consumer: CachePadded<AtomicU32>,
}

/// A descriptor on the rx and tx rings.
///
/// `idx` addresses a frame in the umem; the payload occupies
/// `[offset, offset + len)` within that frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RingDesc {
    /// The umem frame index holding the payload.
    pub idx: u32,
    /// The payload length in bytes.
    pub len: u32,
    /// The payload offset within the frame.
    pub offset: u32,
}

impl RingDesc {
    /// Creates a new `RingDesc`.
    pub fn new(idx: u32, len: u32, offset: u32) -> Self {
        RingDesc { idx, len, offset }
    }
}

/// The umem properties a ring validates descriptors against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UmemProps {
    /// The size of one umem frame in bytes.
    pub frame_size: u32,
    /// The number of frames in the umem.
    pub nframes: u32,
}

/// An enum representing the four ring roles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RingType {
    /// The receive ring, hook to consumer.
    Rx,
    /// The transmit ring, consumer to hook.
    Tx,
    /// The fill ring, donating frames for reception.
    Fill,
    /// The completion ring, returning transmitted frames.
    Completion,
}

impl RingType {
    /// Returns the fixed page offset at which this ring is mappable.
    pub fn page_offset(&self) -> u64 {
        match self {
            RingType::Rx => XSK_PGOFF_RX_RING,
            RingType::Tx => XSK_PGOFF_TX_RING,
            RingType::Fill => XSK_PGOFF_FILL_RING,
            RingType::Completion => XSK_PGOFF_COMPLETION_RING,
        }
    }

    /// Resolves a page offset back to the ring it addresses.
    pub fn from_page_offset(offset: u64) -> Option<RingType> {
        match offset {
            XSK_PGOFF_RX_RING => Some(RingType::Rx),
            XSK_PGOFF_TX_RING => Some(RingType::Tx),
            XSK_PGOFF_FILL_RING => Some(RingType::Fill),
            XSK_PGOFF_COMPLETION_RING => Some(RingType::Completion),
            _ => None,
        }
    }

    /// Returns `true` for the two umem control rings.
    pub fn is_umem_ring(&self) -> bool {
        matches!(self, RingType::Fill | RingType::Completion)
    }
}

/// A bounded SPSC ring over slots of type `T`.
///
/// The producer side is either *staged* (`produce` + `produce_flush`, used by
/// the rx engine and by user-space producers) or *reserved*
/// (`reserve` + `produce_id`, used for the completion handoff). A given
/// ring's producer uses one interface or the other, never both.
pub struct Ring<T> {
    mmap: OwnedMmap,
    slots: *mut T,
    len: u32,
    mask: u32,
    /// Producer claims: staged-but-unpublished slots plus reservations.
    prod_head: AtomicU32,
    /// Write tickets taken by reserved produces.
    prod_next: AtomicU32,
    /// Consumer-side snapshot of the published producer counter.
    cons_head: AtomicU32,
    /// Consumer position, published to the header on discard.
    cons_tail: AtomicU32,
    invalid: AtomicU64,
    /// Packed umem properties; zero means no validation bound yet.
    props: AtomicU64,
    props_bound: AtomicBool,
}

unsafe impl<T: Copy + Send> Send for Ring<T> {}
unsafe impl<T: Copy + Send> Sync for Ring<T> {}

impl<T: Copy> Ring<T> {
    /// Allocates a ring of `entries` slots.
    ///
    /// # Errors
    ///
    /// Returns `XskError::Invalid` unless `entries` is a nonzero power of
    /// two, and `XskError::NoMem` if the backing allocation fails.
    pub fn new(entries: u32) -> Result<Self, XskError> {
        if entries == 0 || !entries.is_power_of_two() {
            return Err(XskError::Invalid);
        }
        debug_assert_eq!(size_of::<RingHeader>(), RING_OFF_DESC);
        let size = RING_OFF_DESC + entries as usize * size_of::<T>();
        let mmap = OwnedMmap::anon(size).map_err(|_| XskError::NoMem)?;
        // anonymous mappings are zero-filled, so both counters start at 0
        let slots = unsafe { mmap.as_u8_ptr().add(RING_OFF_DESC) } as *mut T;
        Ok(Ring {
            mmap,
            slots,
            len: entries,
            mask: entries - 1,
            prod_head: AtomicU32::new(0),
            prod_next: AtomicU32::new(0),
            cons_head: AtomicU32::new(0),
            cons_tail: AtomicU32::new(0),
            invalid: AtomicU64::new(0),
            props: AtomicU64::new(0),
            props_bound: AtomicBool::new(false),
        })
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        unsafe { &*(self.mmap.as_u8_ptr() as *const RingHeader) }
    }

    /// Returns the ring capacity in slots.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.len
    }

    /// Atomically reads the published producer counter.
    #[inline]
    pub fn producer(&self) -> u32 {
        self.header().producer.value.load(Ordering::Acquire)
    }

    /// Atomically reads the published consumer counter.
    #[inline]
    pub fn consumer(&self) -> u32 {
        self.header().consumer.value.load(Ordering::Acquire)
    }

    /// Returns `true` if no published slots are outstanding.
    pub fn is_empty(&self) -> bool {
        self.producer() == self.consumer()
    }

    /// Returns `true` if every slot is occupied by a published entry.
    pub fn is_full(&self) -> bool {
        self.producer().wrapping_sub(self.consumer()) == self.len
    }

    /// Monotonic count of entries rejected by descriptor validation.
    pub fn nb_invalid(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    /// Binds the umem properties this ring validates entries against.
    ///
    /// Called on the control plane before any data flows; a rebind may
    /// rebroadcast while the ring is quiesced.
    pub(crate) fn set_props(&self, props: UmemProps) {
        let packed = ((props.nframes as u64) << 32) | props.frame_size as u64;
        self.props.store(packed, Ordering::Relaxed);
        self.props_bound.store(true, Ordering::Release);
    }

    /// Returns the bound umem properties, if any.
    #[inline]
    pub fn props(&self) -> Option<UmemProps> {
        if !self.props_bound.load(Ordering::Acquire) {
            return None;
        }
        let packed = self.props.load(Ordering::Relaxed);
        Some(UmemProps {
            frame_size: packed as u32,
            nframes: (packed >> 32) as u32,
        })
    }

    /// Number of free slots the producer may still claim.
    pub fn free_entries(&self) -> u32 {
        let head = self.prod_head.load(Ordering::Relaxed);
        self.len.saturating_sub(head.wrapping_sub(self.consumer()))
    }

    /// Claims `n` slots for later reserved produces.
    ///
    /// # Errors
    ///
    /// Returns `XskError::NoSpace` if fewer than `n` slots are free.
    pub fn reserve(&self, n: u32) -> Result<(), XskError> {
        debug_assert!(n <= self.len);
        loop {
            let head = self.prod_head.load(Ordering::Relaxed);
            let used = head.wrapping_sub(self.consumer());
            if used + n > self.len {
                return Err(XskError::NoSpace);
            }
            if self
                .prod_head
                .compare_exchange_weak(
                    head,
                    head.wrapping_add(n),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Stages one entry without publishing it.
    ///
    /// Staged entries become visible to the consumer at the next
    /// `produce_flush`. Single staging producer per ring.
    ///
    /// # Errors
    ///
    /// Returns `XskError::NoSpace` if the ring is full.
    pub fn produce(&self, slot: T) -> Result<(), XskError> {
        let head = self.prod_head.load(Ordering::Relaxed);
        if head.wrapping_sub(self.consumer()) == self.len {
            return Err(XskError::NoSpace);
        }
        unsafe { self.slots.add((head & self.mask) as usize).write(slot) };
        self.prod_head.store(head.wrapping_add(1), Ordering::Relaxed);
        Ok(())
    }

    /// Publishes every staged entry with release ordering.
    pub fn produce_flush(&self) {
        let head = self.prod_head.load(Ordering::Relaxed);
        self.header().producer.value.store(head, Ordering::Release);
    }

    /// Writes one previously reserved entry and publishes it in claim order.
    ///
    /// Capacity was guaranteed by the matching `reserve`; a produce that was
    /// never reserved is a correctness bug upstream and is reported loudly
    /// rather than silently corrupting the ring.
    fn produce_reserved(&self, slot: T) {
        let ticket = self.prod_next.fetch_add(1, Ordering::Relaxed);
        let reserved = self.prod_head.load(Ordering::Relaxed);
        let outstanding = reserved.wrapping_sub(ticket);
        if outstanding == 0 || outstanding > self.len {
            log::error!(
                "ring: produce without reservation (ticket {ticket}, reserved {reserved})"
            );
        }
        unsafe { self.slots.add((ticket & self.mask) as usize).write(slot) };
        // publish strictly in ticket order so the counter never exposes an
        // unwritten slot
        let producer = &self.header().producer.value;
        while producer.load(Ordering::Relaxed) != ticket {
            std::hint::spin_loop();
        }
        producer.store(ticket.wrapping_add(1), Ordering::Release);
    }

    /// Consumer view of the next published entry, skipping entries the
    /// validator rejects.
    fn peek_with(&self, is_valid: impl Fn(&T) -> bool) -> Option<T> {
        let mut tail = self.cons_tail.load(Ordering::Relaxed);
        let mut head = self.cons_head.load(Ordering::Relaxed);
        if head == tail {
            self.cons_head.store(self.producer(), Ordering::Relaxed);
            head = self.cons_head.load(Ordering::Relaxed);
        }
        while tail != head {
            let slot = unsafe { *self.slots.add((tail & self.mask) as usize) };
            if is_valid(&slot) {
                return Some(slot);
            }
            self.invalid.fetch_add(1, Ordering::Relaxed);
            tail = tail.wrapping_add(1);
            self.cons_tail.store(tail, Ordering::Relaxed);
            self.header().consumer.value.store(tail, Ordering::Release);
        }
        None
    }

    /// Consumes the entry returned by the last peek.
    pub fn discard(&self) {
        let tail = self.cons_tail.load(Ordering::Relaxed).wrapping_add(1);
        self.cons_tail.store(tail, Ordering::Relaxed);
        self.header().consumer.value.store(tail, Ordering::Release);
    }

    /// Total size in bytes of the ring's backing region.
    pub fn backing_len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_u8_ptr()
    }
}

impl Ring<u32> {
    /// Peeks the next frame index, skipping out-of-range indices.
    ///
    /// Index validation applies once umem properties are bound; before that
    /// the control plane guarantees no data flows.
    pub fn peek_id(&self) -> Option<u32> {
        match self.props() {
            Some(props) => self.peek_with(|id| *id < props.nframes),
            None => self.peek_with(|_| true),
        }
    }

    /// Publishes one frame index into a previously reserved slot.
    pub fn produce_id(&self, id: u32) {
        self.produce_reserved(id);
    }
}

impl Ring<RingDesc> {
    /// Peeks the next descriptor, skipping descriptors that fall outside the
    /// bound umem: `idx` must address a frame and `offset + len` must fit in
    /// it.
    pub fn peek_desc(&self) -> Option<RingDesc> {
        match self.props() {
            Some(props) => self.peek_with(|d| {
                d.idx < props.nframes
                    && d.offset as u64 + d.len as u64 <= props.frame_size as u64
            }),
            None => self.peek_with(|_| true),
        }
    }
}

/// A non-owning view of a ring's backing bytes, as handed to user-space by
/// the socket's `mmap` contract.
///
/// The view keeps the ring alive; the layout is the documented header
/// (`RING_OFF_PRODUCER`, `RING_OFF_CONSUMER`) followed by the slot array at
/// `RING_OFF_DESC`.
pub struct RingMapping {
    ptr: *mut u8,
    len: usize,
    _keep: Arc<dyn Any + Send + Sync>,
}

unsafe impl Send for RingMapping {}

impl RingMapping {
    pub(crate) fn new<T: Copy + Send + 'static>(
        ring: Arc<Ring<T>>,
        len: usize,
    ) -> Result<Self, XskError> {
        if len > ring.backing_len() {
            return Err(XskError::Invalid);
        }
        let ptr = ring.base_ptr();
        Ok(RingMapping {
            ptr,
            len,
            _keep: ring,
        })
    }

    /// Returns the base pointer of the mapped region.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns the length of the mapped region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the mapped region has a size of zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
