//! # Umem Registration and Frame Accounting
//!
//! ## Purpose
//!
//! This module manages the user-registered packet memory: a pinned,
//! contiguous region sliced into equal power-of-two frames, paired with the
//! fill ring (frames donated for reception) and the completion ring (frames
//! returned after transmission). Those two rings are the only legal transfer
//! paths of frame ownership between the two sides.
//!
//! ## How it works
//!
//! Registration validates the caller-supplied record against the donated
//! area, pins the pages, and freezes the frame geometry into a `UmemProps`
//! snapshot that gets broadcast to every attached ring for descriptor
//! validation. The control rings are created afterwards, each exactly once.
//! A umem is reference-counted; a second socket bound to the same device
//! queue may adopt it through the shared-umem bind path.
//!
//! ## Main components
//!
//! - `UmemReg`: The binary registration record.
//! - `Umem`: The registered region plus its fill and completion rings.

use crate::error::XskError;
use crate::mmap::{page_size, UmemArea};
use crate::ring::{Ring, UmemProps};
use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Ceiling on the number of frames a single umem may carry.
pub const XSK_UMEM_MAX_FRAMES: u64 = 1 << 22;

/// The binary umem registration record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct UmemReg {
    /// Base address of the donated region; must be page-aligned.
    pub addr: u64,
    /// Length of the region in bytes; a positive multiple of `frame_size`.
    pub len: u64,
    /// Frame size in bytes; power of two, page-compatible.
    pub frame_size: u32,
    /// Byte offset within each frame at which received payload is written.
    pub headroom: u32,
}

/// A registered umem: the pinned packet area, its frame geometry and the two
/// control rings.
pub struct Umem {
    area: UmemArea,
    frame_size: u32,
    headroom: u32,
    nframes: u32,
    fq: OnceLock<Arc<Ring<u32>>>,
    cq: OnceLock<Arc<Ring<u32>>>,
    /// Frames handed to a device and not yet completed.
    inflight_tx: AtomicU64,
}

unsafe impl Send for Umem {}
unsafe impl Sync for Umem {}

impl Umem {
    /// Registers a donated area as a umem.
    ///
    /// # How it works
    ///
    /// Validates the record against the area (matching base, page alignment,
    /// length a positive multiple of a page-compatible power-of-two frame
    /// size, headroom inside the frame, frame count under the ceiling), then
    /// pins the pages for the registration's lifetime.
    ///
    /// # Errors
    ///
    /// `XskError::Invalid` on any parameter violation, `XskError::NoMem` if
    /// pinning fails.
    pub fn register(mut area: UmemArea, reg: &UmemReg) -> Result<Arc<Umem>, XskError> {
        let page = page_size() as u64;
        if reg.addr != area.addr() || reg.addr % page != 0 {
            return Err(XskError::Invalid);
        }
        if reg.len == 0 || reg.len > area.len() as u64 {
            return Err(XskError::Invalid);
        }
        let fs = reg.frame_size;
        if !fs.is_power_of_two() {
            return Err(XskError::Invalid);
        }
        let fs64 = fs as u64;
        // frames either tile a page exactly or span whole pages
        if (fs64 < page && page % fs64 != 0) || (fs64 > page && fs64 % page != 0) {
            return Err(XskError::Invalid);
        }
        if reg.headroom >= fs {
            return Err(XskError::Invalid);
        }
        if reg.len % fs64 != 0 {
            return Err(XskError::Invalid);
        }
        let nframes = reg.len / fs64;
        if nframes == 0 || nframes > XSK_UMEM_MAX_FRAMES {
            return Err(XskError::Invalid);
        }

        area.pin()?;

        Ok(Arc::new(Umem {
            area,
            frame_size: fs,
            headroom: reg.headroom,
            nframes: nframes as u32,
            fq: OnceLock::new(),
            cq: OnceLock::new(),
            inflight_tx: AtomicU64::new(0),
        }))
    }

    /// Frame size in bytes.
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Receive headroom in bytes.
    #[inline]
    pub fn headroom(&self) -> u32 {
        self.headroom
    }

    /// Number of frames in the umem.
    #[inline]
    pub fn nframes(&self) -> u32 {
        self.nframes
    }

    /// The geometry snapshot broadcast to attached rings.
    pub fn props(&self) -> UmemProps {
        UmemProps {
            frame_size: self.frame_size,
            nframes: self.nframes,
        }
    }

    /// Creates the fill ring. Rejected once one exists.
    pub fn create_fill_ring(&self, entries: u32) -> Result<(), XskError> {
        let ring = Arc::new(Ring::new(entries)?);
        self.fq.set(ring).map_err(|_| XskError::Invalid)
    }

    /// Creates the completion ring. Rejected once one exists.
    pub fn create_completion_ring(&self, entries: u32) -> Result<(), XskError> {
        let ring = Arc::new(Ring::new(entries)?);
        self.cq.set(ring).map_err(|_| XskError::Invalid)
    }

    /// The fill ring, if created.
    pub fn fq(&self) -> Option<&Arc<Ring<u32>>> {
        self.fq.get()
    }

    /// The completion ring, if created.
    pub fn cq(&self) -> Option<&Arc<Ring<u32>>> {
        self.cq.get()
    }

    /// Whether both control rings exist; a precondition for binding a socket
    /// that owns this umem.
    pub fn validate_queues(&self) -> bool {
        self.fq.get().is_some() && self.cq.get().is_some()
    }

    /// Pointer to the start of frame `idx`.
    ///
    /// Out-of-range indices are a programming error at the caller layer;
    /// invalid descriptors are filtered at ring level.
    #[inline]
    pub fn data(&self, idx: u32) -> *mut u8 {
        #[cfg(not(feature = "no_safety_checks"))]
        assert!(idx < self.nframes);
        unsafe { self.area.base().add(idx as usize * self.frame_size as usize) }
    }

    /// Pointer to the receive payload position of frame `idx`.
    #[inline]
    pub fn data_with_headroom(&self, idx: u32) -> *mut u8 {
        unsafe { self.data(idx).add(self.headroom as usize) }
    }

    /// Copies `src` into frame `idx` starting at byte `at`.
    ///
    /// Frame ownership discipline makes this race-free: a frame is written
    /// only by whichever side currently owns it.
    pub fn write_frame(&self, idx: u32, at: u32, src: &[u8]) {
        #[cfg(not(feature = "no_safety_checks"))]
        assert!(at as usize + src.len() <= self.frame_size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.data(idx).add(at as usize), src.len())
        };
    }

    /// Copies `dst.len()` bytes out of frame `idx` starting at byte `at`.
    pub fn read_frame(&self, idx: u32, at: u32, dst: &mut [u8]) {
        #[cfg(not(feature = "no_safety_checks"))]
        assert!(at as usize + dst.len() <= self.frame_size as usize);
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data(idx).add(at as usize),
                dst.as_mut_ptr(),
                dst.len(),
            )
        };
    }

    pub(crate) fn tx_started(&self) {
        self.inflight_tx.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tx_completed(&self) {
        self.inflight_tx.fetch_sub(1, Ordering::Relaxed);
    }

    /// Frames submitted to a device whose completion has not landed yet.
    pub fn inflight_tx(&self) -> u64 {
        self.inflight_tx.load(Ordering::Relaxed)
    }

    /// Busy-waits until every in-flight transmit frame has completed.
    ///
    /// Used by the rebind drain policy; completions make forward progress in
    /// the device's context, so this terminates.
    pub(crate) fn wait_tx_idle(&self) {
        while self.inflight_tx() != 0 {
            std::thread::yield_now();
        }
    }
}

//
// ================================================================================================
//   UNITTESTS
// ================================================================================================
//
#[cfg(test)]
mod tests {
    use super::*;

    fn area(len: usize) -> UmemArea {
        UmemArea::alloc(len, Some(false)).unwrap()
    }

    fn reg_for(a: &UmemArea, len: u64, frame_size: u32, headroom: u32) -> UmemReg {
        UmemReg {
            addr: a.addr(),
            len,
            frame_size,
            headroom,
        }
    }

    #[test]
    fn registration_validates_geometry() {
        let a = area(8 * 2048);
        let base = a.addr();

        // length not a multiple of the frame size
        let r = reg_for(&a, 8 * 2048 - 100, 2048, 0);
        assert_eq!(Umem::register(a, &r).err(), Some(XskError::Invalid));

        // non-power-of-two frame size
        let a2 = area(8 * 2048);
        let r = reg_for(&a2, 6000, 3000, 0);
        assert_eq!(Umem::register(a2, &r).err(), Some(XskError::Invalid));

        // any power-of-two page divisor works as a frame size
        let a3 = area(8 * 2048);
        let r = reg_for(&a3, 8 * 1024, 1024, 0);
        let um = Umem::register(a3, &r).unwrap();
        assert_eq!(um.nframes(), 8);
        assert_eq!(um.frame_size(), 1024);

        // headroom must leave room for payload
        let a4 = area(8 * 2048);
        let r = reg_for(&a4, 8 * 2048, 2048, 2048);
        assert_eq!(Umem::register(a4, &r).err(), Some(XskError::Invalid));

        // mismatched base address
        let a5 = area(8 * 2048);
        let mut r = reg_for(&a5, 8 * 2048, 2048, 0);
        r.addr = base.wrapping_add(page_size() as u64);
        assert_eq!(Umem::register(a5, &r).err(), Some(XskError::Invalid));

        // a valid registration
        let a6 = area(8 * 2048);
        let r = reg_for(&a6, 8 * 2048, 2048, 64);
        let um = Umem::register(a6, &r).unwrap();
        assert_eq!(um.nframes(), 8);
        assert_eq!(um.frame_size(), 2048);
        assert_eq!(um.headroom(), 64);
    }

    #[test]
    fn accessors_return_frame_addresses() {
        let a = area(8 * 2048);
        let base = a.base() as usize;
        let r = reg_for(&a, 8 * 2048, 2048, 128);
        let um = Umem::register(a, &r).unwrap();
        for i in 0..8u32 {
            assert_eq!(um.data(i) as usize, base + i as usize * 2048);
            assert_eq!(
                um.data_with_headroom(i) as usize,
                base + i as usize * 2048 + 128
            );
        }
    }

    #[test]
    fn control_rings_are_create_once() {
        let a = area(4 * 2048);
        let r = reg_for(&a, 4 * 2048, 2048, 0);
        let um = Umem::register(a, &r).unwrap();
        assert!(!um.validate_queues());
        um.create_fill_ring(4).unwrap();
        assert_eq!(um.create_fill_ring(4), Err(XskError::Invalid));
        assert!(!um.validate_queues());
        um.create_completion_ring(4).unwrap();
        assert_eq!(um.create_completion_ring(8), Err(XskError::Invalid));
        assert!(um.validate_queues());
    }

    #[test]
    fn frame_copies_round_trip() {
        let a = area(4 * 2048);
        let r = reg_for(&a, 4 * 2048, 2048, 32);
        let um = Umem::register(a, &r).unwrap();
        let payload = [0xabu8; 64];
        um.write_frame(2, um.headroom(), &payload);
        let mut out = [0u8; 64];
        um.read_frame(2, 32, &mut out);
        assert_eq!(out, payload);
    }
}
