//! # Socket Lifecycle and Configuration
//!
//! ## Purpose
//!
//! This file implements the socket itself: the configuration surface that
//! creates the four rings and registers the umem, the bind path (own umem,
//! shared umem, rebind), idempotent release with hook quiescence, the mmap
//! contract handing ring memory to user-space, and the statistics snapshot.
//!
//! ## How it works
//!
//! A socket separates its control-plane state (device and queue id, guarded
//! by the socket mutex, which also serializes the TX data path) from a
//! data-path snapshot (`hot`) behind a reader/writer lock. Frame deliveries
//! from the hook run under the read side of that lock; bind and release take
//! the write side, which by construction waits for every in-flight delivery
//! to finish. That write acquisition is the quiescence barrier.
//!
//! ## Main components
//!
//! - `XskSocket`: The socket.
//! - `SockaddrXdp`: The binary bind address.
//! - `SocketOption`: The setsockopt-style configuration payloads.
//! - `Statistics`: The getsockopt statistics record.

use crate::dev::Device;
use crate::error::XskError;
use crate::mmap::UmemArea;
use crate::net::Net;
use crate::poll::SockWaker;
use crate::ring::{Ring, RingDesc, RingMapping, RingType};
use crate::umem::{Umem, UmemReg};
use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The address family of this socket family.
pub const AF_XDP: u16 = libc::AF_XDP as u16;

/// Bind flag: adopt the umem of the socket named by `shared_umem_handle`.
pub const XDP_SHARED_UMEM: u16 = 0x1;

/// The binary bind address.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SockaddrXdp {
    /// Must be `AF_XDP`.
    pub family: u16,
    /// Bind flags; `XDP_SHARED_UMEM` is the only recognized bit.
    pub flags: u16,
    /// Interface index to bind to.
    pub ifindex: u32,
    /// Receive queue to bind to.
    pub queue_id: u32,
    /// Handle of the socket to share a umem with, when the flag is set.
    pub shared_umem_handle: u32,
}

/// The statistics record returned by `XskSocket::statistics`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Statistics {
    /// Deliveries dropped on the receive path.
    pub rx_dropped: u64,
    /// Descriptors rejected by validation on the rx ring.
    pub rx_invalid_descs: u64,
    /// Descriptors rejected by validation on the tx ring.
    pub tx_invalid_descs: u64,
}

/// Per-socket configuration fixed at creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConfig {
    /// When rebinding, wait for in-flight transmit completions of the
    /// previous binding to land before the new binding attaches. The default
    /// leaves completions free to interleave across rebinds.
    pub drain_completions_on_rebind: bool,
}

/// One setsockopt-style configuration request.
pub enum SocketOption {
    /// Create the rx ring with the given number of entries.
    RxRing(u32),
    /// Create the tx ring with the given number of entries.
    TxRing(u32),
    /// Register the umem: the donated area plus its registration record.
    UmemReg(UmemArea, UmemReg),
    /// Create the umem fill ring; requires a registered umem.
    UmemFillRing(u32),
    /// Create the umem completion ring; requires a registered umem.
    UmemCompletionRing(u32),
}

/// Control-plane binding state, guarded by the socket mutex.
pub(crate) struct Ctrl {
    pub(crate) dev: Option<Arc<Device>>,
    pub(crate) queue_id: u32,
}

/// The data-path snapshot frame deliveries run against.
pub(crate) struct HotPath {
    pub(crate) ifindex: u32,
    pub(crate) queue_id: u32,
    pub(crate) umem: Arc<Umem>,
    pub(crate) rx: Option<Arc<Ring<RingDesc>>>,
}

/// A socket of this family.
///
/// Created unbound with no umem and no rings; configured through
/// `setsockopt`; bound to one (device, queue) pair; torn down by `release`.
pub struct XskSocket {
    id: u32,
    net: Arc<Net>,
    config: SocketConfig,
    /// The socket mutex: control-plane mutations and the TX data path.
    pub(crate) ctrl: Mutex<Ctrl>,
    /// Data-path binding; taking the write side quiesces the hook.
    pub(crate) hot: RwLock<Option<HotPath>>,
    /// Mutated only under the socket mutex; read-lockable elsewhere.
    pub(crate) umem: RwLock<Option<Arc<Umem>>>,
    pub(crate) rx: RwLock<Option<Arc<Ring<RingDesc>>>>,
    pub(crate) tx: RwLock<Option<Arc<Ring<RingDesc>>>>,
    pub(crate) rx_dropped: AtomicU64,
    pub(crate) waker: Arc<SockWaker>,
    released: AtomicBool,
}

impl XskSocket {
    pub(crate) fn new(id: u32, net: Arc<Net>, config: SocketConfig) -> Arc<XskSocket> {
        Arc::new(XskSocket {
            id,
            net,
            config,
            ctrl: Mutex::new(Ctrl {
                dev: None,
                queue_id: 0,
            }),
            hot: RwLock::new(None),
            umem: RwLock::new(None),
            rx: RwLock::new(None),
            tx: RwLock::new(None),
            rx_dropped: AtomicU64::new(0),
            waker: Arc::new(SockWaker::new()),
            released: AtomicBool::new(false),
        })
    }

    /// The handle other sockets present to share this socket's umem.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the hook may target this socket at all: it has an rx ring.
    pub fn hook_ready(&self) -> bool {
        self.rx.read().is_some()
    }

    /// The socket's rx ring, if configured.
    pub fn rx_ring(&self) -> Option<Arc<Ring<RingDesc>>> {
        self.rx.read().clone()
    }

    /// The socket's tx ring, if configured.
    pub fn tx_ring(&self) -> Option<Arc<Ring<RingDesc>>> {
        self.tx.read().clone()
    }

    /// The socket's umem, if registered or adopted.
    pub fn umem(&self) -> Option<Arc<Umem>> {
        self.umem.read().clone()
    }

    /// Applies one configuration request.
    ///
    /// The requests may arrive in any order, except that the umem control
    /// rings require the umem to be registered first. Each ring and the umem
    /// itself can be created exactly once.
    pub fn setsockopt(&self, opt: SocketOption) -> Result<(), XskError> {
        if self.released.load(Ordering::Acquire) {
            return Err(XskError::Invalid);
        }
        let _guard = self.ctrl.lock();
        match opt {
            SocketOption::RxRing(entries) => Self::init_queue(&self.rx, entries),
            SocketOption::TxRing(entries) => Self::init_queue(&self.tx, entries),
            SocketOption::UmemReg(area, reg) => {
                if self.umem.read().is_some() {
                    return Err(XskError::Busy);
                }
                let umem = Umem::register(area, &reg)?;
                *self.umem.write() = Some(umem);
                Ok(())
            }
            SocketOption::UmemFillRing(entries) => {
                let umem = self.umem.read().clone().ok_or(XskError::Invalid)?;
                umem.create_fill_ring(entries)
            }
            SocketOption::UmemCompletionRing(entries) => {
                let umem = self.umem.read().clone().ok_or(XskError::Invalid)?;
                umem.create_completion_ring(entries)
            }
        }
    }

    fn init_queue(
        slot: &RwLock<Option<Arc<Ring<RingDesc>>>>,
        entries: u32,
    ) -> Result<(), XskError> {
        if slot.read().is_some() {
            return Err(XskError::Invalid);
        }
        let ring = Arc::new(Ring::new(entries)?);
        *slot.write() = Some(ring);
        Ok(())
    }

    /// The statistics snapshot.
    pub fn statistics(&self) -> Statistics {
        let _guard = self.ctrl.lock();
        Statistics {
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            rx_invalid_descs: self.rx.read().as_ref().map_or(0, |r| r.nb_invalid()),
            tx_invalid_descs: self.tx.read().as_ref().map_or(0, |r| r.nb_invalid()),
        }
    }

    /// Binds the socket to a (device, queue) pair.
    ///
    /// # How it works
    ///
    /// With its own umem the socket requires both control rings and
    /// broadcasts the umem geometry to them. With `XDP_SHARED_UMEM` it
    /// adopts the umem of the socket named by the handle, which must already
    /// be bound to the same (device, queue). Binding while bound to a
    /// different pair is a rebind: the old binding is quiesced and detached
    /// before the new one attaches.
    ///
    /// # Errors
    ///
    /// `XskError::NoDev` for an unknown interface, `XskError::Invalid` for a
    /// wrong family, a socket with no data rings, an out-of-range queue id,
    /// a missing or incomplete umem, or a shared-umem handle naming a
    /// foreign or mismatched socket, and `XskError::BadHandle` for a handle
    /// naming a socket without a umem.
    pub fn bind(&self, addr: &SockaddrXdp) -> Result<(), XskError> {
        if addr.family != AF_XDP {
            return Err(XskError::Invalid);
        }
        if self.released.load(Ordering::Acquire) {
            return Err(XskError::Invalid);
        }
        let mut ctrl = self.ctrl.lock();

        let dev = self.net.device(addr.ifindex).ok_or(XskError::NoDev)?;
        let rx = self.rx.read().clone();
        let tx = self.tx.read().clone();
        if rx.is_none() && tx.is_none() {
            return Err(XskError::Invalid);
        }
        if addr.queue_id >= dev.num_rx_queues() {
            return Err(XskError::Invalid);
        }

        let mut adopted: Option<Arc<Umem>> = None;
        if addr.flags & XDP_SHARED_UMEM != 0 {
            if self.umem.read().is_some() {
                // we have already our own
                return Err(XskError::Invalid);
            }
            let peer = self
                .net
                .socket(addr.shared_umem_handle)
                .ok_or(XskError::Invalid)?;
            let peer_umem = peer.umem.read().clone().ok_or(XskError::BadHandle)?;
            let same_queue = matches!(
                &*peer.hot.read(),
                Some(h) if h.ifindex == addr.ifindex && h.queue_id == addr.queue_id
            );
            if !same_queue {
                return Err(XskError::Invalid);
            }
            adopted = Some(peer_umem);
        } else {
            let umem = self.umem.read().clone().ok_or(XskError::Invalid)?;
            if !umem.validate_queues() {
                return Err(XskError::Invalid);
            }
            // this socket owns its umem: broadcast geometry to the control
            // rings
            let props = umem.props();
            if let Some(fq) = umem.fq() {
                fq.set_props(props);
            }
            if let Some(cq) = umem.cq() {
                cq.set_props(props);
            }
        }

        // rebind: quiesce and detach the previous binding first
        let rebinding = match &ctrl.dev {
            Some(cur) => cur.ifindex() != dev.ifindex() || ctrl.queue_id != addr.queue_id,
            None => false,
        };
        if rebinding {
            if self.config.drain_completions_on_rebind {
                if let Some(old) = self.umem.read().clone() {
                    old.wait_tx_idle();
                }
            }
            *self.hot.write() = None;
            ctrl.dev = None;
        }

        if let Some(umem) = adopted {
            *self.umem.write() = Some(umem);
        }
        let umem = self.umem.read().clone().ok_or(XskError::Invalid)?;

        ctrl.dev = Some(dev.clone());
        ctrl.queue_id = addr.queue_id;

        let props = umem.props();
        if let Some(r) = &rx {
            r.set_props(props);
        }
        if let Some(t) = &tx {
            t.set_props(props);
        }

        *self.hot.write() = Some(HotPath {
            ifindex: dev.ifindex(),
            queue_id: addr.queue_id,
            umem,
            rx,
        });
        Ok(())
    }

    /// Releases the socket: quiesces the hook, detaches the device, drops
    /// the umem reference and destroys the owned rings. Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut ctrl = self.ctrl.lock();
        // quiesce first, free second: the write acquisition waits for every
        // in-flight hook delivery
        *self.hot.write() = None;
        ctrl.dev = None;
        ctrl.queue_id = 0;
        *self.umem.write() = None;
        *self.rx.write() = None;
        *self.tx.write() = None;
        drop(ctrl);
        self.net.remove_socket(self.id);
        self.waker.wake();
    }

    /// Hands a ring's backing memory to user-space.
    ///
    /// `page_offset` selects the ring (`XSK_PGOFF_*`); the umem control
    /// rings additionally require a registered umem. Requests larger than
    /// the ring's backing allocation are rejected.
    pub fn mmap(&self, page_offset: u64, len: usize) -> Result<RingMapping, XskError> {
        match RingType::from_page_offset(page_offset).ok_or(XskError::Invalid)? {
            RingType::Rx => {
                let ring = self.rx.read().clone().ok_or(XskError::Invalid)?;
                RingMapping::new(ring, len)
            }
            RingType::Tx => {
                let ring = self.tx.read().clone().ok_or(XskError::Invalid)?;
                RingMapping::new(ring, len)
            }
            umem_ring => {
                let umem = self.umem.read().clone().ok_or(XskError::Invalid)?;
                let ring = match umem_ring {
                    RingType::Fill => umem.fq().cloned(),
                    _ => umem.cq().cloned(),
                };
                RingMapping::new(ring.ok_or(XskError::Invalid)?, len)
            }
        }
    }
}

impl Drop for XskSocket {
    fn drop(&mut self) {
        self.net.remove_socket(self.id);
    }
}
