//! # Device Abstraction
//!
//! ## Purpose
//!
//! This file models the external collaborators the socket binds to: a network
//! device with a fixed number of receive queues, an MTU and an up/down state,
//! plus the transmit path the TX engine submits frames into. The
//! packet-processing hook on the receive side is only a contract here: it
//! delivers `RxBuff` buffers tagged with the originating device and queue.
//!
//! ## Main components
//!
//! - `Device`: The bindable device; its `Arc` strong count stands in for the
//!   kernel's device reference count.
//! - `TxDriver`: The device transmit path consuming `TxFrame`s.
//! - `TxVerdict`: Accepted / transient-busy / dropped submission outcomes.
//! - `RxBuff`: The hook's delivery contract.
//! - `DiscardDriver`: A driver that completes every frame immediately.

use crate::tx::TxFrame;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of submitting one frame to a device's transmit path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxVerdict {
    /// The frame was queued for transmission.
    Sent,
    /// The device queue is transiently busy; the frame was still consumed.
    Busy,
    /// The device dropped the frame; the frame was still consumed.
    Dropped,
}

/// The transmit path of a device.
///
/// The driver takes ownership of the frame in every case; dropping the frame
/// is what signals transmit completion back to the umem's completion ring.
pub trait TxDriver: Send + Sync {
    /// Submits one frame on the given device queue.
    fn xmit(&self, frame: TxFrame, queue_id: u32) -> TxVerdict;
}

/// A network device a socket can bind to.
pub struct Device {
    ifindex: u32,
    name: String,
    mtu: u32,
    num_rx_queues: u32,
    up: AtomicBool,
    driver: Box<dyn TxDriver>,
}

impl Device {
    /// Creates a device, initially up.
    pub fn new(
        ifindex: u32,
        name: impl Into<String>,
        mtu: u32,
        num_rx_queues: u32,
        driver: Box<dyn TxDriver>,
    ) -> Device {
        Device {
            ifindex,
            name: name.into(),
            mtu,
            num_rx_queues,
            up: AtomicBool::new(true),
            driver,
        }
    }

    /// The interface index.
    #[inline]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// The interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device MTU in bytes.
    #[inline]
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Number of receive queues; bind rejects queue ids at or past this.
    #[inline]
    pub fn num_rx_queues(&self) -> u32 {
        self.num_rx_queues
    }

    /// Whether the interface is administratively up.
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Raises or lowers the interface.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    /// Submits a frame directly on the device's transmit queue.
    pub(crate) fn direct_xmit(&self, frame: TxFrame, queue_id: u32) -> TxVerdict {
        self.driver.xmit(frame, queue_id)
    }
}

/// A transmit driver that accepts and immediately releases every frame, so
/// completions land as soon as the submission returns. Useful for drop-style
/// benchmarks and tests.
pub struct DiscardDriver;

impl TxDriver for DiscardDriver {
    fn xmit(&self, frame: TxFrame, _queue_id: u32) -> TxVerdict {
        drop(frame);
        TxVerdict::Sent
    }
}

/// One buffer delivered by the packet-processing hook.
///
/// The hook guarantees only this contract: the originating device and queue,
/// and the packet bytes, valid for the duration of the delivery.
#[derive(Debug, Clone, Copy)]
pub struct RxBuff<'a> {
    /// Interface index of the originating device.
    pub ifindex: u32,
    /// Receive queue the packet arrived on.
    pub queue_id: u32,
    /// The packet bytes.
    pub data: &'a [u8],
}
