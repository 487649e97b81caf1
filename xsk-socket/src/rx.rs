//! # Receive Engine
//!
//! ## Purpose
//!
//! This file implements the ingress path the packet-processing hook invokes:
//! take one delivered buffer, move one frame from the fill ring to the rx
//! ring with the payload copied in at the headroom offset, and account every
//! failure as a drop. The path is allocation-free and must stay that way; it
//! runs in the hook's execution context.
//!
//! ## How it works
//!
//! `rcv` runs the delivery under the data-path read guard (the hook's
//! quiescence section) and never publishes: a batching caller publishes once
//! per batch through `flush`, which also wakes poll waiters. `rcv_flush` is
//! the software-path variant that publishes and wakes after every delivery.
//! On any failure the fill-ring peek is abandoned, so the frame stays on the
//! fill ring, and `rx_dropped` increments; drops are never retried.

use crate::dev::RxBuff;
use crate::error::XskError;
use crate::socket::{HotPath, XskSocket};
use crate::ring::RingDesc;
use std::sync::atomic::Ordering;

impl XskSocket {
    fn rcv_inner(&self, hot: &HotPath, buf: &RxBuff) -> Result<(), XskError> {
        if buf.ifindex != hot.ifindex || buf.queue_id != hot.queue_id {
            return Err(XskError::Invalid);
        }
        let rx = hot.rx.as_ref().ok_or(XskError::Invalid)?;
        let umem = &hot.umem;
        let len = buf.data.len() as u32;
        if len > umem.frame_size() - umem.headroom() {
            return Err(XskError::Invalid);
        }
        let fq = umem.fq().ok_or(XskError::NoSpace)?;
        let idx = fq.peek_id().ok_or(XskError::NoSpace)?;

        umem.write_frame(idx, umem.headroom(), buf.data);
        // the rx produce can still fail on a full ring; only after it
        // succeeds does the fill-ring handoff complete
        rx.produce(RingDesc::new(idx, len, umem.headroom()))?;
        fq.discard();
        Ok(())
    }

    /// Delivers one buffer from the hook without publishing.
    ///
    /// The fast path: the caller batches deliveries and calls `flush` once.
    /// Any failure counts as a drop and leaves the fill ring untouched.
    pub fn rcv(&self, buf: &RxBuff) -> Result<(), XskError> {
        let hot = self.hot.read();
        let res = match &*hot {
            Some(hot) => self.rcv_inner(hot, buf),
            None => Err(XskError::Invalid),
        };
        if res.is_err() {
            self.rx_dropped.fetch_add(1, Ordering::Relaxed);
        }
        res
    }

    /// Publishes every staged rx descriptor and wakes poll waiters.
    pub fn flush(&self) {
        if let Some(rx) = &*self.rx.read() {
            rx.produce_flush();
        }
        self.waker.wake();
    }

    /// The generic software path: deliver one buffer, then publish and wake.
    pub fn rcv_flush(&self, buf: &RxBuff) -> Result<(), XskError> {
        let res = self.rcv(buf);
        if res.is_ok() {
            self.flush();
        }
        res
    }
}
