//! # Transmit Engine
//!
//! ## Purpose
//!
//! This file implements the egress path: drain descriptors from the tx ring
//! in bounded batches, copy each frame into a transmit buffer, and submit it
//! to the bound device's queue. The frame index rides on the buffer's
//! destructor; when the device releases the buffer, the index lands on the
//! completion ring whose capacity was reserved before submission.
//!
//! ## How it works
//!
//! `sendmsg` is non-blocking only. It runs under the socket mutex (transmit
//! is user-initiated and may race bind and release) and processes at most
//! `TX_BATCH_SIZE` descriptors per call. Ring backpressure anywhere in the
//! batch surfaces as `Again` with the pending descriptor left in place; the
//! caller retries after poll signals writability.
//!
//! ## Main components
//!
//! - `impl XskSocket`: `sendmsg`.
//! - `TxFrame`: The per-frame transmit buffer with the completion destructor.
//! - `SendFlags`: The non-blocking contract.

use crate::dev::{Device, TxVerdict};
use crate::error::XskError;
use crate::poll::SockWaker;
use crate::ring::Ring;
use crate::socket::{Ctrl, XskSocket};
use crate::umem::Umem;
use std::sync::Arc;

/// Upper bound on descriptors processed per `sendmsg` call.
pub const TX_BATCH_SIZE: u32 = 16;

/// Flags accompanying a send request.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendFlags {
    /// Must be set; blocking sends are not supported.
    pub dont_wait: bool,
}

struct CompletionHandle {
    cq: Arc<Ring<u32>>,
    umem: Arc<Umem>,
    waker: Arc<SockWaker>,
}

/// One frame handed to a device's transmit path.
///
/// The device owns the frame from submission on; dropping it is the transmit
/// completion, publishing the frame index to the completion ring reserved at
/// submission time and waking poll waiters.
pub struct TxFrame {
    data: Box<[u8]>,
    idx: u32,
    completion: Option<CompletionHandle>,
}

impl TxFrame {
    /// The frame payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The umem frame index this buffer was copied from.
    pub fn frame_index(&self) -> u32 {
        self.idx
    }
}

impl Drop for TxFrame {
    fn drop(&mut self) {
        if let Some(c) = self.completion.take() {
            // capacity was reserved before submission, so this cannot fail
            c.cq.produce_id(self.idx);
            c.umem.tx_completed();
            c.waker.wake();
        }
    }
}

impl XskSocket {
    /// Sends pending tx-ring descriptors to the bound device.
    ///
    /// Non-blocking only; a batch ends early on ring backpressure (`Again`),
    /// an oversized descriptor (`MsgSize`), or an empty tx ring (success).
    ///
    /// # Errors
    ///
    /// `XskError::NoXio` unbound, `XskError::NetDown` interface down,
    /// `XskError::NoBufs` without a tx ring, `XskError::NotSupported` for a
    /// blocking send, `XskError::Again`/`XskError::MsgSize` from the batch.
    pub fn sendmsg(&self, flags: SendFlags) -> Result<(), XskError> {
        let ctrl = self.ctrl.lock();
        let dev = ctrl.dev.clone().ok_or(XskError::NoXio)?;
        if !dev.is_up() {
            return Err(XskError::NetDown);
        }
        self.generic_xmit(&ctrl, &dev, flags)
    }

    fn generic_xmit(&self, ctrl: &Ctrl, dev: &Device, flags: SendFlags) -> Result<(), XskError> {
        let tx = self.tx.read().clone().ok_or(XskError::NoBufs)?;
        if !flags.dont_wait {
            return Err(XskError::NotSupported);
        }
        let umem = self.umem.read().clone().ok_or(XskError::NoBufs)?;
        let cq = umem.cq().cloned().ok_or(XskError::NoBufs)?;

        let mut batch = TX_BATCH_SIZE;
        let mut sent_frame = false;
        let mut err = Ok(());

        while let Some(desc) = tx.peek_desc() {
            if batch == 0 {
                err = Err(XskError::Again);
                break;
            }
            batch -= 1;

            if cq.reserve(1).is_err() {
                err = Err(XskError::Again);
                break;
            }

            if desc.len > dev.mtu() {
                err = Err(XskError::MsgSize);
                break;
            }

            let mut data = vec![0u8; desc.len as usize].into_boxed_slice();
            umem.read_frame(desc.idx, desc.offset, &mut data);
            umem.tx_started();
            let frame = TxFrame {
                data,
                idx: desc.idx,
                completion: Some(CompletionHandle {
                    cq: cq.clone(),
                    umem: umem.clone(),
                    waker: self.waker.clone(),
                }),
            };

            match dev.direct_xmit(frame, ctrl.queue_id) {
                // the frame was consumed by the device layer either way
                TxVerdict::Busy | TxVerdict::Dropped => {
                    err = Err(XskError::Again);
                    break;
                }
                TxVerdict::Sent => {}
            }

            sent_frame = true;
            tx.discard();
        }

        if sent_frame {
            self.waker.wake();
        }
        err
    }
}
