//! # Readiness and Poll
//!
//! ## Purpose
//!
//! This file implements the readiness surface of the socket: the mask a
//! poll-style caller inspects (readable while the rx ring has published
//! descriptors, writable while the tx ring has room) and a blocking
//! `poll_wait` that suspends the caller until the receive flush or a
//! transmit completion wakes it.
//!
//! ## Main components
//!
//! - `impl XskSocket`: `poll_mask` and `poll_wait`.
//! - `SockWaker`: The condvar-backed wait queue shared by both wake sources.

use crate::socket::XskSocket;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// The wait queue poll sleeps on.
///
/// Woken by the receive flush (data ready) and by the transmit-buffer
/// destructor (write space).
pub(crate) struct SockWaker {
    seq: Mutex<u64>,
    cv: Condvar,
}

impl SockWaker {
    pub(crate) fn new() -> SockWaker {
        SockWaker {
            seq: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn wake(&self) {
        *self.seq.lock() += 1;
        self.cv.notify_all();
    }
}

impl XskSocket {
    /// The current readiness mask.
    ///
    /// `POLLIN | POLLRDNORM` while the rx ring is non-empty and
    /// `POLLOUT | POLLWRNORM` while the tx ring is not full, combined the way
    /// the generic socket layer combines them.
    pub fn poll_mask(&self) -> i16 {
        let mut mask = 0;
        if let Some(rx) = &*self.rx.read() {
            if !rx.is_empty() {
                mask |= libc::POLLIN | libc::POLLRDNORM;
            }
        }
        if let Some(tx) = &*self.tx.read() {
            if !tx.is_full() {
                mask |= libc::POLLOUT | libc::POLLWRNORM;
            }
        }
        mask
    }

    /// Blocks until the readiness mask intersects `events` or the timeout
    /// elapses, and returns the intersection (zero on timeout).
    pub fn poll_wait(&self, events: i16, timeout: Option<Duration>) -> i16 {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let ready = self.poll_mask() & events;
            if ready != 0 {
                return ready;
            }
            let mut seq = self.waker.seq.lock();
            // re-check with the waker lock held so a wake between the check
            // and the wait cannot be lost
            let ready = self.poll_mask() & events;
            if ready != 0 {
                return ready;
            }
            match deadline {
                Some(d) => {
                    if self.waker.cv.wait_until(&mut seq, d).timed_out() {
                        return self.poll_mask() & events;
                    }
                }
                None => self.waker.cv.wait(&mut seq),
            }
        }
    }
}
