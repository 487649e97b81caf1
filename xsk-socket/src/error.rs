//! # Socket Error Kinds
//!
//! ## Purpose
//!
//! This file defines the single error type surfaced by every control-plane
//! and data-plane operation of the crate. Each variant corresponds to one of
//! the error conditions a caller can act on; data-path backpressure is kept
//! distinct from malformed-argument failures so callers can retry the former
//! and must fix the latter.
//!
//! ## Main components
//!
//! - `XskError`: The error enum, one variant per surfaced condition.

use thiserror::Error;

/// Errors surfaced by socket, umem and ring operations.
///
/// Backpressure conditions (`NoSpace`, `Again`) are transient and may be
/// retried once the peer side has drained a ring; every other variant
/// reflects a caller or environment problem.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XskError {
    /// Malformed arguments: wrong family, non-power-of-two ring size,
    /// out-of-range queue id, mismatched rebind parameters.
    #[error("invalid argument")]
    Invalid,

    /// No buffer space: sending without a tx ring configured.
    #[error("no buffer space available")]
    NoBufs,

    /// Memory allocation or page-pinning failure.
    #[error("out of memory")]
    NoMem,

    /// Transient ring backpressure: fill ring empty or rx ring full on the
    /// receive path, completion slots unavailable on the transmit path.
    #[error("no space left on ring")]
    NoSpace,

    /// The transmit batch was cut short by backpressure; retry later.
    #[error("resource temporarily unavailable")]
    Again,

    /// Descriptor length exceeds the bound device's MTU.
    #[error("message too long")]
    MsgSize,

    /// No device with the requested interface index.
    #[error("no such device")]
    NoDev,

    /// Sending on a socket that is not bound to a device.
    #[error("no such device or address")]
    NoXio,

    /// The bound interface is down.
    #[error("network is down")]
    NetDown,

    /// A umem is already registered on this socket.
    #[error("device or resource busy")]
    Busy,

    /// The shared-umem handle names a socket that has no umem.
    #[error("bad shared-umem handle")]
    BadHandle,

    /// Blocking send, or an operation this socket family does not implement.
    #[error("operation not supported")]
    NotSupported,

    /// The caller lacks the raw-packet capability.
    #[error("operation not permitted")]
    Perm,
}
