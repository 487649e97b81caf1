//! # User-Space Ring Views
//!
//! ## Purpose
//!
//! This crate is the consumer-process half of the socket family: typed views
//! over the ring memory a socket hands out through its `mmap` contract. With
//! a view in hand, an application donates frames on the fill queue, drains
//! received descriptors from the rx queue, submits descriptors on the tx
//! queue and reclaims completed frames from the completion queue without any
//! further calls into the socket.
//!
//! ## How it works
//!
//! Each view interprets the documented ring layout (two padded counters
//! followed by the slot array) and keeps locally cached copies of both
//! counters so the shared cache lines are only touched when the cached view
//! runs out. Counter updates use acquire loads of the peer's counter and
//! release stores of the own counter; slot accesses are plain reads and
//! writes.

pub mod queue;

pub use queue::{CompQueue, FillQueue, RxQueue, TxQueue, UserCons, UserProd};
