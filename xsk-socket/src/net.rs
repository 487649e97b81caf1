//! # Network Context
//!
//! ## Purpose
//!
//! This file holds the namespace-like context sockets are created in: the
//! device registry the bind path resolves interface indices against, the
//! socket registry the shared-umem bind path resolves handles against (the
//! same index-keyed table the hook layer dispatches through), and the
//! capability gate on socket creation.
//!
//! ## Main components
//!
//! - `Net`: The context owning both registries.
//! - `Capabilities`: The capability set presented at socket creation.

use crate::dev::Device;
use crate::error::XskError;
use crate::socket::{SocketConfig, XskSocket};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// The socket type this family supports.
pub const SOCK_RAW: i32 = libc::SOCK_RAW;

/// A capability set presented by a socket creator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Capabilities = Capabilities(0);
    /// The raw-packet capability required to create sockets of this family.
    pub const NET_RAW: Capabilities = Capabilities(1);

    /// Whether every capability in `other` is present in `self`.
    pub fn has(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

/// The context sockets and devices live in.
pub struct Net {
    devices: RwLock<HashMap<u32, Arc<Device>>>,
    sockets: Mutex<HashMap<u32, Weak<XskSocket>>>,
    next_sock_id: AtomicU32,
}

impl Net {
    /// Creates an empty context.
    pub fn new() -> Arc<Net> {
        Arc::new(Net {
            devices: RwLock::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
            next_sock_id: AtomicU32::new(1),
        })
    }

    /// Registers a device under its interface index, replacing any previous
    /// registration of the same index.
    pub fn add_device(&self, dev: Device) -> Arc<Device> {
        let dev = Arc::new(dev);
        self.devices.write().insert(dev.ifindex(), dev.clone());
        dev
    }

    /// Looks a device up by interface index.
    pub fn device(&self, ifindex: u32) -> Option<Arc<Device>> {
        self.devices.read().get(&ifindex).cloned()
    }

    /// Creates a socket of this family.
    ///
    /// # Errors
    ///
    /// `XskError::Perm` without the raw-packet capability,
    /// `XskError::NotSupported` for any type other than `SOCK_RAW` or a
    /// nonzero protocol number.
    pub fn create_socket(
        self: &Arc<Self>,
        caps: Capabilities,
        sock_type: i32,
        protocol: i32,
    ) -> Result<Arc<XskSocket>, XskError> {
        self.create_socket_with(caps, sock_type, protocol, SocketConfig::default())
    }

    /// `create_socket` with an explicit per-socket configuration.
    pub fn create_socket_with(
        self: &Arc<Self>,
        caps: Capabilities,
        sock_type: i32,
        protocol: i32,
        config: SocketConfig,
    ) -> Result<Arc<XskSocket>, XskError> {
        if !caps.has(Capabilities::NET_RAW) {
            return Err(XskError::Perm);
        }
        if sock_type != SOCK_RAW {
            return Err(XskError::NotSupported);
        }
        if protocol != 0 {
            return Err(XskError::NotSupported);
        }
        let id = self.next_sock_id.fetch_add(1, Ordering::Relaxed);
        let sock = XskSocket::new(id, self.clone(), config);
        self.sockets.lock().insert(id, Arc::downgrade(&sock));
        Ok(sock)
    }

    /// Resolves a socket handle, as the shared-umem bind path does.
    pub fn socket(&self, handle: u32) -> Option<Arc<XskSocket>> {
        self.sockets.lock().get(&handle).and_then(Weak::upgrade)
    }

    pub(crate) fn remove_socket(&self, id: u32) {
        self.sockets.lock().remove(&id);
    }
}
