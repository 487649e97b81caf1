//! Shared fixtures for the integration suites: a context with one device,
//! transmit drivers with scripted behavior, and umem/ring setup shorthand.
#![allow(dead_code)]

use parking_lot::Mutex;
use std::ops::Range;
use std::sync::Arc;
use xsk_socket::{
    Capabilities, Device, Net, SockaddrXdp, SocketOption, TxDriver, TxFrame, TxVerdict, UmemArea,
    UmemReg, XskSocket, AF_XDP, SOCK_RAW,
};

/// Holds every submitted frame until the test releases it, so completions
/// land when the test decides the device is done.
#[derive(Default)]
pub struct HoldDriver {
    held: Mutex<Vec<TxFrame>>,
}

impl HoldDriver {
    pub fn new() -> Arc<HoldDriver> {
        Arc::new(HoldDriver::default())
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    /// Releases every held frame, firing the completion destructors.
    pub fn release_all(&self) {
        self.held.lock().clear();
    }
}

/// The device-facing handle to a shared `HoldDriver`.
pub struct SharedDriver(pub Arc<HoldDriver>);

impl TxDriver for SharedDriver {
    fn xmit(&self, frame: TxFrame, _queue_id: u32) -> TxVerdict {
        self.0.held.lock().push(frame);
        TxVerdict::Sent
    }
}

/// Reports the queue as busy; the frame is consumed regardless.
pub struct BusyDriver;

impl TxDriver for BusyDriver {
    fn xmit(&self, frame: TxFrame, _queue_id: u32) -> TxVerdict {
        drop(frame);
        TxVerdict::Busy
    }
}

pub fn sock(net: &Arc<Net>) -> Arc<XskSocket> {
    net.create_socket(Capabilities::NET_RAW, SOCK_RAW, 0).unwrap()
}

pub fn add_dev(net: &Arc<Net>, ifindex: u32, mtu: u32, queues: u32, driver: Box<dyn TxDriver>) {
    net.add_device(Device::new(ifindex, format!("veth{ifindex}"), mtu, queues, driver));
}

/// Registers a umem of `nframes` frames and creates both control rings.
pub fn setup_umem(
    sock: &XskSocket,
    nframes: u32,
    frame_size: u32,
    headroom: u32,
    fill_entries: u32,
    comp_entries: u32,
) {
    let len = nframes as u64 * frame_size as u64;
    let area = UmemArea::alloc(len as usize, Some(false)).unwrap();
    let reg = UmemReg {
        addr: area.addr(),
        len,
        frame_size,
        headroom,
    };
    sock.setsockopt(SocketOption::UmemReg(area, reg)).unwrap();
    sock.setsockopt(SocketOption::UmemFillRing(fill_entries))
        .unwrap();
    sock.setsockopt(SocketOption::UmemCompletionRing(comp_entries))
        .unwrap();
}

/// Donates the given frame indices on the fill ring, acting as the user
/// producer.
pub fn donate(sock: &XskSocket, ids: Range<u32>) {
    let umem = sock.umem().unwrap();
    let fq = umem.fq().unwrap();
    for id in ids {
        fq.produce(id).unwrap();
    }
    fq.produce_flush();
}

pub fn bind_addr(ifindex: u32, queue_id: u32) -> SockaddrXdp {
    SockaddrXdp {
        family: AF_XDP,
        ifindex,
        queue_id,
        ..Default::default()
    }
}
