//! Data-path scenarios: receive handoff, backpressure, transmit completion,
//! shared umem and rebind.

mod common;

use common::*;
use std::sync::Arc;
use xsk_socket::{
    DiscardDriver, Net, RingDesc, RxBuff, SendFlags, SockaddrXdp, SocketOption, XskError, AF_XDP,
    XDP_SHARED_UMEM,
};

fn deliver(ifindex: u32, queue_id: u32, data: &[u8]) -> RxBuff<'_> {
    RxBuff {
        ifindex,
        queue_id,
        data,
    }
}

#[test]
fn rxdrop_round_trip() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(DiscardDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::RxRing(8)).unwrap();
    setup_umem(&sock, 8, 2048, 0, 8, 8);
    donate(&sock, 0..8);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let payload = [0x5au8; 64];
    for _ in 0..4 {
        sock.rcv_flush(&deliver(1, 0, &payload)).unwrap();
    }

    // the four frames moved from the fill ring to the rx ring in order
    let umem = sock.umem().unwrap();
    let rx = sock.rx_ring().unwrap();
    for expect in 0..4u32 {
        let desc = rx.peek_desc().unwrap();
        assert_eq!(desc, RingDesc::new(expect, 64, 0));
        let frame = unsafe { std::slice::from_raw_parts(umem.data(desc.idx), 64) };
        assert_eq!(frame, &payload);
        rx.discard();
    }
    assert!(rx.is_empty());

    // re-donate the consumed frames; the fill ring then carries 4..8
    // followed by 0..4, the whole umem again
    donate(&sock, 0..4);
    let fq = umem.fq().unwrap();
    for expect in (4..8).chain(0..4) {
        assert_eq!(fq.peek_id(), Some(expect));
        fq.discard();
    }
    assert_eq!(sock.statistics().rx_dropped, 0);
}

#[test]
fn rx_backpressure_leaves_fill_ring_intact() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(DiscardDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::RxRing(2)).unwrap();
    setup_umem(&sock, 8, 2048, 0, 8, 8);
    donate(&sock, 0..8);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let payload = [1u8; 64];
    sock.rcv_flush(&deliver(1, 0, &payload)).unwrap();
    sock.rcv_flush(&deliver(1, 0, &payload)).unwrap();
    assert_eq!(
        sock.rcv_flush(&deliver(1, 0, &payload)),
        Err(XskError::NoSpace)
    );
    assert_eq!(sock.statistics().rx_dropped, 1);

    // index 2 was not consumed by the failed delivery
    let umem = sock.umem().unwrap();
    let fq = umem.fq().unwrap();
    for expect in 2..8u32 {
        assert_eq!(fq.peek_id(), Some(expect));
        fq.discard();
    }
    assert_eq!(fq.peek_id(), None);
}

#[test]
fn oversize_delivery_is_dropped_without_consuming_fill() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(DiscardDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::RxRing(8)).unwrap();
    setup_umem(&sock, 8, 2048, 256, 8, 8);
    donate(&sock, 0..8);
    sock.bind(&bind_addr(1, 0)).unwrap();

    // frame_size - headroom is the largest receivable payload
    let fits = vec![0u8; 2048 - 256];
    sock.rcv_flush(&deliver(1, 0, &fits)).unwrap();
    let too_big = vec![0u8; 2048 - 256 + 1];
    assert_eq!(
        sock.rcv_flush(&deliver(1, 0, &too_big)),
        Err(XskError::Invalid)
    );
    assert_eq!(sock.statistics().rx_dropped, 1);

    let umem = sock.umem().unwrap();
    let fq = umem.fq().unwrap();
    // only the in-bounds delivery consumed a frame
    assert_eq!(fq.peek_id(), Some(1));
}

#[test]
fn rx_descriptors_carry_headroom_offset() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(DiscardDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::RxRing(4)).unwrap();
    setup_umem(&sock, 4, 2048, 128, 4, 4);
    donate(&sock, 0..4);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let payload = [7u8; 32];
    sock.rcv_flush(&deliver(1, 0, &payload)).unwrap();

    let umem = sock.umem().unwrap();
    let rx = sock.rx_ring().unwrap();
    let desc = rx.peek_desc().unwrap();
    assert_eq!(desc, RingDesc::new(0, 32, 128));
    let written = unsafe { std::slice::from_raw_parts(umem.data_with_headroom(0), 32) };
    assert_eq!(written, &payload);
}

#[test]
fn tx_completion_returns_frames() {
    let net = Net::new();
    let driver = HoldDriver::new();
    add_dev(&net, 1, 1500, 1, Box::new(SharedDriver(driver.clone())));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::TxRing(4)).unwrap();
    setup_umem(&sock, 4, 2048, 0, 4, 4);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let umem = sock.umem().unwrap();
    umem.write_frame(0, 0, &[0xaau8; 64]);
    umem.write_frame(1, 0, &[0xbbu8; 100]);

    let tx = sock.tx_ring().unwrap();
    tx.produce(RingDesc::new(0, 64, 0)).unwrap();
    tx.produce(RingDesc::new(1, 100, 0)).unwrap();
    tx.produce_flush();

    sock.sendmsg(SendFlags { dont_wait: true }).unwrap();
    assert!(tx.is_empty());
    assert_eq!(driver.held_count(), 2);
    assert_eq!(umem.inflight_tx(), 2);

    // completions land when the device releases the buffers
    let cq = umem.cq().unwrap();
    assert_eq!(cq.peek_id(), None);
    driver.release_all();
    assert_eq!(umem.inflight_tx(), 0);
    for expect in 0..2u32 {
        assert_eq!(cq.peek_id(), Some(expect));
        cq.discard();
    }
    assert_eq!(cq.peek_id(), None);
}

#[test]
fn tx_rejects_descriptor_above_mtu() {
    let net = Net::new();
    let driver = HoldDriver::new();
    add_dev(&net, 1, 1500, 1, Box::new(SharedDriver(driver.clone())));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::TxRing(4)).unwrap();
    setup_umem(&sock, 4, 2048, 0, 4, 4);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let tx = sock.tx_ring().unwrap();
    tx.produce(RingDesc::new(0, 2000, 0)).unwrap();
    tx.produce_flush();

    assert_eq!(
        sock.sendmsg(SendFlags { dont_wait: true }),
        Err(XskError::MsgSize)
    );
    // the descriptor stays on the tx ring and nothing was submitted
    assert_eq!(tx.peek_desc(), Some(RingDesc::new(0, 2000, 0)));
    assert_eq!(driver.held_count(), 0);
    let umem = sock.umem().unwrap();
    assert!(umem.cq().unwrap().is_empty());
}

#[test]
fn tx_busy_device_reports_again() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(BusyDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::TxRing(4)).unwrap();
    setup_umem(&sock, 4, 2048, 0, 4, 4);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let tx = sock.tx_ring().unwrap();
    tx.produce(RingDesc::new(0, 64, 0)).unwrap();
    tx.produce_flush();

    assert_eq!(
        sock.sendmsg(SendFlags { dont_wait: true }),
        Err(XskError::Again)
    );
    // the buffer was consumed by the device layer, so its completion still
    // lands even though the descriptor was not discarded
    let umem = sock.umem().unwrap();
    assert_eq!(umem.cq().unwrap().peek_id(), Some(0));
}

#[test]
fn tx_invalid_descriptors_are_skipped_and_counted() {
    let net = Net::new();
    let driver = HoldDriver::new();
    add_dev(&net, 1, 1500, 1, Box::new(SharedDriver(driver.clone())));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::TxRing(4)).unwrap();
    setup_umem(&sock, 4, 2048, 0, 4, 4);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let tx = sock.tx_ring().unwrap();
    // frame index out of range, then offset+len past the frame end
    tx.produce(RingDesc::new(9, 64, 0)).unwrap();
    tx.produce(RingDesc::new(0, 2048, 1)).unwrap();
    tx.produce(RingDesc::new(1, 64, 0)).unwrap();
    tx.produce_flush();

    sock.sendmsg(SendFlags { dont_wait: true }).unwrap();
    assert_eq!(driver.held_count(), 1);
    assert_eq!(sock.statistics().tx_invalid_descs, 2);
}

#[test]
fn tx_batch_is_bounded() {
    let net = Net::new();
    let driver = HoldDriver::new();
    add_dev(&net, 1, 1500, 1, Box::new(SharedDriver(driver.clone())));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::TxRing(32)).unwrap();
    setup_umem(&sock, 32, 2048, 0, 32, 32);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let tx = sock.tx_ring().unwrap();
    for i in 0..20u32 {
        tx.produce(RingDesc::new(i, 64, 0)).unwrap();
    }
    tx.produce_flush();

    // one batch moves sixteen frames, the rest waits for a retry
    assert_eq!(
        sock.sendmsg(SendFlags { dont_wait: true }),
        Err(XskError::Again)
    );
    assert_eq!(driver.held_count(), 16);
    sock.sendmsg(SendFlags { dont_wait: true }).unwrap();
    assert_eq!(driver.held_count(), 20);
}

#[test]
fn shared_umem_isolates_sockets() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 1, Box::new(DiscardDriver));
    let a = sock(&net);
    a.setsockopt(SocketOption::RxRing(8)).unwrap();
    setup_umem(&a, 8, 2048, 0, 8, 8);
    donate(&a, 0..8);
    a.bind(&bind_addr(1, 0)).unwrap();

    let b = sock(&net);
    b.setsockopt(SocketOption::RxRing(8)).unwrap();
    let addr = SockaddrXdp {
        family: AF_XDP,
        flags: XDP_SHARED_UMEM,
        ifindex: 1,
        queue_id: 0,
        shared_umem_handle: a.id(),
    };
    b.bind(&addr).unwrap();
    assert!(Arc::ptr_eq(&a.umem().unwrap(), &b.umem().unwrap()));

    // a delivery through A consumes the shared fill ring and lands on A's
    // rx ring only
    let payload = [3u8; 48];
    a.rcv_flush(&deliver(1, 0, &payload)).unwrap();
    assert_eq!(
        a.rx_ring().unwrap().peek_desc(),
        Some(RingDesc::new(0, 48, 0))
    );
    assert!(b.rx_ring().unwrap().is_empty());
}

#[test]
fn shared_umem_bind_rejections() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 2, Box::new(DiscardDriver));
    let a = sock(&net);
    a.setsockopt(SocketOption::RxRing(8)).unwrap();
    setup_umem(&a, 8, 2048, 0, 8, 8);
    a.bind(&bind_addr(1, 0)).unwrap();

    // no umem behind the handle
    let empty = sock(&net);
    empty.setsockopt(SocketOption::RxRing(8)).unwrap();
    let b = sock(&net);
    b.setsockopt(SocketOption::RxRing(8)).unwrap();
    let mut addr = SockaddrXdp {
        family: AF_XDP,
        flags: XDP_SHARED_UMEM,
        ifindex: 1,
        queue_id: 0,
        shared_umem_handle: empty.id(),
    };
    assert_eq!(b.bind(&addr), Err(XskError::BadHandle));

    // unknown handle
    addr.shared_umem_handle = 0xdead;
    assert_eq!(b.bind(&addr), Err(XskError::Invalid));

    // queue mismatch with the owning socket
    addr.shared_umem_handle = a.id();
    addr.queue_id = 1;
    assert_eq!(b.bind(&addr), Err(XskError::Invalid));

    // matching bind succeeds
    addr.queue_id = 0;
    b.bind(&addr).unwrap();
}

#[test]
fn rebind_detaches_previous_queue() {
    let net = Net::new();
    add_dev(&net, 1, 1500, 2, Box::new(DiscardDriver));
    let sock = sock(&net);
    sock.setsockopt(SocketOption::RxRing(8)).unwrap();
    setup_umem(&sock, 8, 2048, 0, 8, 8);
    donate(&sock, 0..8);
    sock.bind(&bind_addr(1, 0)).unwrap();

    let payload = [9u8; 64];
    sock.rcv_flush(&deliver(1, 0, &payload)).unwrap();

    sock.bind(&bind_addr(1, 1)).unwrap();
    // deliveries tagged with the old queue are now rejected
    assert_eq!(
        sock.rcv_flush(&deliver(1, 0, &payload)),
        Err(XskError::Invalid)
    );
    assert_eq!(sock.statistics().rx_dropped, 1);
    sock.rcv_flush(&deliver(1, 1, &payload)).unwrap();
}
