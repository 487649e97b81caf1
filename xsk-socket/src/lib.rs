pub mod dev;
pub mod error;
pub mod mmap;
pub mod net;
pub mod poll;
pub mod ring;
pub mod rx;
pub mod socket;
pub mod tx;
pub mod umem;

pub use dev::{Device, DiscardDriver, RxBuff, TxDriver, TxVerdict};
pub use error::XskError;
pub use mmap::{OwnedMmap, UmemArea};
pub use net::{Capabilities, Net, SOCK_RAW};
pub use ring::{
    Ring, RingDesc, RingMapping, RingType, UmemProps, RING_OFF_CONSUMER, RING_OFF_DESC,
    RING_OFF_PRODUCER,
};
pub use socket::{
    SockaddrXdp, SocketConfig, SocketOption, Statistics, XskSocket, AF_XDP, XDP_SHARED_UMEM,
};
pub use tx::{SendFlags, TxFrame, TX_BATCH_SIZE};
pub use umem::{Umem, UmemReg};
