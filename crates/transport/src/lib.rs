pub mod errors;
pub mod frame;
pub mod layout;
pub mod region;
pub mod shm_consumer;
pub mod shm_producer;
pub mod tcp_receiver;
pub mod tcp_sender;
pub mod wire;

pub use errors::TransportError;
pub use frame::{FrameInfo, FrameView, Pose, RingCounters, StreamConfig};
pub use region::ShmRegion;
pub use shm_consumer::{AcquiredFrame, ShmConsumer};
pub use shm_producer::ShmProducer;
pub use tcp_receiver::{ReceivedFrame, TcpFrameListener, TcpFrameStream};
pub use tcp_sender::TcpFrameSender;
pub use wire::{FrameHeader, InitHeader, DEFAULT_TCP_PORT};

/// Outcome of a non-blocking frame submission on either transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The frame was handed to the peer.
    Published,
    /// The frame was discarded without blocking (ring full or peer not
    /// reachable). Counted, never fatal.
    Dropped,
}

impl SubmitOutcome {
    pub fn is_published(self) -> bool {
        matches!(self, SubmitOutcome::Published)
    }
}
