use crate::config::{ShipperConfig, TransportKind};
use crate::source::SourcedFrame;
use common::wait::sleep_observing;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use transport::{
    FrameView, InitHeader, ShmProducer, SubmitOutcome, TcpFrameSender, TransportError,
};

const ATTACH_POLL: Duration = Duration::from_millis(200);

/// Producer-side frame path over either transport.
///
/// Both variants present the same non-blocking `submit`; which one is
/// built is a config decision made at startup, exactly like the two
/// parallel encoder paths in the original driver.
pub enum FrameShipper {
    SharedMemory(ShmProducer),
    Tcp(TcpFrameSender),
}

impl FrameShipper {
    /// Build the configured transport.
    ///
    /// Shared memory attaches to the host-owned region, waiting while the
    /// host is still coming up but refusing immediately on a config
    /// mismatch (wrong magic or version is never going to fix itself).
    /// TCP defers connecting to the first submit. Returns `Ok(None)` when
    /// `exiting` was raised during the wait.
    pub fn connect(
        config: &ShipperConfig,
        exiting: &AtomicBool,
    ) -> Result<Option<Self>, TransportError> {
        match config.transport {
            TransportKind::SharedMemory => {
                let mut producer = loop {
                    if exiting.load(std::sync::atomic::Ordering::Relaxed) {
                        return Ok(None);
                    }
                    match ShmProducer::connect(&config.shm_path) {
                        Ok(producer) => break producer,
                        Err(e) if e.is_config_error() => {
                            tracing::error!(error = %e, "frame region is unusable, refusing to run");
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::debug!("Waiting for frame region ({e})");
                            sleep_observing(ATTACH_POLL, exiting);
                        }
                    }
                };
                producer.configure(config.width, config.height, config.format_tag)?;
                Ok(Some(FrameShipper::SharedMemory(producer)))
            }
            TransportKind::Tcp => {
                let init = InitHeader {
                    num_images: transport::layout::NUM_BUFFERS as u32,
                    device_uuid: [0u8; 16],
                    width: config.width,
                    height: config.height,
                    format_tag: config.format_tag,
                    mem_index: 0,
                    source_pid: std::process::id(),
                };
                Ok(Some(FrameShipper::Tcp(TcpFrameSender::new(
                    config.tcp_port,
                    init,
                ))))
            }
        }
    }

    /// Ship one staged frame. Non-blocking on both paths; drops are the
    /// backpressure signal, `PeerGone` means the host told us to stop.
    pub fn submit(
        &mut self,
        frame_number: u64,
        is_idr: bool,
        frame: &SourcedFrame<'_>,
    ) -> Result<SubmitOutcome, TransportError> {
        let view = FrameView {
            frame_number,
            image_index: (frame_number % transport::layout::NUM_BUFFERS as u64) as u32,
            width: frame.width,
            height: frame.height,
            stride: frame.stride,
            is_idr,
            target_timestamp_ns: frame.target_timestamp_ns,
            // The host's timing policy reads the target timestamp out of
            // this opaque field on the TCP path.
            semaphore_value: frame.target_timestamp_ns,
            pose: frame.pose,
            pixels: frame.pixels,
        };

        match self {
            FrameShipper::SharedMemory(producer) => producer.submit(&view),
            FrameShipper::Tcp(sender) => sender.submit(&view),
        }
    }

    /// True once the host signalled shutdown (shared-memory path only).
    pub fn peer_shutdown(&self) -> bool {
        match self {
            FrameShipper::SharedMemory(producer) => producer.is_peer_shutdown(),
            FrameShipper::Tcp(_) => false,
        }
    }
}
