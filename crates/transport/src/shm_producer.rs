use crate::errors::TransportError;
use crate::frame::{FrameView, RingCounters};
use crate::layout::{SlotState, NUM_BUFFERS};
use crate::region::ShmRegion;
use crate::SubmitOutcome;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// How long `connect` waits for the host to finish region initialisation.
const INIT_WAIT: Duration = Duration::from_secs(5);
const INIT_POLL: Duration = Duration::from_millis(10);

/// Producer half of the shared-memory ring.
///
/// `submit` is wait-free: it probes at most [`NUM_BUFFERS`] slots with a
/// compare-and-swap each, copies one frame, and never blocks on I/O. When
/// every slot is busy the frame is dropped and counted; the consumer can
/// fall behind by at most `NUM_BUFFERS - 1` frames before that happens.
pub struct ShmProducer {
    region: ShmRegion,
}

impl ShmProducer {
    /// Map the host-owned region and wait for it to come up.
    ///
    /// Fails with a config error when the region was not produced by a
    /// compatible host (wrong magic or version) and with `Timeout` when no
    /// host initialises the region within a bounded wait.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        Self::connect_with_timeout(path, INIT_WAIT)
    }

    pub fn connect_with_timeout(
        path: impl AsRef<Path>,
        init_wait: Duration,
    ) -> Result<Self, TransportError> {
        let region = ShmRegion::open_existing(path)?;

        let deadline = Instant::now() + init_wait;
        while region.header().initialized.load(Ordering::Acquire) == 0 {
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout("region initialisation"));
            }
            std::thread::sleep(INIT_POLL);
        }

        region.validate()?;

        tracing::info!(path = %region.path().display(), "connected to shared frame region");
        Ok(Self { region })
    }

    /// Publish the stream parameters. Write-once: a second call with the
    /// same values is a no-op, diverging values are refused.
    pub fn configure(&mut self, width: u32, height: u32, format_tag: u32) -> Result<(), TransportError> {
        {
            let header = self.region.header();
            if header.cfg_set.load(Ordering::Acquire) == 1 {
                if header.cfg_width == width
                    && header.cfg_height == height
                    && header.cfg_format == format_tag
                {
                    return Ok(());
                }
                return Err(TransportError::Protocol(format!(
                    "stream already configured as {}x{} (format {}), cannot change to {}x{}",
                    header.cfg_width, header.cfg_height, header.cfg_format, width, height
                )));
            }
        }

        let header = self.region.header_mut();
        header.cfg_width = width;
        header.cfg_height = height;
        header.cfg_format = format_tag;
        header.cfg_set.store(1, Ordering::Release);

        tracing::info!(width, height, format_tag, "stream configuration published");
        Ok(())
    }

    /// Hand one frame to the host.
    ///
    /// Returns [`SubmitOutcome::Dropped`] without blocking when no slot is
    /// free; the drop is counted in the region and logged at a low rate.
    /// Fails with `PeerGone` once the host has signalled shutdown.
    pub fn submit(&mut self, frame: &FrameView) -> Result<SubmitOutcome, TransportError> {
        frame.validate()?;

        let claimed = {
            let header = self.region.header();
            if header.shutdown.load(Ordering::Acquire) != 0 {
                return Err(TransportError::PeerGone);
            }

            // Probe from the ring cursor; at most one full lap.
            let start = header.write_sequence.load(Ordering::Relaxed);
            let mut claimed = None;
            for attempt in 0..NUM_BUFFERS as u64 {
                let index = ((start + attempt) % NUM_BUFFERS as u64) as usize;
                if header.slots[index]
                    .state
                    .compare_exchange(
                        SlotState::Empty as u32,
                        SlotState::Writing as u32,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    claimed = Some(index);
                    break;
                }
            }

            match claimed {
                Some(index) => index,
                None => {
                    let dropped = header.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped.is_multiple_of(100) {
                        tracing::warn!(
                            frame_number = frame.frame_number,
                            dropped,
                            "ring full, dropping frame (encoder too slow?)"
                        );
                    }
                    return Ok(SubmitOutcome::Dropped);
                }
            }
        };

        self.stage_pixels(claimed, frame);

        let header = self.region.header_mut();
        let slot = &mut header.slots[claimed];
        slot.width = frame.width;
        slot.height = frame.height;
        slot.stride = frame.packed_row_bytes() as u32;
        slot.timestamp_ns = frame.target_timestamp_ns;
        slot.frame_number = frame.frame_number;
        slot.is_idr = frame.is_idr as u8;
        slot.pose = frame.pose;

        slot.state.store(SlotState::Ready as u32, Ordering::Release);
        let header = self.region.header();
        header.write_sequence.fetch_add(1, Ordering::Relaxed);
        header.frames_written.fetch_add(1, Ordering::Relaxed);

        Ok(SubmitOutcome::Published)
    }

    /// True once the host has requested shutdown; subsequent submits fail.
    pub fn is_peer_shutdown(&self) -> bool {
        self.region.header().shutdown.load(Ordering::Acquire) != 0
    }

    pub fn counters(&self) -> RingCounters {
        let header = self.region.header();
        RingCounters {
            written: header.frames_written.load(Ordering::Relaxed),
            encoded: header.frames_encoded.load(Ordering::Relaxed),
            dropped: header.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Normalise source rows into the slot's slab.
    fn stage_pixels(&mut self, index: usize, frame: &FrameView) {
        let packed_row = frame.packed_row_bytes();
        let src_stride = frame.stride as usize;
        let slab = self.region.pixels_mut(index);

        if src_stride == packed_row {
            let len = frame.packed_len();
            slab[..len].copy_from_slice(&frame.pixels[..len]);
        } else {
            for row in 0..frame.height as usize {
                let src = &frame.pixels[row * src_stride..row * src_stride + packed_row];
                slab[row * packed_row..(row + 1) * packed_row].copy_from_slice(src);
            }
        }
    }
}
