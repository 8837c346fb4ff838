use crate::errors::TransportError;
use crate::frame::{FrameInfo, RingCounters, StreamConfig};
use crate::layout::{SlotState, NUM_BUFFERS};
use crate::region::ShmRegion;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const CONFIG_POLL: Duration = Duration::from_millis(10);
/// Sleep used once spinning has not turned up a READY slot.
const BACKOFF_SLEEP: Duration = Duration::from_micros(500);
/// Spin laps before yielding to the scheduler.
const SPIN_LAPS: u32 = 64;

/// Consumer half of the shared-memory ring. Owns the region lifecycle:
/// creates the file, signals shutdown, unlinks it.
pub struct ShmConsumer {
    region: ShmRegion,
    /// Highest frame number handed out so far; READY slots below it are
    /// stale leftovers and get recycled.
    last_frame_number: Option<u64>,
}

/// A slot owned for encoding. `pixels` stays valid until [`ShmConsumer::complete`]
/// returns the slot to the ring.
pub struct AcquiredFrame<'a> {
    pub slot: usize,
    pub info: FrameInfo,
    pub pixels: &'a [u8],
}

impl ShmConsumer {
    /// Create and initialise the region file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let region = ShmRegion::create_and_init(path)?;
        Ok(Self {
            region,
            last_frame_number: None,
        })
    }

    /// Block until a producer publishes the stream configuration.
    ///
    /// Returns `Ok(None)` when `exiting` is raised first and `Timeout` when
    /// the deadline passes with no producer.
    pub fn wait_for_producer(
        &self,
        timeout: Duration,
        exiting: &AtomicBool,
    ) -> Result<Option<StreamConfig>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if exiting.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let header = self.region.header();
            if header.cfg_set.load(Ordering::Acquire) == 1 {
                return Ok(Some(StreamConfig {
                    width: header.cfg_width,
                    height: header.cfg_height,
                    format_tag: header.cfg_format,
                }));
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout("producer configuration"));
            }
            std::thread::sleep(CONFIG_POLL);
        }
    }

    /// Claim the next READY slot, spinning with backoff up to `timeout`.
    ///
    /// Scanning starts at the ring cursor and ties are broken by lowest
    /// frame number so the stream stays in submission order. Stale entries
    /// (older than the last consumed frame) are recycled straight to EMPTY
    /// and counted as dropped.
    pub fn next_ready_slot(&mut self, timeout: Duration) -> Option<AcquiredFrame<'_>> {
        let (slot, info) = self.claim_ready(timeout)?;
        let len = info.stride as usize * info.height as usize;
        let pixels = &self.region.pixels(slot)[..len];
        Some(AcquiredFrame { slot, info, pixels })
    }

    /// Return a slot to the ring after the encoder accepted its frame.
    pub fn complete(&mut self, slot: usize) {
        let header = self.region.header();
        header.slots[slot]
            .state
            .store(SlotState::Empty as u32, Ordering::Release);
        header.read_sequence.fetch_add(1, Ordering::Relaxed);
        header.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Ask the producer to stop submitting. Part of the shutdown sequence;
    /// the file itself is removed by [`ShmConsumer::unlink`].
    pub fn shutdown(&self) {
        self.region
            .header()
            .shutdown
            .store(1, Ordering::Release);
    }

    pub fn unlink(&self) -> Result<(), TransportError> {
        self.region.unlink()
    }

    pub fn counters(&self) -> RingCounters {
        let header = self.region.header();
        RingCounters {
            written: header.frames_written.load(Ordering::Relaxed),
            encoded: header.frames_encoded.load(Ordering::Relaxed),
            dropped: header.frames_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn region(&self) -> &ShmRegion {
        &self.region
    }

    fn claim_ready(&mut self, timeout: Duration) -> Option<(usize, FrameInfo)> {
        let deadline = Instant::now() + timeout;
        let mut spins = 0u32;

        loop {
            let header = self.region.header();
            let start = header.read_sequence.load(Ordering::Relaxed);

            // Collect READY candidates over one lap, preferring the oldest
            // frame so out-of-order publishes drain in order.
            let mut best: Option<(usize, u64)> = None;
            for attempt in 0..NUM_BUFFERS as u64 {
                let index = ((start + attempt) % NUM_BUFFERS as u64) as usize;
                let slot = &header.slots[index];
                if slot.state.load(Ordering::Acquire) == SlotState::Ready as u32 {
                    let frame_number = slot.frame_number;
                    match best {
                        Some((_, lowest)) if frame_number >= lowest => {}
                        _ => best = Some((index, frame_number)),
                    }
                }
            }

            if let Some((index, _)) = best {
                let slot = &header.slots[index];
                if slot
                    .state
                    .compare_exchange(
                        SlotState::Ready as u32,
                        SlotState::Encoding as u32,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    let frame_number = slot.frame_number;
                    if self
                        .last_frame_number
                        .is_some_and(|last| frame_number < last)
                    {
                        // Stale leftover from a producer hiccup: recycle it.
                        slot.state
                            .store(SlotState::Empty as u32, Ordering::Release);
                        header.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            frame_number,
                            newest = self.last_frame_number,
                            "recycled stale ring slot"
                        );
                        continue;
                    }

                    let info = FrameInfo {
                        frame_number,
                        width: slot.width,
                        height: slot.height,
                        stride: slot.stride,
                        is_idr: slot.is_idr != 0,
                        target_timestamp_ns: slot.timestamp_ns,
                        pose: slot.pose,
                    };
                    self.last_frame_number = Some(frame_number);
                    return Some((index, info));
                }
                // Lost the race; rescan immediately.
                continue;
            }

            if Instant::now() >= deadline {
                return None;
            }

            spins += 1;
            if spins < SPIN_LAPS {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(BACKOFF_SLEEP);
            }
        }
    }
}
