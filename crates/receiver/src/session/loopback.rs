//! Software stand-in for the host compression capability.
//!
//! Used by the integration tests and by the standalone receiver binary
//! when no hardware encoder adapter is linked in. It is not a compressor:
//! each frame becomes a single length-prefixed unit whose body carries the
//! pts and a checksum of the pixel bytes, completed asynchronously from a
//! worker thread the way a real session would.

use super::{
    EncodeBackend, EncodeSession, EncodedSample, PixelPlane, SampleCallback, SampleContext,
    SampleTiming, SessionConfig, SessionError,
};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Fixed stand-in parameter sets (VPS, SPS, PPS).
pub const LOOPBACK_VPS: [u8; 2] = [0x40, 0x01];
pub const LOOPBACK_SPS: [u8; 2] = [0x42, 0x01];
pub const LOOPBACK_PPS: [u8; 2] = [0x44, 0x01];

/// HEVC-style NAL header bytes for the stand-in units.
const KEYFRAME_UNIT_HEADER: [u8; 2] = [0x26, 0x01];
const DELTA_UNIT_HEADER: [u8; 2] = [0x02, 0x01];

const DRAIN_WAIT: Duration = Duration::from_secs(5);

pub struct LoopbackBackend;

impl EncodeBackend for LoopbackBackend {
    fn create_session(
        &self,
        config: &SessionConfig,
        on_sample: SampleCallback,
    ) -> Result<Box<dyn EncodeSession>, SessionError> {
        Ok(Box::new(LoopbackSession::spawn(*config, on_sample)?))
    }
}

enum Job {
    Frame {
        checksum: u64,
        timing: SampleTiming,
        force_keyframe: bool,
        ctx: SampleContext,
    },
    Drain(mpsc::SyncSender<()>),
}

pub struct LoopbackSession {
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackSession {
    fn spawn(config: SessionConfig, on_sample: SampleCallback) -> Result<Self, SessionError> {
        if config.width == 0 || config.height == 0 {
            return Err(SessionError::Create(format!(
                "invalid session dimensions {}x{}",
                config.width, config.height
            )));
        }

        let (jobs, queue) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("loopback-encode".into())
            .spawn(move || worker_loop(config, queue, on_sample))
            .map_err(|e| SessionError::Create(e.to_string()))?;

        Ok(Self {
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    fn sender(&self) -> Result<&mpsc::Sender<Job>, SessionError> {
        self.jobs
            .as_ref()
            .ok_or_else(|| SessionError::Submit("session already torn down".into()))
    }
}

impl EncodeSession for LoopbackSession {
    fn submit(
        &mut self,
        pixels: PixelPlane<'_>,
        timing: SampleTiming,
        force_keyframe: bool,
        ctx: SampleContext,
    ) -> Result<(), SessionError> {
        let expected = pixels.stride as usize * pixels.height as usize;
        if pixels.data.len() < expected {
            return Err(SessionError::Submit(format!(
                "pixel plane holds {} bytes, dimensions imply {expected}",
                pixels.data.len()
            )));
        }

        let checksum = pixels.data[..expected]
            .iter()
            .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64));

        self.sender()?
            .send(Job::Frame {
                checksum,
                timing,
                force_keyframe,
                ctx,
            })
            .map_err(|_| SessionError::Submit("encode worker is gone".into()))
    }

    fn drain(&mut self) -> Result<(), SessionError> {
        let (ack, done) = mpsc::sync_channel(0);
        self.sender()
            .map_err(|e| SessionError::Drain(e.to_string()))?
            .send(Job::Drain(ack))
            .map_err(|_| SessionError::Drain("encode worker is gone".into()))?;
        done.recv_timeout(DRAIN_WAIT)
            .map_err(|_| SessionError::Drain("encode worker did not flush in time".into()))
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(config: SessionConfig, queue: mpsc::Receiver<Job>, on_sample: SampleCallback) {
    let mut frame_count: u64 = 0;
    while let Ok(job) = queue.recv() {
        match job {
            Job::Frame {
                checksum,
                timing,
                force_keyframe,
                ctx,
            } => {
                let interval = config.max_keyframe_interval.max(1) as u64;
                let is_keyframe = force_keyframe || frame_count.is_multiple_of(interval);
                frame_count += 1;

                let mut unit = Vec::with_capacity(18);
                unit.extend_from_slice(if is_keyframe {
                    &KEYFRAME_UNIT_HEADER
                } else {
                    &DELTA_UNIT_HEADER
                });
                unit.extend_from_slice(&timing.pts.value.to_be_bytes());
                unit.extend_from_slice(&checksum.to_be_bytes());

                let mut payload = Vec::with_capacity(4 + unit.len());
                payload.extend_from_slice(&(unit.len() as u32).to_be_bytes());
                payload.extend_from_slice(&unit);

                on_sample(EncodedSample {
                    payload,
                    parameter_sets: vec![
                        LOOPBACK_VPS.to_vec(),
                        LOOPBACK_SPS.to_vec(),
                        LOOPBACK_PPS.to_vec(),
                    ],
                    not_sync: Some(!is_keyframe),
                    pts: timing.pts,
                    ctx,
                });
            }
            Job::Drain(ack) => {
                // Every queued frame before this marker has completed.
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MediaTime;
    use std::sync::{Arc, Mutex};

    fn config() -> SessionConfig {
        SessionConfig {
            width: 8,
            height: 4,
            codec: crate::session::Codec::Hevc,
            realtime: true,
            allow_reordering: false,
            bitrate_bps: 10_000_000,
            max_keyframe_interval: 180,
        }
    }

    fn collect_samples() -> (SampleCallback, Arc<Mutex<Vec<EncodedSample>>>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        let callback: SampleCallback = Arc::new(move |sample| {
            sink.lock().unwrap().push(sample);
        });
        (callback, samples)
    }

    #[test]
    fn test_first_frame_is_keyframe_then_deltas() {
        let (callback, samples) = collect_samples();
        let backend = LoopbackBackend;
        let mut session = backend.create_session(&config(), callback).unwrap();

        let pixels = vec![7u8; 8 * 4 * 4];
        for n in 0..3i64 {
            session
                .submit(
                    PixelPlane {
                        data: &pixels,
                        width: 8,
                        height: 4,
                        stride: 32,
                    },
                    SampleTiming {
                        pts: MediaTime::new(n, 90),
                        duration: MediaTime::new(1, 90),
                    },
                    false,
                    SampleContext::default(),
                )
                .unwrap();
        }
        session.drain().unwrap();

        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].not_sync, Some(false), "first frame is sync");
        assert_eq!(samples[1].not_sync, Some(true));
        assert_eq!(samples[2].not_sync, Some(true));
        assert_eq!(samples[0].parameter_sets.len(), 3);
        assert_eq!(samples[1].pts, MediaTime::new(1, 90));
    }

    #[test]
    fn test_forced_keyframe_honored() {
        let (callback, samples) = collect_samples();
        let backend = LoopbackBackend;
        let mut session = backend.create_session(&config(), callback).unwrap();

        let pixels = vec![1u8; 8 * 4 * 4];
        for (n, force) in [(0, false), (1, true)] {
            session
                .submit(
                    PixelPlane {
                        data: &pixels,
                        width: 8,
                        height: 4,
                        stride: 32,
                    },
                    SampleTiming {
                        pts: MediaTime::new(n, 90),
                        duration: MediaTime::new(1, 90),
                    },
                    force,
                    SampleContext::default(),
                )
                .unwrap();
        }
        session.drain().unwrap();

        let samples = samples.lock().unwrap();
        assert_eq!(samples[1].not_sync, Some(false), "forced frame must sync");
    }

    #[test]
    fn test_payload_is_length_prefixed() {
        let (callback, samples) = collect_samples();
        let backend = LoopbackBackend;
        let mut session = backend.create_session(&config(), callback).unwrap();

        let pixels = vec![3u8; 8 * 4 * 4];
        session
            .submit(
                PixelPlane {
                    data: &pixels,
                    width: 8,
                    height: 4,
                    stride: 32,
                },
                SampleTiming {
                    pts: MediaTime::new(0, 90),
                    duration: MediaTime::new(1, 90),
                },
                false,
                SampleContext::default(),
            )
            .unwrap();
        session.drain().unwrap();

        let samples = samples.lock().unwrap();
        let payload = &samples[0].payload;
        let len = u32::from_be_bytes(payload[..4].try_into().unwrap()) as usize;
        assert_eq!(payload.len(), 4 + len, "exactly one length-prefixed unit");
    }

    #[test]
    fn test_create_rejects_zero_dimensions() {
        let (callback, _) = collect_samples();
        let mut bad = config();
        bad.width = 0;
        assert!(LoopbackBackend.create_session(&bad, callback).is_err());
    }
}
