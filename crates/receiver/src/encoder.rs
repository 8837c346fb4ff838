//! Drives one compression session at a time.
//!
//! Completions arrive on whatever thread the host encoder uses; the
//! callback only repacks the bitstream and hands the result to a
//! dedicated sink thread over a channel, so no substantial work runs on
//! encoder threads and no process-global state is shared between
//! sessions.

use crate::bitstream::{self, PackedNals};
use crate::idr::IdrScheduler;
use crate::session::{
    Codec, EncodeBackend, MediaTime, PixelPlane, SampleCallback, SampleContext, SampleTiming,
    SessionConfig, SessionError,
};
use crate::sink::NalSink;
use std::io;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// pts/duration time base: one tick per frame at 90 Hz.
const TIMEBASE: i32 = 90;

/// Session errors inside this window count toward escalation.
const ERROR_WINDOW: Duration = Duration::from_secs(1);
/// This many errors within [`ERROR_WINDOW`] tear the session down and
/// recreate it.
const ERROR_ESCALATION_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Uninitialised,
    Preparing,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderSettings {
    pub bitrate_bps: u32,
    pub max_keyframe_interval: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate_bps: 10_000_000,
            max_keyframe_interval: 180,
        }
    }
}

/// One reassembled frame ready for compression, pixels borrowed from the
/// transport that produced it.
#[derive(Debug, Clone, Copy)]
pub struct EncodeInput<'a> {
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub is_idr: bool,
    pub target_timestamp_ns: u64,
    pub pixels: &'a [u8],
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("submit is only legal while Running (state is {0:?})")]
    NotRunning(DriverState),

    #[error("pixel buffer holds {got} bytes, frame geometry implies {need}")]
    ShortPixelBuffer { got: usize, need: usize },

    #[error("cannot start a session while {0:?}")]
    BadTransition(DriverState),

    #[error("failed to spawn sink thread: {0}")]
    SinkThread(#[from] io::Error),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct EncoderDriver {
    backend: Arc<dyn EncodeBackend>,
    sink: Arc<Mutex<dyn NalSink>>,
    scheduler: Arc<IdrScheduler>,
    settings: EncoderSettings,

    state: DriverState,
    session: Option<Box<dyn crate::session::EncodeSession>>,
    session_config: Option<SessionConfig>,
    sink_tx: Option<mpsc::Sender<PackedNals>>,
    sink_thread: Option<JoinHandle<()>>,

    staging: Vec<u8>,
    frames_submitted: u64,
    error_window_start: Option<Instant>,
    errors_in_window: u32,
}

impl EncoderDriver {
    pub fn new(
        backend: Arc<dyn EncodeBackend>,
        sink: Arc<Mutex<dyn NalSink>>,
        scheduler: Arc<IdrScheduler>,
        settings: EncoderSettings,
    ) -> Self {
        Self {
            backend,
            sink,
            scheduler,
            settings,
            state: DriverState::Uninitialised,
            session: None,
            session_config: None,
            sink_tx: None,
            sink_thread: None,
            staging: Vec::new(),
            frames_submitted: 0,
            error_window_start: None,
            errors_in_window: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Create a realtime session for `width x height` and start the sink
    /// thread. Also arms the stream-start IDR so a fresh session opens on
    /// a keyframe.
    pub fn start(&mut self, width: u32, height: u32) -> Result<(), EncoderError> {
        match self.state {
            DriverState::Uninitialised | DriverState::Stopped => {}
            other => return Err(EncoderError::BadTransition(other)),
        }
        self.state = DriverState::Preparing;

        let (tx, rx) = mpsc::channel::<PackedNals>();
        let sink = Arc::clone(&self.sink);
        let sink_thread = std::thread::Builder::new()
            .name("nal-sink".into())
            .spawn(move || {
                while let Ok(packed) = rx.recv() {
                    let mut sink = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    sink.emit_nal_stream(
                        Codec::Hevc,
                        &packed.bytes,
                        packed.target_timestamp_ns,
                        packed.is_keyframe,
                    );
                }
            })
            .inspect_err(|_| self.state = DriverState::Uninitialised)?;

        let config = SessionConfig {
            width,
            height,
            codec: Codec::Hevc,
            realtime: true,
            allow_reordering: false,
            bitrate_bps: self.settings.bitrate_bps,
            max_keyframe_interval: self.settings.max_keyframe_interval,
        };

        match self.backend.create_session(&config, make_callback(tx.clone())) {
            Ok(session) => {
                self.session = Some(session);
                self.session_config = Some(config);
                self.sink_tx = Some(tx);
                self.sink_thread = Some(sink_thread);
                self.frames_submitted = 0;
                self.state = DriverState::Running;
                self.scheduler.on_stream_start();
                tracing::info!(
                    width,
                    height,
                    bitrate_bps = config.bitrate_bps,
                    max_keyframe_interval = config.max_keyframe_interval,
                    "compression session running"
                );
                Ok(())
            }
            Err(e) => {
                drop(tx);
                let _ = sink_thread.join();
                self.state = DriverState::Uninitialised;
                Err(e.into())
            }
        }
    }

    /// Queue one frame for compression.
    ///
    /// Copies the pixels into the recycled host buffer (normalising any
    /// row padding), stamps `pts = frame_number` in the 1/90s time base,
    /// and forces a keyframe when either the scheduler is armed or the
    /// producer flagged the frame.
    pub fn submit(&mut self, input: &EncodeInput) -> Result<(), EncoderError> {
        if self.state != DriverState::Running {
            return Err(EncoderError::NotRunning(self.state));
        }

        let packed_row = input.width as usize * 4;
        let packed_len = packed_row * input.height as usize;
        let src_stride = input.stride as usize;

        let need = src_stride * input.height as usize;
        if src_stride < packed_row || input.pixels.len() < need {
            return Err(EncoderError::ShortPixelBuffer {
                got: input.pixels.len(),
                need,
            });
        }

        if self.staging.len() < packed_len {
            self.staging.resize(packed_len, 0);
        }
        if src_stride == packed_row {
            self.staging[..packed_len].copy_from_slice(&input.pixels[..packed_len]);
        } else {
            for row in 0..input.height as usize {
                let src = &input.pixels[row * src_stride..row * src_stride + packed_row];
                self.staging[row * packed_row..(row + 1) * packed_row].copy_from_slice(src);
            }
        }

        let timing = SampleTiming {
            pts: MediaTime::new(input.frame_number as i64, TIMEBASE),
            duration: MediaTime::new(1, TIMEBASE),
        };
        let force_keyframe = self.scheduler.check_and_clear() || input.is_idr;
        let ctx = SampleContext {
            target_timestamp_ns: input.target_timestamp_ns,
            is_idr: force_keyframe,
        };
        let plane = PixelPlane {
            data: &self.staging[..packed_len],
            width: input.width,
            height: input.height,
            stride: packed_row as u32,
        };

        let Some(session) = self.session.as_mut() else {
            return Err(EncoderError::NotRunning(self.state));
        };

        match session.submit(plane, timing, force_keyframe, ctx) {
            Ok(()) => {
                self.frames_submitted += 1;
                self.errors_in_window = 0;
                self.error_window_start = None;
                Ok(())
            }
            Err(e) => {
                if force_keyframe {
                    // The forced IDR was consumed but never encoded.
                    self.scheduler.insert_idr();
                }
                tracing::error!(
                    frame_number = input.frame_number,
                    error = %e,
                    "frame rejected by compression session, dropping"
                );
                self.note_session_error();
                Err(e.into())
            }
        }
    }

    /// Flush in-flight compressions and tear the session down. Idempotent.
    pub fn stop(&mut self) -> Result<(), EncoderError> {
        if let Some(mut session) = self.session.take() {
            self.state = DriverState::Draining;
            if let Err(e) = session.drain() {
                tracing::warn!(error = %e, "drain failed, discarding in-flight frames");
            }
        }
        self.session_config = None;
        self.sink_tx = None;
        if let Some(handle) = self.sink_thread.take() {
            let _ = handle.join();
        }
        if self.state != DriverState::Uninitialised {
            self.state = DriverState::Stopped;
        }
        Ok(())
    }

    fn note_session_error(&mut self) {
        let now = Instant::now();
        match self.error_window_start {
            Some(start) if now.duration_since(start) <= ERROR_WINDOW => {
                self.errors_in_window += 1;
            }
            _ => {
                self.error_window_start = Some(now);
                self.errors_in_window = 1;
            }
        }

        if self.errors_in_window >= ERROR_ESCALATION_THRESHOLD {
            self.errors_in_window = 0;
            self.error_window_start = None;
            self.recreate_session();
        }
    }

    /// Full teardown/recreate of the session after repeated errors.
    fn recreate_session(&mut self) {
        let Some(config) = self.session_config else {
            return;
        };
        let Some(tx) = self.sink_tx.clone() else {
            return;
        };

        tracing::warn!(
            width = config.width,
            height = config.height,
            "repeated session errors, recreating compression session"
        );
        self.session = None;

        match self.backend.create_session(&config, make_callback(tx)) {
            Ok(session) => {
                self.session = Some(session);
                self.scheduler.on_stream_start();
            }
            Err(e) => {
                tracing::error!(error = %e, "session recreation failed, encoder stopped");
                self.state = DriverState::Stopped;
            }
        }
    }
}

impl Drop for EncoderDriver {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn make_callback(tx: mpsc::Sender<PackedNals>) -> SampleCallback {
    Arc::new(move |sample| {
        // Encoder-thread work stops at the bitstream transform; delivery
        // belongs to the sink thread.
        let packed = bitstream::pack(&sample);
        if tx.send(packed).is_err() {
            tracing::debug!("sink thread is gone, discarding sample");
        }
    })
}
