//! Seam to the host's hardware compression capability.
//!
//! The receiver never talks to a video API directly; it drives whatever
//! [`EncodeBackend`] is plugged in. A production build links an adapter
//! over the platform encoder, the tests and the standalone binary use the
//! [`loopback`] stand-in.

use std::sync::Arc;
use thiserror::Error;

pub mod loopback;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Hevc,
}

/// Parameters of one compression session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub codec: Codec,
    pub realtime: bool,
    pub allow_reordering: bool,
    pub bitrate_bps: u32,
    /// Periodic keyframe cadence enforced by the encoder itself.
    pub max_keyframe_interval: u32,
}

/// Rational media timestamp, CMTime style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    pub fn as_nanos(&self) -> u64 {
        if self.timescale <= 0 {
            return 0;
        }
        (self.value as i128 * 1_000_000_000 / self.timescale as i128) as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SampleTiming {
    pub pts: MediaTime,
    pub duration: MediaTime,
}

/// Per-submit context threaded through to the completion, so concurrent
/// sessions never share process-wide state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleContext {
    pub target_timestamp_ns: u64,
    pub is_idr: bool,
}

/// One compressed sample delivered by the session, possibly on an
/// arbitrary encoder thread and possibly out of submit order.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    /// Concatenation of length-prefixed NAL units (4-byte big-endian
    /// length before each unit).
    pub payload: Vec<u8>,
    /// VPS, SPS, PPS in that order, from the sample's format description.
    pub parameter_sets: Vec<Vec<u8>>,
    /// The "not sync" attachment: absent or false means keyframe.
    pub not_sync: Option<bool>,
    pub pts: MediaTime,
    pub ctx: SampleContext,
}

/// Packed BGRA pixels for one submit.
#[derive(Debug, Clone, Copy)]
pub struct PixelPlane<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to create compression session: {0}")]
    Create(String),

    #[error("compression session rejected frame: {0}")]
    Submit(String),

    #[error("failed to drain compression session: {0}")]
    Drain(String),
}

/// Invoked by the session for every completed sample. Must be cheap and
/// callable from any thread the host encoder uses.
pub type SampleCallback = Arc<dyn Fn(EncodedSample) + Send + Sync>;

pub trait EncodeSession: Send {
    /// Queue one frame. May block briefly when the session's internal
    /// queue is full; completion is always asynchronous.
    fn submit(
        &mut self,
        pixels: PixelPlane<'_>,
        timing: SampleTiming,
        force_keyframe: bool,
        ctx: SampleContext,
    ) -> Result<(), SessionError>;

    /// Flush all in-flight compressions, invoking the callback for each.
    fn drain(&mut self) -> Result<(), SessionError>;
}

pub trait EncodeBackend: Send + Sync {
    fn create_session(
        &self,
        config: &SessionConfig,
        on_sample: SampleCallback,
    ) -> Result<Box<dyn EncodeSession>, SessionError>;
}
