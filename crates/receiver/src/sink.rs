use crate::session::Codec;

/// Downstream network packetiser. A single sink thread owns the
/// implementation; calls arrive in hand-off order.
pub trait NalSink: Send {
    fn emit_nal_stream(
        &mut self,
        codec: Codec,
        annex_b: &[u8],
        target_timestamp_ns: u64,
        is_keyframe: bool,
    );
}

/// Sink that only accounts and logs, for running the receiver without a
/// network stack attached.
#[derive(Debug, Default)]
pub struct LogSink {
    frames: u64,
    bytes: u64,
    keyframes: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NalSink for LogSink {
    fn emit_nal_stream(
        &mut self,
        codec: Codec,
        annex_b: &[u8],
        target_timestamp_ns: u64,
        is_keyframe: bool,
    ) {
        self.frames += 1;
        self.bytes += annex_b.len() as u64;
        if is_keyframe {
            self.keyframes += 1;
        }
        if is_keyframe || self.frames.is_multiple_of(90) {
            tracing::info!(
                ?codec,
                frames = self.frames,
                keyframes = self.keyframes,
                total_bytes = self.bytes,
                target_timestamp_ns,
                "bitstream flowing"
            );
        }
    }
}
