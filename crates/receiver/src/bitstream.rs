//! Converts a session's length-prefixed output into an Annex-B elementary
//! stream, prepending the parameter sets on keyframes so the stream is
//! decodable from any keyframe forward.

use crate::session::EncodedSample;

/// Annex-B NAL unit separator.
pub const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Annex-B bytes for one sample, ready for the network sink.
#[derive(Debug, Clone)]
pub struct PackedNals {
    pub bytes: Vec<u8>,
    pub is_keyframe: bool,
    pub target_timestamp_ns: u64,
}

/// Repack one sample.
///
/// Keyframe detection follows the sample's "not sync" attachment: a
/// missing attachment or an explicit `false` both mean keyframe. The
/// payload is walked as 4-byte big-endian length-prefixed units; a length
/// that overruns the payload truncates the output at the last whole unit.
/// NAL headers are never inspected and units are never reordered.
pub fn pack(sample: &EncodedSample) -> PackedNals {
    let is_keyframe = !sample.not_sync.unwrap_or(false);

    let mut bytes = Vec::with_capacity(sample.payload.len() + 64);

    if is_keyframe {
        for parameter_set in &sample.parameter_sets {
            bytes.extend_from_slice(&NAL_START_CODE);
            bytes.extend_from_slice(parameter_set);
        }
    }

    let payload = &sample.payload;
    let mut offset = 0;
    let mut truncated = false;
    while offset + 4 <= payload.len() {
        let unit_len = u32::from_be_bytes(payload[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;

        if offset + unit_len > payload.len() {
            tracing::warn!(
                unit_len,
                offset,
                payload_len = payload.len(),
                "malformed length-prefixed unit, truncating sample"
            );
            truncated = true;
            break;
        }

        bytes.extend_from_slice(&NAL_START_CODE);
        bytes.extend_from_slice(&payload[offset..offset + unit_len]);
        offset += unit_len;
    }

    if !truncated && offset != payload.len() {
        tracing::warn!(
            trailing = payload.len() - offset,
            "sample payload does not end on a unit boundary"
        );
    }

    PackedNals {
        bytes,
        is_keyframe,
        target_timestamp_ns: sample.ctx.target_timestamp_ns,
    }
}
