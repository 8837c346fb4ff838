use crate::errors::TransportError;
use crate::layout::{self, BYTES_PER_PIXEL};

/// 3x4 transform matrix supplied by the renderer, carried through to the
/// pose-history lookup on the host side unchanged.
pub type Pose = [[f32; 4]; 3];

pub const IDENTITY_POSE: Pose = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// One rendered frame staged in CPU memory, borrowed from the caller for
/// the duration of a submit.
///
/// `stride` is the byte length of one source row and may exceed
/// `width * 4`; transports normalise rows to packed BGRA while staging.
/// `semaphore_value` is an opaque pass-through for the TCP wire header.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub frame_number: u64,
    pub image_index: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub is_idr: bool,
    pub target_timestamp_ns: u64,
    pub semaphore_value: u64,
    pub pose: Pose,
    pub pixels: &'a [u8],
}

impl FrameView<'_> {
    /// Byte length of one packed destination row.
    pub fn packed_row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL as usize
    }

    /// Byte length of the frame after stride normalisation.
    pub fn packed_len(&self) -> usize {
        self.packed_row_bytes() * self.height as usize
    }

    pub fn validate(&self) -> Result<(), TransportError> {
        if self.width == 0
            || self.height == 0
            || self.width > layout::MAX_WIDTH
            || self.height > layout::MAX_HEIGHT
        {
            return Err(TransportError::Protocol(format!(
                "frame dimensions {}x{} out of range",
                self.width, self.height
            )));
        }
        if (self.stride as usize) < self.packed_row_bytes() {
            return Err(TransportError::Protocol(format!(
                "stride {} smaller than packed row ({} bytes)",
                self.stride,
                self.packed_row_bytes()
            )));
        }
        let expected = self.stride as usize * self.height as usize;
        if self.pixels.len() < expected {
            return Err(TransportError::Protocol(format!(
                "pixel buffer holds {} bytes, header implies {}",
                self.pixels.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Copy of a ring slot's metadata, taken while the slot is owned for
/// encoding.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub is_idr: bool,
    pub target_timestamp_ns: u64,
    pub pose: Pose,
}

/// Stream parameters published once by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub format_tag: u32,
}

/// Snapshot of the ring statistics counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingCounters {
    pub written: u64,
    pub encoded: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame<'a>(width: u32, height: u32, stride: u32, pixels: &'a [u8]) -> FrameView<'a> {
        FrameView {
            frame_number: 0,
            image_index: 0,
            width,
            height,
            stride,
            is_idr: false,
            target_timestamp_ns: 0,
            semaphore_value: 0,
            pose: IDENTITY_POSE,
            pixels,
        }
    }

    #[test]
    fn test_validate_accepts_padded_stride() {
        let pixels = vec![0u8; 48];
        let view = frame(4, 2, 24, &pixels);
        assert!(view.validate().is_ok());
        assert_eq!(view.packed_row_bytes(), 16);
        assert_eq!(view.packed_len(), 32);
    }

    #[test]
    fn test_validate_rejects_undersized_stride() {
        let pixels = vec![0u8; 16];
        let view = frame(4, 2, 8, &pixels);
        assert!(view.validate().is_err(), "stride below width*4 is invalid");
    }

    #[test]
    fn test_validate_rejects_short_pixel_buffer() {
        let pixels = vec![0u8; 16];
        let view = frame(4, 2, 16, &pixels);
        assert!(view.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_dimensions() {
        let pixels = vec![0u8; 4];
        let view = frame(layout::MAX_WIDTH + 1, 1, (layout::MAX_WIDTH + 1) * 4, &pixels);
        assert!(view.validate().is_err());
    }
}
