//! TCP wire format.
//!
//! Both headers are packed little-endian with no alignment holes; the byte
//! layout is the compatibility contract between producer and host.
//!
//! **Init header** (40 bytes, sent once per connection):
//! ```text
//! num_images:      u32   (4)
//! device_uuid:     [u8]  (16)
//! width:           u32   (4)
//! height:          u32   (4)
//! format_tag:      u32   (4)
//! mem_index:       u32   (4)
//! source_pid:      u32   (4)
//! ```
//!
//! **Frame header** (81 bytes, followed by `data_size` BGRA bytes):
//! ```text
//! image_index:     u32   (4)
//! frame_number:    u32   (4)
//! semaphore_value: u64   (8)
//! pose:            f32   (48, 3x4 row-major)
//! width:           u32   (4)
//! height:          u32   (4)
//! stride:          u32   (4)
//! is_idr:          u8    (1)
//! data_size:       u32   (4)
//! ```

use crate::errors::TransportError;
use crate::frame::Pose;
use crate::layout::{BYTES_PER_PIXEL, MAX_FRAME_SIZE, MAX_HEIGHT, MAX_WIDTH};

/// Loopback port the host listens on.
pub const DEFAULT_TCP_PORT: u16 = 9944;

/// Stream parameters sent once, immediately after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitHeader {
    pub num_images: u32,
    pub device_uuid: [u8; 16],
    pub width: u32,
    pub height: u32,
    /// Producer-side pixel format identifier. Logged by the host, never
    /// interpreted; the payload is always 32-bit BGRA.
    pub format_tag: u32,
    pub mem_index: u32,
    pub source_pid: u32,
}

impl InitHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 40;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.num_images.to_le_bytes());
        buf[4..20].copy_from_slice(&self.device_uuid);
        buf[20..24].copy_from_slice(&self.width.to_le_bytes());
        buf[24..28].copy_from_slice(&self.height.to_le_bytes());
        buf[28..32].copy_from_slice(&self.format_tag.to_le_bytes());
        buf[32..36].copy_from_slice(&self.mem_index.to_le_bytes());
        buf[36..40].copy_from_slice(&self.source_pid.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < Self::SIZE {
            return Err(TransportError::Protocol(format!(
                "init header too short: {} < {}",
                data.len(),
                Self::SIZE
            )));
        }
        let mut device_uuid = [0u8; 16];
        device_uuid.copy_from_slice(&data[4..20]);
        Ok(Self {
            num_images: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            device_uuid,
            width: u32::from_le_bytes(data[20..24].try_into().unwrap()),
            height: u32::from_le_bytes(data[24..28].try_into().unwrap()),
            format_tag: u32::from_le_bytes(data[28..32].try_into().unwrap()),
            mem_index: u32::from_le_bytes(data[32..36].try_into().unwrap()),
            source_pid: u32::from_le_bytes(data[36..40].try_into().unwrap()),
        })
    }
}

/// Per-frame metadata preceding each pixel payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub image_index: u32,
    pub frame_number: u32,
    /// Opaque to the wire layer; the host decides what timing policy to
    /// apply per session.
    pub semaphore_value: u64,
    pub pose: Pose,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub is_idr: bool,
    pub data_size: u32,
}

impl FrameHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 81;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.image_index.to_le_bytes());
        buf[4..8].copy_from_slice(&self.frame_number.to_le_bytes());
        buf[8..16].copy_from_slice(&self.semaphore_value.to_le_bytes());
        let mut off = 16;
        for row in &self.pose {
            for value in row {
                buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
                off += 4;
            }
        }
        buf[64..68].copy_from_slice(&self.width.to_le_bytes());
        buf[68..72].copy_from_slice(&self.height.to_le_bytes());
        buf[72..76].copy_from_slice(&self.stride.to_le_bytes());
        buf[76] = self.is_idr as u8;
        buf[77..81].copy_from_slice(&self.data_size.to_le_bytes());
        buf
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        if data.len() < Self::SIZE {
            return Err(TransportError::Protocol(format!(
                "frame header too short: {} < {}",
                data.len(),
                Self::SIZE
            )));
        }
        let mut pose: Pose = [[0.0; 4]; 3];
        let mut off = 16;
        for row in pose.iter_mut() {
            for value in row.iter_mut() {
                *value = f32::from_le_bytes(data[off..off + 4].try_into().unwrap());
                off += 4;
            }
        }
        Ok(Self {
            image_index: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            frame_number: u32::from_le_bytes(data[4..8].try_into().unwrap()),
            semaphore_value: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            pose,
            width: u32::from_le_bytes(data[64..68].try_into().unwrap()),
            height: u32::from_le_bytes(data[68..72].try_into().unwrap()),
            stride: u32::from_le_bytes(data[72..76].try_into().unwrap()),
            is_idr: data[76] != 0,
            data_size: u32::from_le_bytes(data[77..81].try_into().unwrap()),
        })
    }

    /// Reject headers no well-behaved producer can emit. A failure here
    /// tears down the connection.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.width == 0 || self.height == 0 || self.width > MAX_WIDTH || self.height > MAX_HEIGHT
        {
            return Err(TransportError::Protocol(format!(
                "frame dimensions {}x{} out of range",
                self.width, self.height
            )));
        }
        let packed_row = self.width as u64 * BYTES_PER_PIXEL as u64;
        if (self.stride as u64) < packed_row {
            return Err(TransportError::Protocol(format!(
                "stride {} smaller than packed row ({packed_row} bytes)",
                self.stride
            )));
        }
        let expected = self.stride as u64 * self.height as u64;
        if self.data_size as u64 != expected {
            return Err(TransportError::Protocol(format!(
                "data_size {} does not match {}x{} rows of stride {}",
                self.data_size, self.width, self.height, self.stride
            )));
        }
        if self.data_size as usize > MAX_FRAME_SIZE {
            return Err(TransportError::Protocol(format!(
                "data_size {} exceeds maximum frame size {MAX_FRAME_SIZE}",
                self.data_size
            )));
        }
        Ok(())
    }
}
