//! Shared-memory region layout.
//!
//! MEMORY ORDERING:
//!
//! The region is mapped read/write by two processes at once. Every shared
//! field that changes after initialisation is published through an atomic:
//!
//! Producer protocol (per slot):
//! 1. CAS `state` EMPTY -> WRITING with `Ordering::Acquire`
//! 2. Write pixel slab and slot metadata
//! 3. Store `state = READY` with `Ordering::Release`
//!
//! Consumer protocol (per slot):
//! 1. CAS `state` READY -> ENCODING with `Ordering::Acquire`
//! 2. Read pixel slab and slot metadata
//! 3. Store `state = EMPTY` with `Ordering::Release`
//!
//! The Release/Acquire pairs make all slab and metadata writes visible
//! before the other side touches the slot. Plain (non-atomic) fields are
//! only ever read after an acquire-load observed the publish that covers
//! them: `magic`/`version` after `initialized`, `cfg_*` after `cfg_set`,
//! slot metadata after `state`.
//!
//! Alignment:
//! `#[repr(C, align(8))]` keeps the 64-bit atomics naturally aligned, which
//! the lock-free protocol requires. Pixel slabs start at the first page
//! boundary past the header so mappings stay cache- and mmap-friendly.

use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::OnceLock;

/// "ALVR" in ASCII.
pub const REGION_MAGIC: u32 = 0x414C_5652;
pub const REGION_VERSION: u32 = 1;

pub const DEFAULT_REGION_PATH: &str = "/tmp/alvr_frame_buffer.shm";

/// Maximum frame dimensions (4K stereo).
pub const MAX_WIDTH: u32 = 4096;
pub const MAX_HEIGHT: u32 = 2048;
pub const BYTES_PER_PIXEL: u32 = 4;
pub const MAX_FRAME_SIZE: usize = (MAX_WIDTH * MAX_HEIGHT * BYTES_PER_PIXEL) as usize;

/// Triple buffering: the producer can stay one frame ahead while the
/// consumer encodes, with one slot spare to absorb jitter.
pub const NUM_BUFFERS: usize = 3;

/// Slot lifecycle for lock-free hand-off.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the producer to claim.
    Empty = 0,
    /// Producer is filling the slab.
    Writing = 1,
    /// Published, waiting for the consumer.
    Ready = 2,
    /// Consumer owns the slot while the encoder reads it.
    Encoding = 3,
}

impl SlotState {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(SlotState::Empty),
            1 => Some(SlotState::Writing),
            2 => Some(SlotState::Ready),
            3 => Some(SlotState::Encoding),
            _ => None,
        }
    }
}

/// Per-slot metadata, separate from the pixel slabs for cache efficiency.
#[repr(C, align(8))]
pub struct FrameSlot {
    pub state: AtomicU32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub timestamp_ns: u64,
    pub frame_number: u64,
    pub is_idr: u8,
    _pad: [u8; 7],
    pub pose: [[f32; 4]; 3],
}

/// Region header. Created and initialised by the consumer; the producer
/// only writes the `cfg_*` block (once) and the slot/sequence fields its
/// side owns.
#[repr(C, align(8))]
pub struct RegionHeader {
    pub magic: u32,
    pub version: u32,
    /// 1 once the consumer finished initialising the region.
    pub initialized: AtomicU32,
    /// 1 requests a drain-to-quiescence on both sides.
    pub shutdown: AtomicU32,

    pub cfg_width: u32,
    pub cfg_height: u32,
    pub cfg_format: u32,
    /// 1 once `cfg_*` is stable for the rest of the session.
    pub cfg_set: AtomicU32,

    /// Bumped by the producer on each successful publish.
    pub write_sequence: AtomicU64,
    /// Bumped by the consumer on each completed encode.
    pub read_sequence: AtomicU64,

    pub frames_written: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_dropped: AtomicU64,

    _reserved: [u8; 64],

    pub slots: [FrameSlot; NUM_BUFFERS],
}

/// Host page size, never below the 4096 the layout was designed for.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let raw = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        if raw > 0 { (raw as usize).max(4096) } else { 4096 }
    })
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Byte offset of slot `index`'s pixel slab from the start of the region.
pub fn slab_offset(index: usize) -> usize {
    debug_assert!(index <= NUM_BUFFERS);
    align_up(std::mem::size_of::<RegionHeader>(), page_size()) + index * MAX_FRAME_SIZE
}

/// Total mapped size of the region file.
pub fn total_size() -> usize {
    slab_offset(NUM_BUFFERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_alignment() {
        assert_eq!(
            std::mem::align_of::<RegionHeader>(),
            8,
            "header must be 8-byte aligned for the 64-bit atomics"
        );
        assert_eq!(std::mem::align_of::<FrameSlot>(), 8);
    }

    #[test]
    fn test_slot_size_matches_wire_contract() {
        // state + width + height + stride (16) + timestamp + frame_number (16)
        // + is_idr + pad (8) + pose (48)
        assert_eq!(std::mem::size_of::<FrameSlot>(), 88);
    }

    #[test]
    fn test_header_size() {
        // 8 u32 words (32) + 5 u64 words (40) + reserved (64) + 3 slots (264)
        assert_eq!(std::mem::size_of::<RegionHeader>(), 400);
    }

    #[test]
    fn test_slabs_are_page_aligned() {
        assert!(page_size() >= 4096);
        assert!(slab_offset(0).is_multiple_of(page_size()));
        assert!(slab_offset(0) >= std::mem::size_of::<RegionHeader>());
        assert_eq!(slab_offset(1) - slab_offset(0), MAX_FRAME_SIZE);
        assert_eq!(
            total_size(),
            slab_offset(0) + NUM_BUFFERS * MAX_FRAME_SIZE
        );
    }

    #[test]
    fn test_slot_state_conversions() {
        for state in [
            SlotState::Empty,
            SlotState::Writing,
            SlotState::Ready,
            SlotState::Encoding,
        ] {
            assert_eq!(SlotState::from_u32(state as u32), Some(state));
        }
        assert_eq!(SlotState::from_u32(4), None);
    }
}
