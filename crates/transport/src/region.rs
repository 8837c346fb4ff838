use crate::errors::TransportError;
use crate::layout::{
    slab_offset, total_size, RegionHeader, SlotState, MAX_FRAME_SIZE, NUM_BUFFERS, REGION_MAGIC,
    REGION_VERSION,
};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

/// A mapping of the shared frame ring backed by a regular file.
///
/// The consumer (host) creates the file and owns its lifecycle, including
/// the unlink at shutdown. The producer maps the same file and must refuse
/// to use it unless magic and version check out once `initialized` is up.
pub struct ShmRegion {
    _file: File,
    mmap: MmapMut,
    path: PathBuf,
}

impl ShmRegion {
    /// Create the region file, size it, and publish an initialised header.
    ///
    /// Consumer side only. Existing content is discarded; slot states start
    /// at EMPTY and `initialized` is released last so a producer that maps
    /// early never observes a half-built header.
    pub fn create_and_init(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let size = total_size();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.set_len(size as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        // The file was truncated, so everything is zero: slot states are
        // EMPTY, sequences and counters are 0, cfg is unset.
        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut RegionHeader) };
        header.magic = REGION_MAGIC;
        header.version = REGION_VERSION;
        mmap.flush()?;

        header.initialized.store(1, Ordering::Release);

        tracing::info!(path = %path.display(), size, "shared frame region created");

        Ok(Self {
            _file: file,
            mmap,
            path: path.to_path_buf(),
        })
    }

    /// Map an existing region file created by the consumer.
    ///
    /// Producer side. Only the mapping size is checked here; magic and
    /// version are validated after `initialized` is observed, since the
    /// consumer publishes them under that flag.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let found = file.metadata()?.len();
        let expected = total_size() as u64;
        if found < expected {
            return Err(TransportError::RegionTooSmall { found, expected });
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            _file: file,
            mmap,
            path: path.to_path_buf(),
        })
    }

    pub fn header(&self) -> &RegionHeader {
        unsafe { &*(self.mmap.as_ptr() as *const RegionHeader) }
    }

    pub fn header_mut(&mut self) -> &mut RegionHeader {
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut RegionHeader) }
    }

    /// Verify magic and version after `initialized` has been observed.
    pub fn validate(&self) -> Result<(), TransportError> {
        let header = self.header();
        if header.magic != REGION_MAGIC {
            return Err(TransportError::BadMagic {
                found: header.magic,
                expected: REGION_MAGIC,
            });
        }
        if header.version != REGION_VERSION {
            return Err(TransportError::BadVersion {
                found: header.version,
                expected: REGION_VERSION,
            });
        }
        Ok(())
    }

    /// Metadata of slot `index`.
    pub fn slot(&self, index: usize) -> &crate::layout::FrameSlot {
        &self.header().slots[index]
    }

    /// Pixel slab of slot `index`.
    pub fn pixels(&self, index: usize) -> &[u8] {
        let offset = slab_offset(index);
        &self.mmap[offset..offset + MAX_FRAME_SIZE]
    }

    /// Mutable pixel slab of slot `index`. The caller must own the slot
    /// (hold its WRITING or ENCODING state) before touching the slab.
    pub fn pixels_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = slab_offset(index);
        &mut self.mmap[offset..offset + MAX_FRAME_SIZE]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the backing file. Consumer side, at shutdown.
    pub fn unlink(&self) -> Result<(), TransportError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Current state of every slot, for diagnostics and tests.
    pub fn slot_states(&self) -> [Option<SlotState>; NUM_BUFFERS] {
        let header = self.header();
        std::array::from_fn(|i| {
            SlotState::from_u32(header.slots[i].state.load(Ordering::Relaxed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_initialises_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.shm");

        let region = ShmRegion::create_and_init(&path).unwrap();
        let header = region.header();

        assert_eq!(header.magic, REGION_MAGIC);
        assert_eq!(header.version, REGION_VERSION);
        assert_eq!(header.initialized.load(Ordering::Acquire), 1);
        assert_eq!(header.cfg_set.load(Ordering::Acquire), 0);
        assert_eq!(header.write_sequence.load(Ordering::Relaxed), 0);
        assert_eq!(
            region.slot_states(),
            [Some(SlotState::Empty); NUM_BUFFERS],
            "fresh slots must all be EMPTY"
        );
        assert_eq!(region.len(), total_size());
    }

    #[test]
    fn test_create_discards_stale_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.shm");

        {
            let mut region = ShmRegion::create_and_init(&path).unwrap();
            region.header_mut().cfg_width = 640;
            region
                .header_mut()
                .write_sequence
                .store(99, Ordering::Relaxed);
        }

        let region = ShmRegion::create_and_init(&path).unwrap();
        assert_eq!(region.header().cfg_width, 0, "re-create must start clean");
        assert_eq!(region.header().write_sequence.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_open_rejects_undersized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.shm");
        std::fs::write(&path, [0u8; 128]).unwrap();

        match ShmRegion::open_existing(&path) {
            Err(TransportError::RegionTooSmall { found, .. }) => assert_eq!(found, 128),
            other => panic!("expected RegionTooSmall, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_validate_rejects_bad_magic_and_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.shm");

        let mut region = ShmRegion::create_and_init(&path).unwrap();
        assert!(region.validate().is_ok());

        region.header_mut().magic = 0x1234_5678;
        assert!(matches!(
            region.validate(),
            Err(TransportError::BadMagic { found: 0x1234_5678, .. })
        ));

        region.header_mut().magic = REGION_MAGIC;
        region.header_mut().version = 7;
        assert!(matches!(
            region.validate(),
            Err(TransportError::BadVersion { found: 7, .. })
        ));
    }

    #[test]
    fn test_two_mappings_share_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.shm");

        let consumer = ShmRegion::create_and_init(&path).unwrap();
        let mut producer = ShmRegion::open_existing(&path).unwrap();

        producer.header_mut().cfg_width = 1920;
        producer
            .header()
            .cfg_set
            .store(1, Ordering::Release);

        assert_eq!(consumer.header().cfg_set.load(Ordering::Acquire), 1);
        assert_eq!(consumer.header().cfg_width, 1920);
    }

    #[test]
    fn test_unlink_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region.shm");

        let region = ShmRegion::create_and_init(&path).unwrap();
        assert!(path.exists());
        region.unlink().unwrap();
        assert!(!path.exists());
    }
}
