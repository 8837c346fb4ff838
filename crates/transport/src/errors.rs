use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("region magic mismatch: found {found:#010x}, expected {expected:#010x}")]
    BadMagic { found: u32, expected: u32 },

    #[error("unsupported region version {found} (expected {expected})")]
    BadVersion { found: u32, expected: u32 },

    #[error("region file too small: {found} bytes, need {expected}")]
    RegionTooSmall { found: u64, expected: u64 },

    #[error("peer is gone")]
    PeerGone,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Startup-time configuration mismatches the producer must refuse to run on.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            TransportError::BadMagic { .. }
                | TransportError::BadVersion { .. }
                | TransportError::RegionTooSmall { .. }
        )
    }
}
