pub mod config;
pub mod logging;
pub mod pacing;
pub mod shipper;
pub mod source;

pub use config::{ShipperConfig, TransportKind};
pub use pacing::FramePacing;
pub use shipper::FrameShipper;
pub use source::{FrameSource, GradientSource, SourcedFrame};
