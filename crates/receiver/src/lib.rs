pub mod bitstream;
pub mod config;
pub mod encoder;
pub mod idr;
pub mod logging;
pub mod pose;
pub mod service;
pub mod session;
pub mod sink;

pub use config::{ReceiverConfig, TransportKind};
pub use encoder::{DriverState, EncodeInput, EncoderDriver, EncoderError, EncoderSettings};
pub use idr::IdrScheduler;
pub use pose::{NoPoseHistory, PoseHistory, PoseMatch};
pub use service::ReceiverService;
pub use session::{
    Codec, EncodeBackend, EncodeSession, EncodedSample, MediaTime, PixelPlane, SampleCallback,
    SampleContext, SampleTiming, SessionConfig, SessionError,
};
pub use sink::{LogSink, NalSink};
