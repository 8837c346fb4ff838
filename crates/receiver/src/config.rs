use std::env;
use transport::layout::DEFAULT_REGION_PATH;
use transport::DEFAULT_TCP_PORT;

pub use common::Environment;

/// Which of the two interchangeable transports this process serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    SharedMemory,
    Tcp,
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub environment: Environment,
    pub transport: TransportKind,
    pub tcp_port: u16,
    pub shm_path: String,
    pub bitrate_bps: u32,
}

impl ReceiverConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let transport = match env::var("FRAME_TRANSPORT")
            .unwrap_or_else(|_| "shm".to_string())
            .to_lowercase()
            .as_str()
        {
            "tcp" => TransportKind::Tcp,
            "shm" | "shared-memory" => TransportKind::SharedMemory,
            other => anyhow::bail!("unknown FRAME_TRANSPORT '{other}' (expected shm or tcp)"),
        };

        let tcp_port = env::var("FRAME_TCP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TCP_PORT);

        let shm_path =
            env::var("FRAME_SHM_PATH").unwrap_or_else(|_| DEFAULT_REGION_PATH.to_string());

        let bitrate_bps = env::var("ENCODER_BITRATE_BPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10_000_000);

        Ok(Self {
            environment,
            transport,
            tcp_port,
            shm_path,
            bitrate_bps,
        })
    }
}
