use std::env;
use transport::layout::DEFAULT_REGION_PATH;
use transport::DEFAULT_TCP_PORT;

pub use common::Environment;

/// Which transport this producer ships over. Parsed independently from
/// the receiver's setting; both processes read the same variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    SharedMemory,
    Tcp,
}

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    pub environment: Environment,
    pub transport: TransportKind,
    pub tcp_port: u16,
    pub shm_path: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub format_tag: u32,
}

impl ShipperConfig {
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

        let width = env::var("FRAME_WIDTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1920);

        let height = env::var("FRAME_HEIGHT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1080);

        let fps = env::var("FRAME_FPS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(90.0);

        // DXGI_FORMAT_B8G8R8A8_UNORM; opaque to the receiver.
        let format_tag = env::var("FRAME_FORMAT_TAG")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(87);

        Ok(Self {
            environment,
            transport,
            tcp_port,
            shm_path,
            width,
            height,
            fps,
            format_tag,
        })
    }
}
