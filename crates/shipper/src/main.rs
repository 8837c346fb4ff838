use anyhow::Context;
use shipper::logging::setup_logging;
use shipper::{FramePacing, FrameShipper, FrameSource, GradientSource, ShipperConfig};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use transport::{SubmitOutcome, TransportError};

fn main() -> anyhow::Result<()> {
    let config = ShipperConfig::from_env()?;
    setup_logging(&config);

    let exiting = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&exiting))?;
    flag::register(SIGINT, Arc::clone(&exiting))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let Some(mut shipper) = FrameShipper::connect(&config, &exiting)
        .context("failed to bring up the frame transport")?
    else {
        return Ok(());
    };
    tracing::info!(
        transport = ?config.transport,
        width = config.width,
        height = config.height,
        fps = config.fps,
        "frame shipper running"
    );

    let mut source = GradientSource::new(config.width, config.height);
    let mut pacing = FramePacing::new(config.fps);

    let mut frame_number = 0u64;
    let mut shipped = 0u64;
    let mut dropped = 0u64;

    while !exiting.load(Ordering::Relaxed) {
        if shipper.peer_shutdown() {
            tracing::info!("host requested shutdown");
            break;
        }

        let frame = source
            .next_frame(frame_number)
            .context("frame source failed")?;

        match shipper.submit(frame_number, frame_number == 0, &frame) {
            Ok(SubmitOutcome::Published) => shipped += 1,
            Ok(SubmitOutcome::Dropped) => dropped += 1,
            Err(TransportError::PeerGone) => {
                tracing::info!("host is gone, stopping");
                break;
            }
            Err(e) => {
                tracing::error!(frame_number, error = %e, "failed to ship frame");
                dropped += 1;
            }
        }
        frame_number += 1;

        if frame_number.is_multiple_of(90) {
            tracing::debug!(frame_number, shipped, dropped, "shipping frames");
        }

        pacing.wait();
    }

    tracing::info!(shipped, dropped, "frame shipper stopped");
    Ok(())
}
