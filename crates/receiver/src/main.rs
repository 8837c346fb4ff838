use anyhow::Context;
use receiver::logging::setup_logging;
use receiver::session::loopback::LoopbackBackend;
use receiver::{
    EncoderDriver, EncoderSettings, IdrScheduler, LogSink, NalSink, NoPoseHistory, ReceiverConfig,
    ReceiverService,
};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

fn main() -> anyhow::Result<()> {
    let config = ReceiverConfig::from_env()?;
    setup_logging(&config);

    let exiting = Arc::new(AtomicBool::new(false));
    flag::register(SIGTERM, Arc::clone(&exiting))?;
    flag::register(SIGINT, Arc::clone(&exiting))?;
    tracing::info!("Signal handlers registered (SIGTERM, SIGINT)");

    let scheduler = Arc::new(IdrScheduler::new());
    let sink: Arc<Mutex<dyn NalSink>> = Arc::new(Mutex::new(LogSink::new()));
    // Stand-in backend; a production build plugs the platform encoder
    // adapter in here.
    let backend = Arc::new(LoopbackBackend);

    let driver = EncoderDriver::new(
        backend,
        sink,
        Arc::clone(&scheduler),
        EncoderSettings {
            bitrate_bps: config.bitrate_bps,
            ..EncoderSettings::default()
        },
    );

    let mut service = ReceiverService::new(config, driver, Arc::new(NoPoseHistory));
    match service.run(&exiting) {
        Ok(()) => {
            tracing::info!("receiver stopped gracefully");
            Ok(())
        }
        Err(e) => {
            tracing::error!("receiver failed: {:#}", e);
            Err(e).context("receiver service error")
        }
    }
}
