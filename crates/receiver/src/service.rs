//! Host-side frame loops: pull frames off a transport, drive the encoder,
//! return buffers.

use crate::config::{ReceiverConfig, TransportKind};
use crate::encoder::{EncodeInput, EncoderDriver};
use crate::pose::PoseHistory;
use anyhow::Context;
use common::retry_with_backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transport::{ShmConsumer, TcpFrameListener, TransportError};

/// How long one ring acquisition attempt spins before re-checking the
/// exiting flag.
const ACQUIRE_TICK: Duration = Duration::from_millis(10);
/// Bound on waiting for a producer to configure the shared region.
const PRODUCER_WAIT: Duration = Duration::from_secs(120);

pub struct ReceiverService {
    config: ReceiverConfig,
    driver: EncoderDriver,
    pose_history: Arc<dyn PoseHistory>,
}

impl ReceiverService {
    pub fn new(
        config: ReceiverConfig,
        driver: EncoderDriver,
        pose_history: Arc<dyn PoseHistory>,
    ) -> Self {
        Self {
            config,
            driver,
            pose_history,
        }
    }

    pub fn run(&mut self, exiting: &AtomicBool) -> anyhow::Result<()> {
        match self.config.transport {
            TransportKind::SharedMemory => self.run_shm(exiting),
            TransportKind::Tcp => {
                // A previous instance may still be letting go of the port.
                let port = self.config.tcp_port;
                let listener =
                    retry_with_backoff(|| TcpFrameListener::bind(port), 5, 200, "Listener bind")
                        .context("failed to bind frame listener")?;
                self.run_tcp(listener, exiting)
            }
        }
    }

    /// Shared-memory mode: create the region, wait for a producer, then
    /// drain the ring until shutdown.
    pub fn run_shm(&mut self, exiting: &AtomicBool) -> anyhow::Result<()> {
        let shm_path = self.config.shm_path.clone();
        let mut consumer =
            ShmConsumer::create(&shm_path).context("failed to create shared frame region")?;

        tracing::info!(path = %shm_path, "waiting for frame producer");
        let stream = match consumer.wait_for_producer(PRODUCER_WAIT, exiting) {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                // Shutdown before anyone connected.
                consumer.shutdown();
                consumer.unlink().ok();
                return Ok(());
            }
            Err(e) => {
                consumer.shutdown();
                consumer.unlink().ok();
                return Err(e).context("no producer configured the region");
            }
        };

        tracing::info!(
            width = stream.width,
            height = stream.height,
            format_tag = stream.format_tag,
            "producer configured stream"
        );
        self.driver
            .start(stream.width, stream.height)
            .context("failed to start encoder")?;

        let mut processed = 0u64;
        let mut producer_drops = 0u64;

        while !exiting.load(Ordering::Relaxed) {
            if let Some(frame) = consumer.next_ready_slot(ACQUIRE_TICK) {
                let pose_match = self.pose_history.best_match(&frame.info.pose);
                let target_timestamp_ns = pose_match
                    .map(|m| m.target_timestamp_ns)
                    .unwrap_or(frame.info.target_timestamp_ns);

                let input = EncodeInput {
                    frame_number: frame.info.frame_number,
                    width: frame.info.width,
                    height: frame.info.height,
                    stride: frame.info.stride,
                    is_idr: frame.info.is_idr,
                    target_timestamp_ns,
                    pixels: frame.pixels,
                };
                // A rejected frame is dropped; the ring slot goes back
                // regardless so the producer never stalls on us.
                if self.driver.submit(&input).is_ok() {
                    processed += 1;
                }

                let slot = frame.slot;
                drop(frame);
                consumer.complete(slot);

                if processed > 0 && processed.is_multiple_of(300) {
                    let counters = consumer.counters();
                    tracing::info!(
                        processed,
                        written = counters.written,
                        encoded = counters.encoded,
                        dropped = counters.dropped,
                        "frame pipeline progressing"
                    );
                }
            }

            let dropped = consumer.counters().dropped;
            if dropped > producer_drops {
                tracing::warn!(
                    newly_dropped = dropped - producer_drops,
                    "producer dropped frames (encoder too slow?)"
                );
                producer_drops = dropped;
            }
        }

        // Shutdown: quiesce the producer, flush the encoder, then release
        // the session, the mapping, and finally the file.
        consumer.shutdown();
        self.driver.stop().ok();
        consumer.unlink().ok();
        tracing::info!(processed, "shared-memory receiver stopped");
        Ok(())
    }

    /// TCP mode: accept one producer at a time; a lost peer sends us back
    /// to listening with a fresh session for the next connection.
    pub fn run_tcp(
        &mut self,
        listener: TcpFrameListener,
        exiting: &AtomicBool,
    ) -> anyhow::Result<()> {
        while !exiting.load(Ordering::Relaxed) {
            let Some(mut stream) = listener.accept(exiting)? else {
                break;
            };

            let init = match stream.read_init(exiting) {
                Ok(Some(init)) => init,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "connection dropped before init, re-listening");
                    continue;
                }
            };
            tracing::info!(
                width = init.width,
                height = init.height,
                num_images = init.num_images,
                format_tag = init.format_tag,
                source_pid = init.source_pid,
                "producer stream configured"
            );

            if let Err(e) = self.driver.start(init.width, init.height) {
                tracing::error!(error = %e, "failed to start encoder, dropping producer");
                continue;
            }

            let mut processed = 0u64;
            loop {
                match stream.next_frame(exiting) {
                    Ok(Some(frame)) => {
                        let pose_match = self.pose_history.best_match(&frame.header.pose);
                        // Session policy for the opaque wire field: our
                        // producer loads the target timestamp into it.
                        let target_timestamp_ns = pose_match
                            .map(|m| m.target_timestamp_ns)
                            .unwrap_or(frame.header.semaphore_value);

                        let input = EncodeInput {
                            frame_number: frame.header.frame_number as u64,
                            width: frame.header.width,
                            height: frame.header.height,
                            stride: frame.header.stride,
                            is_idr: frame.header.is_idr,
                            target_timestamp_ns,
                            pixels: frame.pixels,
                        };
                        if self.driver.submit(&input).is_ok() {
                            processed += 1;
                        }
                    }
                    Ok(None) => break,
                    Err(TransportError::PeerGone) => {
                        tracing::info!(processed, "producer disconnected, re-listening");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, processed, "tearing down connection");
                        break;
                    }
                }
            }

            self.driver.stop().ok();
        }

        self.driver.stop().ok();
        tracing::info!("tcp receiver stopped");
        Ok(())
    }
}
