use crate::errors::TransportError;
use crate::frame::FrameView;
use crate::wire::{FrameHeader, InitHeader};
use crate::SubmitOutcome;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};

/// Producer side of the TCP bytestream.
///
/// One long-lived loopback connection. Connecting is lazy: every submit on
/// a dead connection makes one attempt, and until it succeeds frames are
/// dropped silently — backpressure belongs upstream at the renderer, not
/// here. A failed send tears the connection down the same way.
pub struct TcpFrameSender {
    addr: SocketAddr,
    init: InitHeader,
    stream: Option<TcpStream>,
    staging: Vec<u8>,
    frames_sent: u64,
    frames_dropped: u64,
}

impl TcpFrameSender {
    pub fn new(port: u16, init: InitHeader) -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
            init,
            stream: None,
            staging: Vec::new(),
            frames_sent: 0,
            frames_dropped: 0,
        }
    }

    /// True while a connection is up (a later send may still discover the
    /// peer went away).
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Send one frame, reconnecting first if needed.
    ///
    /// Never blocks beyond the kernel send buffer. Frames that cannot be
    /// delivered are counted and reported as [`SubmitOutcome::Dropped`].
    pub fn submit(&mut self, frame: &FrameView) -> Result<SubmitOutcome, TransportError> {
        frame.validate()?;

        if !self.ensure_connected() {
            self.count_drop(frame.frame_number);
            return Ok(SubmitOutcome::Dropped);
        }

        let packed_row = frame.packed_row_bytes();
        let src_stride = frame.stride as usize;

        // Normalise rows into the staging buffer when the source carries
        // alignment padding.
        let payload: &[u8] = if src_stride == packed_row {
            &frame.pixels[..frame.packed_len()]
        } else {
            self.staging.resize(frame.packed_len(), 0);
            for row in 0..frame.height as usize {
                let src = &frame.pixels[row * src_stride..row * src_stride + packed_row];
                self.staging[row * packed_row..(row + 1) * packed_row].copy_from_slice(src);
            }
            &self.staging
        };

        let header = FrameHeader {
            image_index: frame.image_index,
            frame_number: frame.frame_number as u32,
            semaphore_value: frame.semaphore_value,
            pose: frame.pose,
            width: frame.width,
            height: frame.height,
            stride: packed_row as u32,
            is_idr: frame.is_idr,
            data_size: payload.len() as u32,
        };

        let Some(stream) = self.stream.as_mut() else {
            self.count_drop(frame.frame_number);
            return Ok(SubmitOutcome::Dropped);
        };

        let sent = stream
            .write_all(&header.encode())
            .and_then(|_| stream.write_all(payload));

        if let Err(e) = sent {
            tracing::warn!(
                frame_number = frame.frame_number,
                error = %e,
                "frame send failed, dropping connection"
            );
            self.stream = None;
            self.count_drop(frame.frame_number);
            return Ok(SubmitOutcome::Dropped);
        }

        self.frames_sent += 1;
        if self.frames_sent.is_multiple_of(90) {
            tracing::debug!(
                frames_sent = self.frames_sent,
                bytes = FrameHeader::SIZE + payload.len(),
                "frame stream progressing"
            );
        }
        Ok(SubmitOutcome::Published)
    }

    fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }

        let mut stream = match TcpStream::connect(self.addr) {
            Ok(stream) => stream,
            Err(e) => {
                // Connection refused just means the host is not up yet.
                if e.kind() != std::io::ErrorKind::ConnectionRefused {
                    tracing::debug!(addr = %self.addr, error = %e, "connect attempt failed");
                }
                return false;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "failed to set TCP_NODELAY");
        }

        if let Err(e) = stream.write_all(&self.init.encode()) {
            tracing::warn!(error = %e, "failed to send init header");
            return false;
        }

        tracing::info!(
            addr = %self.addr,
            width = self.init.width,
            height = self.init.height,
            "connected to frame receiver"
        );
        self.stream = Some(stream);
        true
    }

    fn count_drop(&mut self, frame_number: u64) {
        self.frames_dropped += 1;
        if self.frames_dropped == 1 || self.frames_dropped.is_multiple_of(100) {
            tracing::debug!(
                frame_number,
                dropped = self.frames_dropped,
                "frame not delivered (receiver unreachable)"
            );
        }
    }
}
