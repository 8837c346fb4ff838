use crate::errors::TransportError;
use crate::layout::MAX_FRAME_SIZE;
use crate::wire::{FrameHeader, InitHeader};
use nix::libc;
use std::io::{self, Read};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Granularity of the cancellable read loop.
const READ_TICK: Duration = Duration::from_millis(1);
/// Granularity of the accept poll.
const ACCEPT_TICK: Duration = Duration::from_millis(15);

/// Host side of the TCP bytestream: listens on loopback and accepts one
/// producer at a time.
pub struct TcpFrameListener {
    listener: TcpListener,
    port: u16,
}

impl TcpFrameListener {
    /// Bind the loopback listener with `SO_REUSEADDR` so a restarted host
    /// does not trip over a lingering TIME_WAIT socket.
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let listener = bind_reuseaddr_listener(port)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        tracing::info!(port, "listening for frame producer");
        Ok(Self { listener, port })
    }

    /// Actual bound port (differs from the requested one when binding port 0).
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Wait for a producer, polling `exiting` between short ticks.
    ///
    /// Returns `Ok(None)` when shutdown was requested before anyone
    /// connected.
    pub fn accept(&self, exiting: &AtomicBool) -> Result<Option<TcpFrameStream>, TransportError> {
        loop {
            if exiting.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(READ_TICK))?;
                    tracing::info!(%peer, "frame producer connected");
                    return Ok(Some(TcpFrameStream::new(stream)));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_TICK);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// One accepted producer connection.
///
/// The pixel buffer is reused across frames; a returned [`ReceivedFrame`]
/// borrows it until the next read.
pub struct TcpFrameStream {
    stream: TcpStream,
    pixels: Vec<u8>,
}

/// A frame read off the wire, pixels borrowed from the stream's buffer.
pub struct ReceivedFrame<'a> {
    pub header: FrameHeader,
    pub pixels: &'a [u8],
}

impl TcpFrameStream {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            pixels: Vec::new(),
        }
    }

    /// Read the one-time init header. `Ok(None)` means shutdown was
    /// requested mid-read.
    pub fn read_init(&mut self, exiting: &AtomicBool) -> Result<Option<InitHeader>, TransportError> {
        let mut buf = [0u8; InitHeader::SIZE];
        if !read_exactly(&mut self.stream, &mut buf, exiting)? {
            return Ok(None);
        }
        let init = InitHeader::decode(&buf)?;
        if init.width == 0 || init.height == 0 {
            return Err(TransportError::Protocol(format!(
                "init header with {}x{} stream",
                init.width, init.height
            )));
        }
        Ok(Some(init))
    }

    /// Read the next frame. `Ok(None)` means shutdown was requested;
    /// `PeerGone` means the producer closed or reset the connection.
    pub fn next_frame(&mut self, exiting: &AtomicBool) -> Result<Option<ReceivedFrame<'_>>, TransportError> {
        let mut buf = [0u8; FrameHeader::SIZE];
        if !read_exactly(&mut self.stream, &mut buf, exiting)? {
            return Ok(None);
        }
        let header = FrameHeader::decode(&buf)?;
        header.validate()?;

        let len = header.data_size as usize;
        debug_assert!(len <= MAX_FRAME_SIZE);
        if self.pixels.len() < len {
            self.pixels.resize(len, 0);
        }
        if !read_exactly(&mut self.stream, &mut self.pixels[..len], exiting)? {
            return Ok(None);
        }

        Ok(Some(ReceivedFrame {
            header,
            pixels: &self.pixels[..len],
        }))
    }
}

/// Fully-draining read that tolerates short reads and keeps shutdown
/// observable: each 1 ms timeout tick re-checks `exiting`.
///
/// Returns `Ok(false)` when cancelled, `PeerGone` on EOF or a reset.
fn read_exactly(
    stream: &mut TcpStream,
    buf: &mut [u8],
    exiting: &AtomicBool,
) -> Result<bool, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        if exiting.load(Ordering::Relaxed) {
            return Ok(false);
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(TransportError::PeerGone),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                ) =>
            {
                return Err(TransportError::PeerGone);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

/// Build a loopback listener with `SO_REUSEADDR` set before `bind`, which
/// `std::net::TcpListener` cannot express.
fn bind_reuseaddr_listener(port: u16) -> io::Result<TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let one: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = u32::from(Ipv4Addr::LOCALHOST).to_be();

        if libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        if libc::listen(fd, 1) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(TcpListener::from_raw_fd(fd))
    }
}
