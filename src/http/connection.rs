use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::Buffer;
use crate::http::parser::{ParseError, parse_request};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::server::epoller::Epoller;

/// Below this many pending bytes a level-triggered write pass stops and
/// waits for the next writable event.
pub const LOW_WATER_MARK: usize = 10240;

/// Identity of one accepted connection.
///
/// The fd alone is not unique over time: the kernel hands the same number to
/// the next accepted socket once a connection closes. The generation makes
/// events and timers that were issued for an earlier connection detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    pub fd: RawFd,
    pub generation: u32,
}

impl ConnId {
    pub fn new(fd: RawFd, generation: u32) -> Self {
        Self { fd, generation }
    }

    /// Packed into the 64-bit epoll user data.
    pub fn token(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.fd as u32)
    }

    pub fn from_token(token: u64) -> Self {
        Self {
            fd: (token & 0xFFFF_FFFF) as u32 as RawFd,
            generation: (token >> 32) as u32,
        }
    }
}

/// Server-wide state every connection shares.
#[derive(Debug)]
pub struct ConnContext {
    /// Document root.
    pub root: PathBuf,
    /// Whether connection sockets are registered edge-triggered, in which
    /// case reads and writes loop until the socket would block.
    pub edge_triggered: bool,
    live: AtomicUsize,
}

impl ConnContext {
    pub fn new(root: PathBuf, edge_triggered: bool) -> Self {
        Self {
            root,
            edge_triggered,
            live: AtomicUsize::new(0),
        }
    }

    /// Number of currently open connections.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Reading,
    Processing,
    Writing,
    Closed,
}

/// One client connection: socket, buffers and the request/response pair
/// being worked on.
///
/// A connection does no readiness handling of its own. The reactor decides
/// when [`Connection::read`], [`Connection::process`] and
/// [`Connection::write`] run, and re-arms the socket afterwards.
#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    stream: Option<TcpStream>,
    peer: SocketAddr,
    state: ConnectionState,
    read_buf: Buffer,
    write_buf: Buffer,
    request: Request,
    response: Response,
    writer: ResponseWriter,
    ctx: Arc<ConnContext>,
}

impl Connection {
    pub fn new(id: ConnId, stream: TcpStream, peer: SocketAddr, ctx: Arc<ConnContext>) -> Self {
        let live = ctx.live.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(fd = id.fd, peer = %peer, live, "client connected");
        Self {
            id,
            stream: Some(stream),
            peer,
            state: ConnectionState::Reading,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            request: Request::new(),
            response: Response::new(),
            writer: ResponseWriter::new(),
            ctx,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn fd(&self) -> RawFd {
        self.id.fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Whether the response being written asked the client to keep the
    /// connection open.
    pub fn is_keep_alive(&self) -> bool {
        self.response.is_keep_alive()
    }

    /// Bytes of the current response not yet written.
    pub fn bytes_to_write(&self) -> usize {
        self.writer.remaining(&self.write_buf)
    }

    /// Pull available bytes from the socket into the read buffer.
    ///
    /// In edge-triggered mode this keeps reading until the socket would
    /// block. `Ok(0)` means the peer closed its side. `WouldBlock` is only
    /// returned when nothing at all was read.
    pub fn read(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let mut total = 0;
        loop {
            match self.read_buf.read_from(&mut &*stream) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    total += n;
                    if !self.ctx.edge_triggered {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && total > 0 => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }

    /// Try to turn buffered input into a ready-to-send response.
    ///
    /// Returns `true` when a response was built and the connection should
    /// wait for writability, `false` when more input is needed.
    pub fn process(&mut self) -> bool {
        if self.read_buf.is_empty() {
            self.state = ConnectionState::Reading;
            return false;
        }

        self.state = ConnectionState::Processing;
        match parse_request(&mut self.request, &mut self.read_buf) {
            Ok(()) => {
                tracing::debug!(fd = self.id.fd, path = %self.request.path, "request complete");
                self.response.init(
                    &self.ctx.root,
                    &self.request.path,
                    self.request.is_keep_alive(),
                    200,
                );
            }
            Err(ParseError::Incomplete) => {
                self.state = ConnectionState::Reading;
                return false;
            }
            Err(e) => {
                tracing::warn!(fd = self.id.fd, peer = %self.peer, error = ?e, "bad request");
                self.response.init(&self.ctx.root, &self.request.path, false, 400);
                self.read_buf.consume_all();
                self.request.reset();
            }
        }

        self.write_buf.consume_all();
        self.response.make_response(&mut self.write_buf);
        self.writer.start(self.response.file_len());
        self.state = ConnectionState::Writing;
        tracing::debug!(
            fd = self.id.fd,
            code = self.response.code(),
            bytes = self.bytes_to_write(),
            "response ready"
        );
        true
    }

    /// Write as much of the pending response as the socket takes.
    ///
    /// Edge-triggered connections loop until everything is written or the
    /// socket would block; level-triggered ones stop once no more than
    /// [`LOW_WATER_MARK`] bytes remain.
    pub fn write(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let mut total = 0;
        while self.writer.remaining(&self.write_buf) > 0 {
            let n = match self.writer.write_to(
                &mut &*stream,
                &mut self.write_buf,
                self.response.file(),
            ) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            total += n;
            if !self.ctx.edge_triggered && self.writer.remaining(&self.write_buf) <= LOW_WATER_MARK {
                break;
            }
        }
        Ok(total)
    }

    /// Deregister from `epoller`, release the body mapping and close the
    /// socket. Closing twice is a no-op.
    pub fn close(&mut self, epoller: &Epoller) {
        self.response.unmap_file();
        if self.is_closed() {
            return;
        }
        if let Err(e) = epoller.delete(self.id.fd) {
            tracing::debug!(fd = self.id.fd, error = %e, "epoll delete failed");
        }
        self.state = ConnectionState::Closed;
        let live = self.ctx.live.fetch_sub(1, Ordering::SeqCst) - 1;
        self.stream = None;
        tracing::info!(fd = self.id.fd, peer = %self.peer, live, "client disconnected");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.ctx.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
