//! Interruptible, buffered, deadline-bound TCP stream with in-band TLS.
//!
//! Every blocking operation is bounded by the stream timeout and can be
//! aborted from another thread through an [`Interrupter`]. The socket is
//! kept nonblocking for its whole life; readiness waits go through a
//! dedicated [`polling::Poller`] whose `notify` doubles as the interrupt
//! wakeup during connect, while an established socket is torn out from
//! under the owner with `shutdown(2)`.
//!
//! Reads and writes come in two layers: `read_some`/`write_some` transfer
//! whatever the socket has within the deadline, and the [`io::Read`] /
//! [`io::Write`] impls add a split input/output buffer whose refill first
//! flushes pending output.

use crate::error::StreamError;
use crate::net::buffer::{SplitBuffer, DEFAULT_BUFFER_SIZE};
use crate::net::resolve;
use crate::net::state::{AtomicState, State, Wants};
use crate::tls::{TlsError, TlsSession};
use polling::{Event, Poller};
use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::ServerName;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default per-operation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_KEY: usize = 0;
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// State shared with interrupters. The poller outlives every registered fd.
struct Shared {
    state: AtomicState,
    poller: Poller,
    socket: Mutex<Option<Arc<TcpStream>>>,
}

impl Shared {
    fn socket_slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<TcpStream>>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Abort whatever the owning thread is doing. Callable from any thread.
    fn interrupt(&self) {
        match self.state.exchange(State::Interrupting) {
            // Another interrupter owns the teardown and will finish it.
            State::Interrupting => return,
            State::Connecting => {
                let _ = self.poller.notify();
            }
            State::Opened | State::Shutdowned => {
                let slot = self.socket_slot();
                if let Some(socket) = slot.as_ref() {
                    let _ = socket.shutdown(Shutdown::Both);
                }
                drop(slot);
                let _ = self.poller.notify();
            }
            State::Closed | State::Interrupted => {}
        }
        debug!("stream interrupted");
        self.state.store(State::Interrupted);
    }

    fn check_live(&self) -> Result<(), StreamError> {
        match self.state.load() {
            State::Interrupting | State::Interrupted => Err(StreamError::Interrupted),
            _ => Ok(()),
        }
    }

    /// Block until `fd` is ready in the wanted direction, the deadline
    /// elapses, or an interrupt lands. Registration is oneshot, so the
    /// interest is re-armed on every pass.
    fn wait_ready(&self, fd: RawFd, until: Instant, wants: Wants) -> Result<(), StreamError> {
        let mut events = Vec::with_capacity(1);
        loop {
            self.check_live()?;
            let budget = until
                .checked_duration_since(Instant::now())
                .ok_or(StreamError::Timeout)?;
            let interest = match wants {
                Wants::Readable => Event::readable(POLL_KEY),
                Wants::Writable => Event::writable(POLL_KEY),
            };
            self.poller.modify(fd, interest)?;
            events.clear();
            match self.poller.wait(&mut events, Some(budget)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
            self.check_live()?;
            if events.iter().any(|ev| ev.key == POLL_KEY) {
                return Ok(());
            }
            // Woken by notify without readiness; the deadline check decides.
        }
    }
}

/// Cloneable remote control that aborts the stream's blocking operations.
///
/// After an interrupt every operation on the stream fails with
/// [`StreamError::Interrupted`] until the stream is closed.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
}

impl Interrupter {
    /// Abort the current and all future operations on the stream.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("state", &self.shared.state.load())
            .finish()
    }
}

/// Buffered TCP stream with per-operation timeouts, cross-thread interrupt
/// and in-band TLS upgrade/downgrade.
pub struct SocketStream {
    shared: Arc<Shared>,
    socket: Option<Arc<TcpStream>>,
    session: Option<TlsSession>,
    tls_active: bool,
    last_error: Option<StreamError>,
    timeout: Duration,
    buffer: SplitBuffer,
}

impl SocketStream {
    /// Create an unconnected stream with the default buffer size.
    pub fn new() -> Result<Self, StreamError> {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create an unconnected stream with `size` bytes of buffer, split
    /// evenly between input and output.
    pub fn with_buffer_size(size: usize) -> Result<Self, StreamError> {
        let poller = Poller::new().map_err(StreamError::from)?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: AtomicState::new(State::Closed),
                poller,
                socket: Mutex::new(None),
            }),
            socket: None,
            session: None,
            tls_active: false,
            last_error: None,
            timeout: DEFAULT_TIMEOUT,
            buffer: SplitBuffer::new(size),
        })
    }

    // ---- lifecycle -------------------------------------------------------

    /// Resolve `host`/`service` and connect to the first address that
    /// accepts, within a single deadline. Returns `false` on failure with
    /// the cause in [`last_error`](Self::last_error).
    pub fn connect(&mut self, host: &str, service: &str) -> bool {
        self.last_error = None;
        let result =
            resolve::resolve_host(host, service).and_then(|addrs| self.connect_addrs_inner(&addrs));
        self.seal_bool(result)
    }

    /// Like [`connect`](Self::connect) with a numeric port.
    pub fn connect_port(&mut self, host: &str, port: u16) -> bool {
        self.last_error = None;
        let result =
            resolve::resolve_port(host, port).and_then(|addrs| self.connect_addrs_inner(&addrs));
        self.seal_bool(result)
    }

    /// Connect to the first of `addrs` that accepts, within one deadline.
    pub fn connect_addrs(&mut self, addrs: &[SocketAddr]) -> bool {
        self.last_error = None;
        let result = self.connect_addrs_inner(addrs);
        self.seal_bool(result)
    }

    fn connect_addrs_inner(&mut self, addrs: &[SocketAddr]) -> Result<(), StreamError> {
        if self.is_open() {
            return Err(StreamError::Logic("stream is already open"));
        }
        if addrs.is_empty() {
            return Err(StreamError::Logic("no addresses to connect"));
        }
        let until = self.deadline();
        let mut last = None;
        for &addr in addrs {
            match self.connect_one(addr, until) {
                Ok(()) => {
                    debug!(peer = %addr, "connected");
                    return Ok(());
                }
                Err(err @ (StreamError::Interrupted | StreamError::Timeout)) => return Err(err),
                Err(err) => {
                    trace!(peer = %addr, error = %err, "connect attempt failed");
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or(StreamError::Logic("no addresses to connect")))
    }

    fn connect_one(&mut self, addr: SocketAddr, until: Instant) -> Result<(), StreamError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        self.shared
            .state
            .compare_exchange(State::Closed, State::Connecting)
            .map_err(|_| StreamError::Interrupted)?;
        match drive_connect(&self.shared, &socket, addr, until) {
            Ok(()) => self.install_connected(socket),
            Err(err) => {
                self.shared
                    .state
                    .compare_exchange(State::Connecting, State::Closed)
                    .map_err(|_| StreamError::Interrupted)?;
                Err(err)
            }
        }
    }

    fn install_connected(&mut self, socket: Socket) -> Result<(), StreamError> {
        let stream: TcpStream = socket.into();
        let fd = stream.as_raw_fd();
        if let Err(err) = self.shared.poller.add(fd, Event::none(POLL_KEY)) {
            let _ = self
                .shared
                .state
                .compare_exchange(State::Connecting, State::Closed);
            return Err(err.into());
        }
        let stream = Arc::new(stream);
        *self.shared.socket_slot() = Some(Arc::clone(&stream));
        if self
            .shared
            .state
            .compare_exchange(State::Connecting, State::Opened)
            .is_err()
        {
            let _ = self.shared.poller.delete(fd);
            *self.shared.socket_slot() = None;
            return Err(StreamError::Interrupted);
        }
        self.socket = Some(stream);
        Ok(())
    }

    /// Adopt an already-connected socket, e.g. from `TcpListener::accept`.
    /// The socket is switched to nonblocking mode.
    pub fn init_stream(&mut self, stream: TcpStream) -> Result<(), StreamError> {
        self.last_error = None;
        let result = self.init_stream_inner(stream);
        self.seal(result)
    }

    fn init_stream_inner(&mut self, stream: TcpStream) -> Result<(), StreamError> {
        stream.set_nonblocking(true)?;
        self.shared
            .state
            .compare_exchange(State::Closed, State::Opened)
            .map_err(|observed| match observed {
                State::Interrupting | State::Interrupted => StreamError::Interrupted,
                _ => StreamError::Logic("stream is already open"),
            })?;
        let fd = stream.as_raw_fd();
        if let Err(err) = self.shared.poller.add(fd, Event::none(POLL_KEY)) {
            let _ = self
                .shared
                .state
                .compare_exchange(State::Opened, State::Closed);
            return Err(err.into());
        }
        let stream = Arc::new(stream);
        *self.shared.socket_slot() = Some(Arc::clone(&stream));
        self.socket = Some(stream);
        Ok(())
    }

    /// Flush buffered output and shut the socket down for transfer in both
    /// directions. Buffered input stays readable.
    pub fn shutdown(&mut self) -> bool {
        self.last_error = None;
        let result = self.shutdown_inner();
        self.seal_bool(result)
    }

    fn shutdown_inner(&mut self) -> Result<(), StreamError> {
        self.shared.check_live()?;
        self.flush_output()?;
        let socket = self.require_socket()?;
        socket.shutdown(Shutdown::Both)?;
        self.shared
            .state
            .compare_exchange(State::Opened, State::Shutdowned)
            .map_err(|observed| match observed {
                State::Interrupting | State::Interrupted => StreamError::Interrupted,
                State::Shutdowned => StreamError::Logic("stream already shut down"),
                _ => StreamError::Logic("stream is not open"),
            })?;
        Ok(())
    }

    /// Release the socket and return to `Closed`, recovering from an
    /// interrupt if one happened. On an open TLS stream this attempts a
    /// close_notify exchange first; on a plain open stream it flushes
    /// buffered output. Idempotent; returns `false` only if the final
    /// flush or TLS shutdown failed.
    pub fn close(&mut self) -> bool {
        self.last_error = None;
        let mut ok = true;
        if self.shared.state.load() == State::Opened {
            let until = self.deadline();
            let result = if self.tls_active {
                self.stop_tls_inner(until)
            } else {
                self.flush_output()
            };
            if let Err(err) = result {
                warn!(error = %err, "flush during close failed");
                self.last_error = Some(err);
                ok = false;
            }
        }
        self.session = None;
        self.tls_active = false;
        if let Some(socket) = self.socket.take() {
            let _ = self.shared.poller.delete(socket.as_raw_fd());
            *self.shared.socket_slot() = None;
        }
        self.buffer.reset();
        self.shared.state.store(State::Closed);
        ok
    }

    /// Abort the current and all future operations. Shorthand for
    /// [`interrupter`](Self::interrupter)`().interrupt()`.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// A handle other threads can use to abort this stream's operations.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: Arc::clone(&self.shared),
        }
    }

    // ---- unbuffered transfer ---------------------------------------------

    /// Read at least one byte into `buf` within the deadline. `Ok(0)` means
    /// end of stream. A zero-length `buf` returns `Ok(0)` without touching
    /// the socket.
    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.last_error = None;
        if buf.is_empty() {
            return Ok(0);
        }
        let until = self.deadline();
        let result = if self.tls_active {
            self.tls_read(buf, until)
        } else {
            self.raw_read_some(buf, until)
        };
        self.seal(result)
    }

    /// Write at least one byte from `buf` within the deadline.
    pub fn write_some(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        self.last_error = None;
        if buf.is_empty() {
            return Ok(0);
        }
        let until = self.deadline();
        let result = if self.tls_active {
            self.tls_write(buf, until)
        } else {
            self.raw_write_some(buf, until)
        };
        self.seal(result)
    }

    fn raw_read_some(&self, buf: &mut [u8], until: Instant) -> Result<usize, StreamError> {
        let socket = self.require_socket()?;
        let fd = socket.as_raw_fd();
        let mut io: &TcpStream = socket;
        loop {
            self.shared.check_live()?;
            match io.read(buf) {
                Ok(0) => {
                    // Distinguish a true EOF from shutdown(2) by interrupt.
                    self.shared.check_live()?;
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.shared.wait_ready(fd, until, Wants::Readable)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.shared.check_live()?;
                    return Err(err.into());
                }
            }
        }
    }

    fn raw_write_some(&self, buf: &[u8], until: Instant) -> Result<usize, StreamError> {
        let socket = self.require_socket()?;
        let fd = socket.as_raw_fd();
        let mut io: &TcpStream = socket;
        loop {
            self.shared.check_live()?;
            match io.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.shared.wait_ready(fd, until, Wants::Writable)?;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.shared.check_live()?;
                    return Err(err.into());
                }
            }
        }
    }

    // ---- tls -------------------------------------------------------------

    /// Handshake using the retained session, e.g. after a previous
    /// [`stop_tls`](Self::stop_tls) or an explicit
    /// [`set_session`](Self::set_session). Fails with a logic error when no
    /// session is installed.
    pub fn start_tls(&mut self) -> bool {
        self.last_error = None;
        let until = self.deadline();
        let result = self.start_tls_retained(until);
        self.seal_bool(result)
    }

    fn start_tls_retained(&mut self, until: Instant) -> Result<(), StreamError> {
        self.require_open()?;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        session.ensure_fresh().map_err(StreamError::Tls)?;
        self.flush_output()?;
        self.run_handshake(until)
    }

    /// Client-side handshake with `config`, verifying the peer by its IP
    /// address. Use [`start_tls_with_name`](Self::start_tls_with_name) when
    /// the certificate carries a DNS name.
    pub fn start_tls_with(&mut self, config: Arc<ClientConfig>) -> bool {
        self.last_error = None;
        let until = self.deadline();
        let result = self.start_tls_with_inner(config, until);
        self.seal_bool(result)
    }

    fn start_tls_with_inner(
        &mut self,
        config: Arc<ClientConfig>,
        until: Instant,
    ) -> Result<(), StreamError> {
        self.require_open()?;
        let peer = self.require_socket()?.peer_addr().map_err(StreamError::from)?;
        let name = ServerName::IpAddress(peer.ip().into());
        self.install_client(config, name, until)
    }

    /// Client-side handshake with `config`, sending `name` as SNI and
    /// verifying the certificate against it.
    pub fn start_tls_with_name(&mut self, config: Arc<ClientConfig>, name: &str) -> bool {
        self.last_error = None;
        let until = self.deadline();
        let result = self.start_tls_with_name_inner(config, name, until);
        self.seal_bool(result)
    }

    fn start_tls_with_name_inner(
        &mut self,
        config: Arc<ClientConfig>,
        name: &str,
        until: Instant,
    ) -> Result<(), StreamError> {
        self.require_open()?;
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| StreamError::Tls(TlsError::InvalidDnsName(name.to_string())))?;
        self.install_client(config, server_name, until)
    }

    /// Re-handshake the retained client session under a different SNI.
    pub fn start_tls_server_name(&mut self, name: &str) -> bool {
        self.last_error = None;
        let until = self.deadline();
        let result = self.start_tls_server_name_inner(name, until);
        self.seal_bool(result)
    }

    fn start_tls_server_name_inner(
        &mut self,
        name: &str,
        until: Instant,
    ) -> Result<(), StreamError> {
        self.require_open()?;
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| StreamError::Tls(TlsError::InvalidDnsName(name.to_string())))?;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        session.rebind_client(server_name).map_err(StreamError::Tls)?;
        self.flush_output()?;
        self.run_handshake(until)
    }

    /// Server-side handshake with `config`.
    pub fn accept_tls(&mut self, config: Arc<ServerConfig>) -> bool {
        self.last_error = None;
        let until = self.deadline();
        let result = self.accept_tls_inner(config, until);
        self.seal_bool(result)
    }

    fn accept_tls_inner(
        &mut self,
        config: Arc<ServerConfig>,
        until: Instant,
    ) -> Result<(), StreamError> {
        self.require_open()?;
        self.flush_output()?;
        self.session = Some(TlsSession::server(config).map_err(StreamError::Tls)?);
        self.run_handshake(until)
    }

    fn install_client(
        &mut self,
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
        until: Instant,
    ) -> Result<(), StreamError> {
        self.flush_output()?;
        self.session = Some(TlsSession::client(config, name).map_err(StreamError::Tls)?);
        self.run_handshake(until)
    }

    fn run_handshake(&mut self, until: Instant) -> Result<(), StreamError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(StreamError::Logic("stream is not open"))?;
        let fd = socket.as_raw_fd();
        let io: &TcpStream = socket;
        let shared = &self.shared;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        match session.handshake(io, &mut |wants| shared.wait_ready(fd, until, wants)) {
            Ok(()) => {
                debug!("tls handshake complete");
                self.tls_active = true;
                Ok(())
            }
            Err(StreamError::UnexpectedEof) => {
                shared.check_live()?;
                Err(StreamError::UnexpectedEof)
            }
            Err(err) => Err(err),
        }
    }

    /// Leave TLS and return to plaintext, exchanging close_notify with the
    /// peer within the deadline. The session is retained so
    /// [`start_tls`](Self::start_tls) can re-handshake later. Returns `true`
    /// when TLS was not active.
    pub fn stop_tls(&mut self) -> bool {
        self.last_error = None;
        if !self.tls_active {
            return true;
        }
        let until = self.deadline();
        let result = self.stop_tls_inner(until);
        self.seal_bool(result)
    }

    fn stop_tls_inner(&mut self, until: Instant) -> Result<(), StreamError> {
        if !self.tls_active {
            return Ok(());
        }
        self.flush_output()?;
        let socket = self
            .socket
            .as_ref()
            .ok_or(StreamError::Logic("stream is not open"))?;
        let fd = socket.as_raw_fd();
        let io: &TcpStream = socket;
        let shared = &self.shared;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        let result = session.shutdown(io, &mut |wants| shared.wait_ready(fd, until, wants));
        // Plaintext transfer resumes either way; the session stays for reuse.
        self.tls_active = false;
        result
    }

    fn tls_read(&mut self, buf: &mut [u8], until: Instant) -> Result<usize, StreamError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(StreamError::Logic("stream is not open"))?;
        let fd = socket.as_raw_fd();
        let io: &TcpStream = socket;
        let shared = &self.shared;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        let n = session.read_some(io, buf, &mut |wants| shared.wait_ready(fd, until, wants))?;
        if n == 0 {
            shared.check_live()?;
        }
        Ok(n)
    }

    fn tls_write(&mut self, buf: &[u8], until: Instant) -> Result<usize, StreamError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(StreamError::Logic("stream is not open"))?;
        let fd = socket.as_raw_fd();
        let io: &TcpStream = socket;
        let shared = &self.shared;
        let session = self
            .session
            .as_mut()
            .ok_or(StreamError::Logic("no TLS session installed"))?;
        session.write_some(io, buf, &mut |wants| shared.wait_ready(fd, until, wants))
    }

    /// Install a prepared session for a later [`start_tls`](Self::start_tls).
    pub fn set_session(&mut self, session: TlsSession) -> Result<(), StreamError> {
        if self.tls_active {
            return Err(StreamError::Logic("TLS is active"));
        }
        self.session = Some(session);
        Ok(())
    }

    /// Drop the retained session. Fails while TLS is active.
    pub fn free_session(&mut self) -> Result<(), StreamError> {
        if self.tls_active {
            return Err(StreamError::Logic("TLS is active"));
        }
        self.session = None;
        Ok(())
    }

    /// The retained session, if any.
    pub fn session(&self) -> Option<&TlsSession> {
        self.session.as_ref()
    }

    /// Whether transfer currently goes through TLS.
    pub fn tls_started(&self) -> bool {
        self.tls_active
    }

    // ---- buffered helpers ------------------------------------------------

    fn fill_input(&mut self) -> Result<(), StreamError> {
        // Output is flushed before a refill so a buffered request cannot
        // deadlock against the response it is waiting for.
        self.flush_output()?;
        let mut buffer = mem::replace(&mut self.buffer, SplitBuffer::placeholder());
        let result = self.read_some(buffer.input_slot());
        if let Ok(n) = &result {
            buffer.commit_input(*n);
        }
        self.buffer = buffer;
        result.map(|_| ())
    }

    fn flush_output(&mut self) -> Result<(), StreamError> {
        if !self.buffer.has_output() {
            return Ok(());
        }
        let mut buffer = mem::replace(&mut self.buffer, SplitBuffer::placeholder());
        let mut result = Ok(());
        while buffer.has_output() {
            match self.write_some(buffer.pending_output()) {
                Ok(0) => {
                    result = Err(StreamError::from(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    )));
                    break;
                }
                Ok(n) => buffer.consume_output(n),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.buffer = buffer;
        result
    }

    /// Bytes readable without blocking: buffered input plus, on a plaintext
    /// stream, whatever `MSG_PEEK` reports. Under TLS only buffered input
    /// counts.
    pub fn available(&self) -> usize {
        let buffered = self.buffer.available();
        if buffered > 0 || self.tls_active {
            return buffered;
        }
        let Some(socket) = self.socket.as_ref() else {
            return 0;
        };
        let mut probe = [0u8; 512];
        socket.peek(&mut probe).unwrap_or(0)
    }

    /// Replace the buffer. Fails while either half holds pending data.
    pub fn set_buffer_size(&mut self, size: usize) -> Result<(), StreamError> {
        if self.buffer.available() > 0 || self.buffer.has_output() {
            return Err(StreamError::Logic("buffer has pending data"));
        }
        self.buffer = SplitBuffer::new(size);
        Ok(())
    }

    /// Total buffer capacity in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer.capacity()
    }

    // ---- accessors -------------------------------------------------------

    /// The raw socket fd, or -1 when no socket is held.
    pub fn handle(&self) -> RawFd {
        self.socket.as_ref().map_or(-1, |s| s.as_raw_fd())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.shared.state.load()
    }

    /// Whether a socket is established (`Opened` or `Shutdowned`).
    pub fn is_open(&self) -> bool {
        matches!(self.shared.state.load(), State::Opened | State::Shutdowned)
    }

    /// Open and without a recorded error.
    pub fn is_valid(&self) -> bool {
        self.is_open() && self.last_error.is_none()
    }

    /// The error recorded by the most recent operation, if it failed.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    /// Per-operation timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the per-operation timeout, returning the previous value.
    pub fn set_timeout(&mut self, timeout: Duration) -> Duration {
        mem::replace(&mut self.timeout, timeout)
    }

    /// Remote address of the connected socket.
    pub fn peer_addr(&self) -> Result<SocketAddr, StreamError> {
        Ok(self.require_socket()?.peer_addr()?)
    }

    /// Local address of the connected socket.
    pub fn local_addr(&self) -> Result<SocketAddr, StreamError> {
        Ok(self.require_socket()?.local_addr()?)
    }

    /// Remote address formatted as `ip:port`.
    pub fn peer_endpoint(&self) -> Result<String, StreamError> {
        Ok(self.peer_addr()?.to_string())
    }

    /// Local address formatted as `ip:port`.
    pub fn sock_endpoint(&self) -> Result<String, StreamError> {
        Ok(self.local_addr()?.to_string())
    }

    /// Remote address formatted without the port.
    pub fn peer_address(&self) -> Result<String, StreamError> {
        Ok(self.peer_addr()?.ip().to_string())
    }

    /// Local address formatted without the port.
    pub fn sock_address(&self) -> Result<String, StreamError> {
        Ok(self.local_addr()?.ip().to_string())
    }

    /// Remote address split into host and port.
    pub fn peer_name(&self) -> Result<(String, u16), StreamError> {
        let addr = self.peer_addr()?;
        Ok((addr.ip().to_string(), addr.port()))
    }

    /// Local address split into host and port.
    pub fn sock_name(&self) -> Result<(String, u16), StreamError> {
        let addr = self.local_addr()?;
        Ok((addr.ip().to_string(), addr.port()))
    }

    // ---- internals -------------------------------------------------------

    fn require_socket(&self) -> Result<&Arc<TcpStream>, StreamError> {
        match self.shared.state.load() {
            State::Opened | State::Shutdowned => {}
            State::Interrupting | State::Interrupted => return Err(StreamError::Interrupted),
            _ => return Err(StreamError::Logic("stream is not open")),
        }
        self.socket
            .as_ref()
            .ok_or(StreamError::Logic("stream is not open"))
    }

    fn require_open(&self) -> Result<(), StreamError> {
        match self.shared.state.load() {
            State::Opened => Ok(()),
            State::Interrupting | State::Interrupted => Err(StreamError::Interrupted),
            _ => Err(StreamError::Logic("stream is not open")),
        }
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    fn seal<T>(&mut self, result: Result<T, StreamError>) -> Result<T, StreamError> {
        if let Err(err) = &result {
            self.last_error = Some(err.clone());
        }
        result
    }

    fn seal_bool(&mut self, result: Result<(), StreamError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                self.last_error = Some(err);
                false
            }
        }
    }
}

fn connect_in_progress(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EINPROGRESS)
        || matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        )
}

fn drive_connect(
    shared: &Shared,
    socket: &Socket,
    addr: SocketAddr,
    until: Instant,
) -> Result<(), StreamError> {
    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => return Ok(()),
        Err(err) if connect_in_progress(&err) => {}
        Err(err) => return Err(StreamError::connect_failed(err)),
    }
    let fd = socket.as_raw_fd();
    shared.poller.add(fd, Event::writable(POLL_KEY))?;
    let result = wait_connected(shared, socket, fd, until);
    let _ = shared.poller.delete(fd);
    result
}

fn wait_connected(
    shared: &Shared,
    socket: &Socket,
    fd: RawFd,
    until: Instant,
) -> Result<(), StreamError> {
    let mut events = Vec::with_capacity(1);
    loop {
        shared.check_live()?;
        let budget = until
            .checked_duration_since(Instant::now())
            .ok_or(StreamError::Timeout)?;
        events.clear();
        match shared.poller.wait(&mut events, Some(budget)) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
        shared.check_live()?;
        if events.iter().any(|ev| ev.key == POLL_KEY) {
            // Writability after a pending connect means completion; SO_ERROR
            // carries the verdict.
            return match socket.take_error()? {
                None => Ok(()),
                Some(err) => Err(StreamError::connect_failed(err)),
            };
        }
        shared.poller.modify(fd, Event::writable(POLL_KEY))?;
    }
}

impl Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffer.available() == 0 {
            self.fill_input().map_err(io::Error::from)?;
        }
        if self.buffer.available() == 0 {
            return Ok(0);
        }
        Ok(self.buffer.take(buf))
    }
}

impl Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffer.output_space() == 0 {
            self.flush_output().map_err(io::Error::from)?;
        }
        Ok(self.buffer.push_output(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_output().map_err(io::Error::from)
    }
}

impl Drop for SocketStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for SocketStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketStream")
            .field("state", &self.shared.state.load())
            .field("fd", &self.handle())
            .field("tls_active", &self.tls_active)
            .field("timeout", &self.timeout)
            .finish()
    }
}
