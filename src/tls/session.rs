//! TLS session driven over a nonblocking socket.
//!
//! The session owns a rustls connection plus the parameters it was built
//! from. rustls connections are single-use, so leaving TLS and entering it
//! again on the same stream rebuilds the connection from the retained
//! parameters; session resumption, if configured, comes from the config's
//! session cache.
//!
//! All record pumping is deadline- and interrupt-aware through the `wait`
//! callback supplied by the stream: the callback blocks until the socket is
//! ready in the wanted direction or fails with the stream's timeout or
//! interrupt error.

use crate::error::StreamError;
use crate::net::Wants;
use crate::tls::TlsError;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::trace;

type WaitFn<'a> = &'a mut dyn FnMut(Wants) -> Result<(), StreamError>;

enum TlsConn {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl TlsConn {
    fn wants_read(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_read(),
            Self::Server(s) => s.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_write(),
            Self::Server(s) => s.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Self::Client(c) => c.is_handshaking(),
            Self::Server(s) => s.is_handshaking(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Self::Client(c) => c.reader(),
            Self::Server(s) => s.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Self::Client(c) => c.writer(),
            Self::Server(s) => s.writer(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.read_tls(rd),
            Self::Server(s) => s.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.write_tls(wr),
            Self::Server(s) => s.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            Self::Client(c) => c.process_new_packets(),
            Self::Server(s) => s.process_new_packets(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Self::Client(c) => c.send_close_notify(),
            Self::Server(s) => s.send_close_notify(),
        }
    }

    fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        match self {
            Self::Client(c) => c.protocol_version(),
            Self::Server(s) => s.protocol_version(),
        }
    }

    fn alpn_protocol(&self) -> Option<&[u8]> {
        match self {
            Self::Client(c) => c.alpn_protocol(),
            Self::Server(s) => s.alpn_protocol(),
        }
    }
}

enum RestartParams {
    Client {
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
    },
    Server {
        config: Arc<ServerConfig>,
    },
}

/// A client or server TLS session bound to one stream.
pub struct TlsSession {
    conn: TlsConn,
    restart: RestartParams,
    used: bool,
}

impl TlsSession {
    /// Build a client session that will verify the peer against `name`.
    pub fn client(config: Arc<ClientConfig>, name: ServerName<'static>) -> Result<Self, TlsError> {
        let conn = ClientConnection::new(Arc::clone(&config), name.clone())?;
        Ok(Self {
            conn: TlsConn::Client(conn),
            restart: RestartParams::Client { config, name },
            used: false,
        })
    }

    /// Build a server session.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(Arc::clone(&config))?;
        Ok(Self {
            conn: TlsConn::Server(conn),
            restart: RestartParams::Server { config },
            used: false,
        })
    }

    /// Whether this is the client side of the connection.
    pub fn is_client(&self) -> bool {
        matches!(self.conn, TlsConn::Client(_))
    }

    /// Negotiated protocol version, once the handshake is done.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Negotiated ALPN protocol, if any.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.alpn_protocol()
    }

    /// Rebuild the connection from the retained parameters if this session
    /// has already been through a handshake.
    pub(crate) fn ensure_fresh(&mut self) -> Result<(), TlsError> {
        if !self.used {
            return Ok(());
        }
        self.conn = match &self.restart {
            RestartParams::Client { config, name } => {
                TlsConn::Client(ClientConnection::new(Arc::clone(config), name.clone())?)
            }
            RestartParams::Server { config } => {
                TlsConn::Server(ServerConnection::new(Arc::clone(config))?)
            }
        };
        self.used = false;
        Ok(())
    }

    /// Rebuild the client connection under a new server name.
    pub(crate) fn rebind_client(&mut self, name: ServerName<'static>) -> Result<(), TlsError> {
        let RestartParams::Client { config, name: slot } = &mut self.restart else {
            return Err(TlsError::NotClient);
        };
        *slot = name;
        self.conn = TlsConn::Client(ClientConnection::new(Arc::clone(config), slot.clone())?);
        self.used = false;
        Ok(())
    }

    /// Drive the handshake to completion.
    pub(crate) fn handshake(&mut self, io: &TcpStream, wait: WaitFn<'_>) -> Result<(), StreamError> {
        self.used = true;
        loop {
            while self.conn.wants_write() {
                self.write_records(io, wait)?;
            }
            if !self.conn.is_handshaking() {
                trace!(version = ?self.conn.protocol_version(), "handshake done");
                return Ok(());
            }
            if self.conn.wants_read() {
                let n = self.read_records(io, wait, true)?;
                if n == 0 {
                    return Err(StreamError::UnexpectedEof);
                }
            }
        }
    }

    /// Read decrypted data. `Ok(0)` means the peer ended the connection,
    /// with or without close_notify.
    pub(crate) fn read_some(
        &mut self,
        io: &TcpStream,
        buf: &mut [u8],
        wait: WaitFn<'_>,
    ) -> Result<usize, StreamError> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let n = self.read_records(io, wait, false)?;
                    if n == 0 {
                        return Ok(0);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Encrypt `buf` and push the records out to the socket.
    pub(crate) fn write_some(
        &mut self,
        io: &TcpStream,
        buf: &[u8],
        wait: WaitFn<'_>,
    ) -> Result<usize, StreamError> {
        let n = self.conn.writer().write(buf).map_err(StreamError::from)?;
        while self.conn.wants_write() {
            self.write_records(io, wait)?;
        }
        Ok(n)
    }

    /// Exchange close_notify with the peer. Plaintext transfer may resume
    /// on the socket afterwards.
    pub(crate) fn shutdown(&mut self, io: &TcpStream, wait: WaitFn<'_>) -> Result<(), StreamError> {
        self.conn.send_close_notify();
        while self.conn.wants_write() {
            self.write_records(io, wait)?;
        }
        let mut scratch = [0u8; 512];
        loop {
            match self.conn.reader().read(&mut scratch) {
                Ok(0) => return Ok(()),
                // Application data racing the close is discarded.
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    let n = self.read_records(io, wait, false)?;
                    if n == 0 {
                        return Ok(());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn read_records(
        &mut self,
        io: &TcpStream,
        wait: WaitFn<'_>,
        handshaking: bool,
    ) -> Result<usize, StreamError> {
        loop {
            let mut src: &TcpStream = io;
            match self.conn.read_tls(&mut src) {
                Ok(n) => {
                    if n > 0 {
                        self.conn.process_new_packets().map_err(|err| {
                            StreamError::Tls(if handshaking {
                                TlsError::HandshakeFailed(err)
                            } else {
                                TlsError::Rustls(err)
                            })
                        })?;
                    }
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => wait(Wants::Readable)?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn write_records(&mut self, io: &TcpStream, wait: WaitFn<'_>) -> Result<(), StreamError> {
        loop {
            let mut dst: &TcpStream = io;
            match self.conn.write_tls(&mut dst) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => wait(Wants::Writable)?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("client", &self.is_client())
            .field("handshaking", &self.conn.is_handshaking())
            .field("used", &self.used)
            .finish()
    }
}
