//! # Peer Transport
//!
//! A single TCP connection with independent connect, send and receive
//! deadlines. Sockets are non-blocking and driven by a private `mio::Poll`, so
//! a deadline is enforced by the readiness wait itself rather than by socket
//! timeout options.
//!
//! ## Framing
//!
//! Peer wire messages are length-prefixed:
//!
//! ```text
//! <length: u32 big-endian><length bytes>
//! ```
//!
//! [`Transport::receive_frame`] reads the prefix and then exactly that many
//! bytes. A zero-length frame (keep-alive) yields an empty buffer.
//!
//! ## Descriptor Lifetime
//!
//! The transport owns its socket. Every failing operation closes it before the
//! error is returned, `close` may be called any number of times, and dropping
//! the transport closes it as well.

use crate::config::Config;
use crate::error::{Error, Result};

use byteorder::{BigEndian, ByteOrder};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

const STREAM: Token = Token(0);

// Length prefix of a framed message
const FRAME_PREFIX_LEN: usize = 4;

// Largest frame accepted from a peer: a 16 KiB block plus headers is far
// below this, bitfields of very large torrents still fit
const FRAME_LEN_MAX: usize = 1 << 20;

/// Byte stream to a single peer.
///
/// Implemented by [`TcpTransport`]; peer sessions are generic over it so they
/// can be driven by scripted transports in tests.
pub trait Transport {
    /// Open the connection, replacing any previous one.
    fn connect(&mut self) -> Result<()>;

    /// Write the whole buffer.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes.
    fn receive(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Read one length-prefixed frame and return its body.
    fn receive_frame(&mut self) -> Result<Vec<u8>> {
        let prefix = self.receive(FRAME_PREFIX_LEN)?;
        let len = BigEndian::read_u32(&prefix) as usize;

        if len > FRAME_LEN_MAX {
            self.close();
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds limit",
                len
            )));
        }

        self.receive(len)
    }
}

/// Non-blocking TCP connection with per-operation deadlines.
pub struct TcpTransport {
    /// Remote peer address
    addr: SocketAddr,
    /// Deadline for establishing the connection
    connect_timeout: Duration,
    /// Deadline for each receive
    read_timeout: Duration,
    /// Deadline for each send
    send_timeout: Duration,
    /// Open connection, if any
    conn: Option<Connection>,
}

struct Connection {
    stream: TcpStream,
    poll: Poll,
    events: Events,
}

impl Connection {
    /// Block until the socket may be ready again or the deadline passes.
    ///
    /// Returning `Ok` does not guarantee readiness: callers retry their
    /// operation and come back here on `WouldBlock`.
    fn wait(&mut self, deadline: Instant, operation: &'static str) -> Result<()> {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Timeout(operation));
        }

        match self.poll.poll(&mut self.events, Some(deadline - now)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(Error::Connection(format!("poll failed: {}", e))),
        }
    }

    fn write_all(&mut self, data: &[u8], deadline: Instant) -> Result<()> {
        let mut sent = 0;

        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.wait(deadline, "send")?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Connection(format!("send failed: {}", e))),
            }
        }

        Ok(())
    }

    fn read_exact(&mut self, len: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        let mut received = 0;

        while received < len {
            match self.stream.read(&mut buf[received..]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait(deadline, "receive")?
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Connection(format!("receive failed: {}", e))),
            }
        }

        Ok(buf)
    }
}

impl TcpTransport {
    /// Build an unconnected transport to `addr` using the configured deadlines.
    pub fn new(addr: SocketAddr, config: &Config) -> Self {
        TcpTransport {
            addr,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            send_timeout: config.send_timeout,
            conn: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn open(&self, deadline: Instant) -> Result<Connection> {
        let refused = |e: io::Error| Error::Connection(format!("could not connect to {}: {}", self.addr, e));

        let mut stream = TcpStream::connect(self.addr).map_err(refused)?;
        let poll = Poll::new().map_err(refused)?;
        poll.registry()
            .register(&mut stream, STREAM, Interest::READABLE | Interest::WRITABLE)
            .map_err(refused)?;

        let mut conn = Connection {
            stream,
            poll,
            events: Events::with_capacity(4),
        };

        // A non-blocking connect is done once the socket turns writable and
        // reports a peer address
        loop {
            match conn.wait(deadline, "connect") {
                Ok(()) => {}
                Err(Error::Timeout(_)) => {
                    return Err(Error::Connection(format!(
                        "could not connect to {} within {:?}",
                        self.addr, self.connect_timeout
                    )))
                }
                Err(e) => return Err(e),
            }

            if let Some(e) = conn.stream.take_error().map_err(refused)? {
                return Err(refused(e));
            }

            match conn.stream.peer_addr() {
                Ok(_) => return Ok(conn),
                Err(e) if e.kind() == io::ErrorKind::NotConnected => continue,
                Err(e) => return Err(refused(e)),
            }
        }
    }

    fn not_connected(&self) -> Error {
        Error::Connection(format!("not connected to {}", self.addr))
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<()> {
        self.close();

        let deadline = Instant::now() + self.connect_timeout;
        let conn = self.open(deadline)?;
        self.conn = Some(conn);

        debug!("Connected to {}", self.addr);

        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.send_timeout;
        let result = match self.conn.as_mut() {
            Some(conn) => conn.write_all(data, deadline),
            None => Err(self.not_connected()),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    fn receive(&mut self, len: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;
        let result = match self.conn.as_mut() {
            Some(conn) => conn.read_exact(len, deadline),
            None => Err(self.not_connected()),
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.poll.registry().deregister(&mut conn.stream);
            let _ = conn.stream.shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.addr);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
