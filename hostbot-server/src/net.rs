// net.rs -- non-blocking socket wrappers (spec.md ss2 Socket layer).
// Converted from: myq2-original/qcommon/net.c's non-blocking UDP/TCP
// handling, generalized from select()-style fd sets to mio's edge-triggered
// Poll/Token/Interest model: each wrapper owns its registration and a
// byte-oriented read/write buffer, matching the original's "drain whatever
// is ready, queue whatever is pending" shape rather than one blocking call
// per packet.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Poll, Token};

pub const RECV_CHUNK: usize = 4096;
pub const MAX_DATAGRAM: usize = 2048;

/// A listening TCP socket, registered for new-connection readiness.
#[derive(Debug)]
pub struct TcpListenerSocket {
    pub listener: TcpListener,
    pub token: Token,
}

impl TcpListenerSocket {
    pub fn bind(addr: SocketAddr, poll: &Poll, token: Token) -> io::Result<Self> {
        let mut listener = TcpListener::bind(addr)?;
        poll.registry().register(&mut listener, token, Interest::READABLE)?;
        Ok(TcpListenerSocket { listener, token })
    }

    /// Drain every connection ready to accept this tick.
    pub fn accept_all(&mut self) -> Vec<(TcpStream, SocketAddr)> {
        let mut out = Vec::new();
        loop {
            match self.listener.accept() {
                Ok(pair) => out.push(pair),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        out
    }
}

/// A TCP stream (accepted or outbound) with byte-oriented read/write buffers
/// (spec.md ss2: "byte-oriented buffers, readiness sets, and timeouts").
#[derive(Debug)]
pub struct TcpConnection {
    pub stream: TcpStream,
    pub token: Token,
    pub read_buf: Vec<u8>,
    write_buf: VecDeque<u8>,
    pub established_at: Instant,
}

impl TcpConnection {
    fn new(stream: TcpStream, token: Token, now: Instant) -> Self {
        TcpConnection {
            stream,
            token,
            read_buf: Vec::new(),
            write_buf: VecDeque::new(),
            established_at: now,
        }
    }

    /// Wrap and register a freshly accepted stream.
    pub fn from_accepted(stream: TcpStream, token: Token, poll: &Poll, now: Instant) -> io::Result<Self> {
        let mut conn = TcpConnection::new(stream, token, now);
        poll.registry().register(&mut conn.stream, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(conn)
    }

    /// Start a non-blocking outbound connect; completion is signalled by a
    /// WRITABLE readiness event, mirroring the original's non-blocking
    /// connect-then-poll pattern.
    pub fn connect(addr: SocketAddr, token: Token, poll: &Poll, now: Instant) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        poll.registry().register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(TcpConnection::new(stream, token, now))
    }

    pub fn deregister(&mut self, poll: &Poll) {
        let _ = poll.registry().deregister(&mut self.stream);
    }

    /// Read whatever is available into `read_buf`. `Ok(false)` means the
    /// peer closed the connection gracefully.
    pub fn fill_read_buffer(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; RECV_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn queue_write(&mut self, bytes: &[u8]) {
        self.write_buf.extend(bytes.iter().copied());
    }

    pub fn has_pending_write(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Flush as much of the write buffer as the socket accepts right now.
    pub fn flush_write(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            let (first, _) = self.write_buf.as_slices();
            match self.stream.write(first) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// A non-blocking UDP socket, used for both the LAN discovery bus and (when
/// tunnelled through GProxy) action relay (spec.md ss4.3).
#[derive(Debug)]
pub struct UdpSocketWrapper {
    pub socket: UdpSocket,
    pub token: Token,
}

impl UdpSocketWrapper {
    pub fn bind(addr: SocketAddr, poll: &Poll, token: Token) -> io::Result<Self> {
        let mut socket = UdpSocket::bind(addr)?;
        poll.registry().register(&mut socket, token, Interest::READABLE)?;
        Ok(UdpSocketWrapper { socket, token })
    }

    /// Drain every datagram currently queued.
    pub fn recv_all(&mut self) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut out = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, src)) => out.push((buf[..n].to_vec(), src)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        out
    }

    pub fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(bytes, dest)
    }
}
