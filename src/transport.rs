//! Byte-stream transports to the engine: TCP or a Unix domain socket.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::info;

/// Where the engine listens.
///
/// Accepted forms: `tcp://host:port`, `host:port`, `unix:///path/to.sock`, `/path/to.sock`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Tcp("127.0.0.1:8080".to_string())
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if let Some(addr) = s.strip_prefix("tcp://") {
            Self::tcp(addr)
        } else if let Some(path) = s.strip_prefix("unix://") {
            Ok(Endpoint::Unix(PathBuf::from(path)))
        } else if s.starts_with('/') {
            Ok(Endpoint::Unix(PathBuf::from(s)))
        } else {
            Self::tcp(s)
        }
    }
}

impl Endpoint {
    fn tcp(addr: &str) -> anyhow::Result<Self> {
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(anyhow!("invalid TCP endpoint '{addr}', expected host:port")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A reliable byte stream whose reads can be bounded by a deadline.
///
/// An expired deadline must surface as a read error of kind
/// [`io::ErrorKind::WouldBlock`] or [`io::ErrorKind::TimedOut`].
pub trait Transport: Read + Write {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close both directions. The peer reads EOF even while this value is alive.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl Transport for UnixStream {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// An open connection to an [`Endpoint`].
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Connection {
    /// Dial `endpoint`, trying each resolved TCP address in turn.
    pub fn open(endpoint: &Endpoint, connect_timeout: Duration) -> io::Result<Self> {
        let conn = match endpoint {
            Endpoint::Tcp(addr) => {
                let mut last_err = None;
                let mut stream = None;
                for sock_addr in addr.to_socket_addrs()? {
                    match connect_tcp(sock_addr, connect_timeout) {
                        Ok(s) => {
                            stream = Some(s);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match stream {
                    Some(s) => Connection::Tcp(s),
                    None => {
                        return Err(last_err.unwrap_or_else(|| {
                            io::Error::new(io::ErrorKind::NotFound, format!("'{addr}' resolved to no addresses"))
                        }))
                    }
                }
            }
            Endpoint::Unix(path) => Connection::Unix(UnixStream::connect(path)?),
        };
        info!(%endpoint, "connected to execution engine");
        Ok(conn)
    }
}

fn connect_tcp(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    // Every frame is a small request/response; batching only adds latency.
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.read(buf),
            Connection::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Connection::Tcp(s) => s.write(buf),
            Connection::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.flush(),
            Connection::Unix(s) => s.flush(),
        }
    }
}

impl Transport for Connection {
    fn set_read_deadline(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => s.set_read_timeout(timeout),
            Connection::Unix(s) => s.set_read_timeout(timeout),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Connection::Tcp(s) => TcpStream::shutdown(s, Shutdown::Both),
            Connection::Unix(s) => UnixStream::shutdown(s, Shutdown::Both),
        }
    }
}

/// Reader that bounds a whole frame by one deadline.
///
/// Before every read the socket timeout is narrowed to what is left, so an
/// engine dribbling bytes cannot stretch a frame past `timeout`.
pub(crate) struct FrameDeadline<'a, T> {
    transport: &'a mut T,
    expires: Option<Instant>,
}

impl<'a, T: Transport> FrameDeadline<'a, T> {
    pub(crate) fn new(transport: &'a mut T, timeout: Option<Duration>) -> Self {
        let expires = timeout.and_then(|t| Instant::now().checked_add(t));
        Self { transport, expires }
    }
}

impl<T: Transport> Read for FrameDeadline<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(expires) = self.expires {
            let remaining = expires.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "frame deadline expired"));
            }
            self.transport.set_read_deadline(Some(remaining))?;
        }
        self.transport.read(buf)
    }
}

/// Whether a read error means the deadline expired.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
