//! Publish/subscribe transport seam.
//!
//! The emitter only needs four things from a message bus: create a
//! publisher socket, bind it once, publish whole messages, shut it down.

pub mod memory;
pub mod sp;

pub use memory::{MemorySocket, MemoryTransport};
pub use sp::{SpPubSocket, SpTransport};

use std::fmt;
use std::io;
use std::str::FromStr;

/// A publisher socket. Each `send` is one atomic message.
pub trait PubSocket {
    /// Bind the socket to a local endpoint
    fn bind(&mut self, endpoint: &Endpoint) -> io::Result<()>;

    /// Publish one message, returning the number of bytes accepted
    fn send(&mut self, message: &[u8]) -> io::Result<usize>;

    /// Release the socket and drop every subscriber
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Creates publisher sockets
pub trait Transport {
    type Socket: PubSocket;

    fn socket(&self) -> io::Result<Self::Socket>;
}

/// A `tcp://host:port` address. `*` as host means every interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Listen on every interface
    pub fn any(port: u16) -> Self {
        Self {
            host: "*".to_string(),
            port,
        }
    }

    /// Address suitable for `TcpListener::bind`
    pub fn socket_addr(&self) -> String {
        let host = if self.host == "*" {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        format!("{}:{}", host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid endpoint \"{}\"", s),
            )
        };

        let address = s.strip_prefix("tcp://").ok_or_else(invalid)?;
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}
