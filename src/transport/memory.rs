use super::{Endpoint, PubSocket, Transport};
use crossbeam::channel::{self, Receiver, Sender};
use log::debug;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters shared between a `MemoryTransport` and its sockets
#[derive(Debug, Default)]
pub struct MemoryStats {
    sockets: AtomicUsize,
    binds: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MemoryStats {
    pub fn sockets(&self) -> usize {
        self.sockets.load(Ordering::SeqCst)
    }

    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    socket: bool,
    bind: bool,
    send: bool,
    short_send: usize,
}

/// In-process transport: every published message lands on a channel.
///
/// Faults can be switched on to exercise the failure paths of a publisher.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    sender: Sender<Vec<u8>>,
    faults: Faults,
    stats: Arc<MemoryStats>,
}

impl MemoryTransport {
    /// Create a transport and the receiving end of its message channel
    pub fn new() -> (Self, Receiver<Vec<u8>>) {
        let (sender, receiver) = channel::unbounded();
        let transport = Self {
            sender,
            faults: Faults::default(),
            stats: Arc::new(MemoryStats::default()),
        };
        (transport, receiver)
    }

    /// Socket creation fails
    pub fn failing_socket(mut self) -> Self {
        self.faults.socket = true;
        self
    }

    /// Binding fails
    pub fn failing_bind(mut self) -> Self {
        self.faults.bind = true;
        self
    }

    /// Every send fails
    pub fn failing_send(mut self) -> Self {
        self.faults.send = true;
        self
    }

    /// Every send reports `missing` fewer bytes than the message length
    pub fn short_send(mut self, missing: usize) -> Self {
        self.faults.short_send = missing;
        self
    }

    pub fn stats(&self) -> Arc<MemoryStats> {
        Arc::clone(&self.stats)
    }
}

impl Transport for MemoryTransport {
    type Socket = MemorySocket;

    fn socket(&self) -> io::Result<MemorySocket> {
        if self.faults.socket {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "memory transport: socket creation disabled",
            ));
        }
        self.stats.sockets.fetch_add(1, Ordering::SeqCst);

        Ok(MemorySocket {
            sender: Some(self.sender.clone()),
            endpoint: None,
            faults: self.faults,
            stats: Arc::clone(&self.stats),
        })
    }
}

/// Socket half of `MemoryTransport`
#[derive(Debug)]
pub struct MemorySocket {
    sender: Option<Sender<Vec<u8>>>,
    endpoint: Option<Endpoint>,
    faults: Faults,
    stats: Arc<MemoryStats>,
}

impl MemorySocket {
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }
}

impl PubSocket for MemorySocket {
    fn bind(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        if self.faults.bind {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("memory transport: cannot bind {}", endpoint),
            ));
        }
        self.stats.binds.fetch_add(1, Ordering::SeqCst);
        debug!("🧪 Memory socket bound to {}", endpoint);
        self.endpoint = Some(endpoint.clone());
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> io::Result<usize> {
        if self.endpoint.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "memory transport: socket not bound",
            ));
        }
        let sender = self.sender.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "memory transport: socket shut down")
        })?;

        if self.faults.send {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory transport: send disabled",
            ));
        }

        // Nobody listening is not an error for pub/sub
        sender.send(message.to_vec()).ok();

        Ok(message.len().saturating_sub(self.faults.short_send))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.sender = None;
        self.endpoint = None;
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
