//! Scalability-protocol PUB socket over TCP.
//!
//! Speaks the SP TCP mapping used by nanomsg and nng, so their SUB sockets
//! can subscribe directly:
//!
//! ```text
//! handshake (both directions): 00 'S' 'P' 00 | protocol u16 BE | 00 00
//! each message:                length u64 BE | message bytes
//! ```
//!
//! Subscription filtering happens on the subscriber, so the publisher sends
//! every message to every connected peer. A peer whose queue is full misses
//! the message, and a peer that accepts no bytes for ten seconds is dropped.

use super::{Endpoint, PubSocket, Transport};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const SP_HEADER_LEN: usize = 8;
pub const FRAME_PREFIX_LEN: usize = 8;
pub const PROTOCOL_PUB: u16 = 0x0020;
pub const PROTOCOL_SUB: u16 = 0x0021;

const DEFAULT_QUEUE_DEPTH: usize = 128;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_IDLE: Duration = Duration::from_millis(10);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

type Frame = Arc<[u8]>;
type Subscribers = Arc<Mutex<HashMap<usize, Subscriber>>>;

/// Queue feeding one forwarding thread, plus a handle on its connection
struct Subscriber {
    sender: Sender<Frame>,
    stream: TcpStream,
}

/// Protocol header sent by each side when a connection opens
pub fn sp_header(protocol: u16) -> [u8; SP_HEADER_LEN] {
    let [hi, lo] = protocol.to_be_bytes();
    [0x00, b'S', b'P', 0x00, hi, lo, 0x00, 0x00]
}

/// Validate a peer's header and return its protocol id
pub fn parse_sp_header(header: &[u8; SP_HEADER_LEN]) -> io::Result<u16> {
    if header[..4] != [0x00, b'S', b'P', 0x00] || header[6..] != [0x00, 0x00] {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("not an SP header: {:02x?}", header),
        ));
    }
    Ok(u16::from_be_bytes([header[4], header[5]]))
}

/// Length-prefixed frame as it goes on the wire
pub fn frame(message: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_PREFIX_LEN + message.len());
    bytes.extend_from_slice(&(message.len() as u64).to_be_bytes());
    bytes.extend_from_slice(message);
    bytes
}

/// Creates `SpPubSocket`s
#[derive(Debug, Clone)]
pub struct SpTransport {
    queue_depth: usize,
}

impl SpTransport {
    /// Messages buffered per subscriber before new ones are dropped
    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
        }
    }
}

impl Default for SpTransport {
    fn default() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }
}

impl Transport for SpTransport {
    type Socket = SpPubSocket;

    fn socket(&self) -> io::Result<SpPubSocket> {
        Ok(SpPubSocket::new(self.queue_depth))
    }
}

/// PUB socket fanning messages out to SP subscribers
pub struct SpPubSocket {
    queue_depth: usize,
    subscribers: Subscribers,
    next_subscriber_id: Arc<AtomicUsize>,
    should_stop: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl SpPubSocket {
    fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: Arc::new(AtomicUsize::new(1)),
            should_stop: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
            local_addr: None,
        }
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Subscribers that completed the handshake and are still connected
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn accept_loop(
        listener: TcpListener,
        queue_depth: usize,
        subscribers: Subscribers,
        next_subscriber_id: Arc<AtomicUsize>,
        should_stop: Arc<AtomicBool>,
    ) {
        while !should_stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, addr)) => {
                    let id = next_subscriber_id.fetch_add(1, Ordering::SeqCst);
                    let subscribers = Arc::clone(&subscribers);
                    let should_stop = Arc::clone(&should_stop);

                    thread::spawn(move || {
                        if let Err(e) = Self::serve_subscriber(
                            stream,
                            id,
                            queue_depth,
                            &subscribers,
                            &should_stop,
                        ) {
                            warn!("⚠️  Subscriber {} ({}) dropped: {}", id, addr, e);
                        }
                        if let Ok(mut subscribers) = subscribers.lock() {
                            subscribers.remove(&id);
                        }
                        info!("🔌 Subscriber {} ({}) disconnected", id, addr);
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_IDLE);
                }
                Err(e) => {
                    error!("Failed to accept subscriber: {}", e);
                    thread::sleep(ACCEPT_ERROR_BACKOFF);
                }
            }
        }
        debug!("Accept loop stopped");
    }

    fn serve_subscriber(
        mut stream: TcpStream,
        id: usize,
        queue_depth: usize,
        subscribers: &Subscribers,
        should_stop: &AtomicBool,
    ) -> io::Result<()> {
        // Some platforms hand out accepted sockets in the listener's mode
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        stream.write_all(&sp_header(PROTOCOL_PUB))?;
        let mut header = [0u8; SP_HEADER_LEN];
        stream.read_exact(&mut header)?;

        let protocol = parse_sp_header(&header)?;
        if protocol != PROTOCOL_SUB {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer protocol 0x{:04x} is not SUB", protocol),
            ));
        }

        let (sender, receiver) = channel::bounded(queue_depth);
        let control = stream.try_clone()?;
        {
            let mut subscribers = subscribers
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "subscriber table poisoned"))?;
            if should_stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            subscribers.insert(
                id,
                Subscriber {
                    sender,
                    stream: control,
                },
            );
        }
        info!(
            "🔌 Subscriber {} connected from {}",
            id,
            stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        );

        let result = Self::forward_frames(&mut stream, &receiver);
        stream.shutdown(Shutdown::Both).ok();
        result
    }

    /// Write queued frames until the socket shuts down or the peer goes away
    fn forward_frames(stream: &mut TcpStream, receiver: &Receiver<Frame>) -> io::Result<()> {
        for frame in receiver.iter() {
            stream.write_all(&frame)?;
        }
        Ok(())
    }
}

impl PubSocket for SpPubSocket {
    fn bind(&mut self, endpoint: &Endpoint) -> io::Result<()> {
        if self.accept_thread.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "socket is already bound",
            ));
        }
        if self.should_stop.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket has been shut down",
            ));
        }

        let listener = TcpListener::bind(endpoint.socket_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let queue_depth = self.queue_depth;
        let subscribers = Arc::clone(&self.subscribers);
        let next_subscriber_id = Arc::clone(&self.next_subscriber_id);
        let should_stop = Arc::clone(&self.should_stop);

        let handle = thread::Builder::new()
            .name("sp-pub-accept".to_string())
            .spawn(move || {
                Self::accept_loop(
                    listener,
                    queue_depth,
                    subscribers,
                    next_subscriber_id,
                    should_stop,
                )
            })?;

        self.accept_thread = Some(handle);
        self.local_addr = Some(local_addr);
        info!("📡 Publishing on {} ({})", endpoint, local_addr);
        Ok(())
    }

    fn send(&mut self, message: &[u8]) -> io::Result<usize> {
        if self.local_addr.is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is not bound",
            ));
        }

        let frame: Frame = frame(message).into();
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "subscriber table poisoned"))?;

        let mut gone = Vec::new();
        for (id, subscriber) in subscribers.iter() {
            match subscriber.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("🐌 Subscriber {} is behind, dropping message", id);
                }
                Err(TrySendError::Disconnected(_)) => gone.push(*id),
            }
        }
        for id in gone {
            subscribers.remove(&id);
        }

        Ok(message.len())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.should_stop.store(true, Ordering::SeqCst);

        // Closing the connection also unblocks a forwarding thread stuck on
        // a peer that stopped reading
        if let Ok(mut subscribers) = self.subscribers.lock() {
            for (id, subscriber) in subscribers.drain() {
                if let Err(e) = subscriber.stream.shutdown(Shutdown::Both) {
                    debug!("Subscriber {} already closed: {}", id, e);
                }
            }
        }

        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("Accept thread panicked");
            }
        }
        if let Some(addr) = self.local_addr.take() {
            info!("🛑 Stopped publishing on {}", addr);
        }
        Ok(())
    }
}

impl Drop for SpPubSocket {
    fn drop(&mut self) {
        self.shutdown().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        assert_eq!(sp_header(PROTOCOL_PUB), [0x00, 0x53, 0x50, 0x00, 0x00, 0x20, 0x00, 0x00]);
        assert_eq!(parse_sp_header(&sp_header(PROTOCOL_SUB)).unwrap(), PROTOCOL_SUB);
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let header = [b'G', b'E', b'T', b' ', b'/', b' ', b'H', b'T'];
        assert!(parse_sp_header(&header).is_err());

        let mut header = sp_header(PROTOCOL_SUB);
        header[7] = 1;
        assert!(parse_sp_header(&header).is_err());
    }

    #[test]
    fn test_frame_prefix() {
        assert_eq!(frame(&[0x01]), vec![0, 0, 0, 0, 0, 0, 0, 1, 0x01]);
        assert_eq!(frame(&[]), vec![0; 8]);
    }

    #[test]
    fn test_queue_depth_is_at_least_one() {
        assert_eq!(SpTransport::with_queue_depth(0).queue_depth, 1);
        assert_eq!(SpTransport::with_queue_depth(4).queue_depth, 4);
        assert_eq!(SpTransport::default().queue_depth, DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn test_send_before_bind_fails() {
        let mut socket = SpTransport::default().socket().unwrap();
        let err = socket.send(&[1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_no_rebind_after_shutdown() {
        let mut socket = SpTransport::default().socket().unwrap();
        let endpoint: Endpoint = "tcp://127.0.0.1:0".parse().unwrap();

        socket.bind(&endpoint).unwrap();
        assert!(socket.local_addr().is_some());
        assert!(socket.bind(&endpoint).is_err());

        socket.shutdown().unwrap();
        socket.shutdown().unwrap();
        assert!(socket.local_addr().is_none());
        assert!(socket.bind(&endpoint).is_err());
    }
}
