//! SP publisher end to end with a minimal SUB peer on loopback

use audio_relay::transport::sp::{parse_sp_header, sp_header, PROTOCOL_PUB, PROTOCOL_SUB};
use audio_relay::transport::{Endpoint, PubSocket, SpPubSocket, SpTransport, Transport};
use audio_relay::{AudioEmitter, RelayConfig};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Connect and complete the SP handshake as a SUB socket
fn subscribe(port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut header = [0u8; 8];
    stream.read_exact(&mut header).expect("No SP header from publisher");
    assert_eq!(parse_sp_header(&header).unwrap(), PROTOCOL_PUB);

    stream.write_all(&sp_header(PROTOCOL_SUB)).unwrap();
    stream
}

fn read_message(stream: &mut TcpStream) -> Vec<u8> {
    let mut prefix = [0u8; 8];
    stream.read_exact(&mut prefix).expect("No frame prefix");
    let len = u64::from_be_bytes(prefix) as usize;

    let mut message = vec![0u8; len];
    stream.read_exact(&mut message).expect("Truncated frame");
    message
}

fn wait_for_subscribers(socket: &SpPubSocket, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while socket.subscriber_count() != count {
        assert!(
            Instant::now() < deadline,
            "Timed out waiting for {} subscribers (have {})",
            count,
            socket.subscriber_count()
        );
        thread::sleep(Duration::from_millis(5));
    }
}

/// Next frame, or `None` once nothing arrives within the read timeout
fn try_read_message(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut prefix = [0u8; 8];
    match stream.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            return None
        }
        Err(e) => panic!("Failed to read frame prefix: {}", e),
    }
    let len = u64::from_be_bytes(prefix) as usize;

    let mut message = vec![0u8; len];
    stream.read_exact(&mut message).expect("Truncated frame");
    Some(message)
}

/// A message large enough that loopback socket buffers cannot absorb it
fn large_message(id: u8) -> Vec<u8> {
    let mut message = vec![0u8; 32 * 1024 * 1024];
    message[0] = id;
    message
}

fn bound_socket() -> (SpPubSocket, u16) {
    bound_socket_on(SpTransport::default())
}

fn bound_socket_on(transport: SpTransport) -> (SpPubSocket, u16) {
    env_logger::try_init().ok();
    let mut socket = transport.socket().unwrap();
    socket
        .bind(&"tcp://127.0.0.1:0".parse::<Endpoint>().unwrap())
        .expect("Failed to bind");
    let port = socket.local_addr().unwrap().port();
    (socket, port)
}

#[test]
fn test_subscriber_receives_framed_messages() {
    let (mut socket, port) = bound_socket();
    let mut subscriber = subscribe(port);
    wait_for_subscribers(&socket, 1);

    assert_eq!(socket.send(&[0x01]).unwrap(), 1);
    assert_eq!(socket.send(&[0x04]).unwrap(), 1);
    assert_eq!(socket.send(&[0x07, 0, 0, 0, 1]).unwrap(), 5);

    assert_eq!(read_message(&mut subscriber), vec![0x01]);
    assert_eq!(read_message(&mut subscriber), vec![0x04]);
    assert_eq!(read_message(&mut subscriber), vec![0x07, 0, 0, 0, 1]);
}

#[test]
fn test_every_subscriber_gets_every_message() {
    let (mut socket, port) = bound_socket();
    let mut subscribers: Vec<TcpStream> = (0..3).map(|_| subscribe(port)).collect();
    wait_for_subscribers(&socket, 3);

    socket.send(&[0x02]).unwrap();
    socket.send(&[0x00, 0x00, 0x00, 0xAC, 0x44]).unwrap();

    for subscriber in subscribers.iter_mut() {
        assert_eq!(read_message(subscriber), vec![0x02]);
        assert_eq!(read_message(subscriber), vec![0x00, 0x00, 0x00, 0xAC, 0x44]);
    }
}

#[test]
fn test_publish_without_subscribers_succeeds() {
    let (mut socket, _port) = bound_socket();
    assert_eq!(socket.send(&[0x01]).unwrap(), 1);
}

#[test]
fn test_non_sub_peer_is_rejected() {
    let (socket, port) = bound_socket();

    let mut peer = TcpStream::connect(("127.0.0.1", port)).unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut header = [0u8; 8];
    peer.read_exact(&mut header).unwrap();
    peer.write_all(&sp_header(PROTOCOL_PUB)).unwrap();

    // Publisher closes the connection instead of registering it
    let mut rest = Vec::new();
    peer.read_to_end(&mut rest).ok();
    assert!(rest.is_empty());
    assert_eq!(socket.subscriber_count(), 0);
}

#[test]
fn test_shutdown_disconnects_subscribers() {
    let (mut socket, port) = bound_socket();
    let mut subscriber = subscribe(port);
    wait_for_subscribers(&socket, 1);

    socket.shutdown().unwrap();

    let mut rest = Vec::new();
    subscriber.read_to_end(&mut rest).ok();
    assert!(rest.is_empty());
    assert_eq!(socket.subscriber_count(), 0);
    assert!(socket.send(&[0x01]).is_err());
}

#[test]
fn test_shutdown_closes_stalled_subscriber() {
    let (mut socket, port) = bound_socket();
    let mut subscriber = subscribe(port);
    wait_for_subscribers(&socket, 1);

    // The subscriber reads nothing, so the forwarding thread blocks mid-write
    for id in 0..3 {
        let message = large_message(id);
        assert_eq!(socket.send(&message).unwrap(), message.len());
    }
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    socket.shutdown().unwrap();
    assert_eq!(socket.subscriber_count(), 0);

    // Whatever was already buffered drains, then the connection ends
    subscriber
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    match io::copy(&mut subscriber, &mut io::sink()) {
        Ok(_) => {}
        Err(e) => assert!(
            !matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut),
            "Connection still open after shutdown"
        ),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_full_queue_drops_later_messages() {
    let (mut socket, port) = bound_socket_on(SpTransport::with_queue_depth(1));
    let mut subscriber = subscribe(port);
    wait_for_subscribers(&socket, 1);

    let sent: Vec<Vec<u8>> = (0..5).map(large_message).collect();
    for message in &sent {
        assert_eq!(socket.send(message).unwrap(), message.len());
    }

    thread::sleep(Duration::from_millis(200));
    subscriber
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();

    let mut received = Vec::new();
    while let Some(message) = try_read_message(&mut subscriber) {
        received.push(message);
    }

    // One frame in flight and one queued at most, the rest were dropped
    assert!(!received.is_empty());
    assert!(received.len() < sent.len(), "Nothing was dropped");
    for (i, message) in received.iter().enumerate() {
        assert!(*message == sent[i], "Frame {} is not message {}", i, i);
    }
    assert_eq!(socket.subscriber_count(), 1);
}

#[test]
fn test_emitter_over_sp_transport() {
    env_logger::try_init().ok();

    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = RelayConfig {
        port: i64::from(port),
        ..RelayConfig::default()
    };
    let mut emitter = AudioEmitter::bind(SpTransport::default(), &config).expect("Failed to bind");

    let mut subscriber = subscribe(port);
    wait_for_subscribers(emitter.socket().unwrap(), 1);

    emitter.notify_start(44100).unwrap();
    emitter.send_samples(&[1, -1, 0]).unwrap();
    emitter.set_volume(0.5).unwrap();
    emitter.notify_stop().unwrap();

    assert_eq!(read_message(&mut subscriber), vec![0x00, 0x00, 0x00, 0xAC, 0x44]);
    assert_eq!(
        read_message(&mut subscriber),
        vec![0x04, 0x00, 0x01, 0xFF, 0xFF, 0x00, 0x00]
    );
    assert_eq!(read_message(&mut subscriber), vec![0x05, 0x3F, 0x00, 0x00, 0x00]);
    assert_eq!(read_message(&mut subscriber), vec![0x01]);

    emitter.shutdown();
    emitter.shutdown();

    let mut rest = Vec::new();
    subscriber.read_to_end(&mut rest).ok();
    assert!(rest.is_empty());
}
