use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::transport::{Endpoint, PubSocket, Transport};
use log::{debug, error, info};
use relay_protocol::Message;

/// The only sample rate the relay accepts
pub const SUPPORTED_SAMPLE_RATE: i32 = 44100;

/// Lifecycle of the publish channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Unconfigured,
    Ready,
    ShutDown,
}

enum Channel<S> {
    Unconfigured,
    Ready(S),
    ShutDown,
}

/// Turns audio pipeline lifecycle calls into published control messages.
///
/// Owns the publisher socket from `initialize` until `shutdown`. Calls are
/// synchronous and publish exactly one message each, in call order. There is
/// no internal locking: callers on several threads must serialize access.
pub struct AudioEmitter<T: Transport> {
    transport: T,
    channel: Channel<T::Socket>,
    published: u64,
}

impl<T: Transport> AudioEmitter<T> {
    /// Create an emitter that has not bound anything yet
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: Channel::Unconfigured,
            published: 0,
        }
    }

    /// Create and initialize in one step
    pub fn bind(transport: T, config: &RelayConfig) -> Result<Self> {
        let mut emitter = Self::new(transport);
        emitter.initialize(config)?;
        Ok(emitter)
    }

    /// Validate the configuration, create the socket and bind `tcp://*:<port>`
    pub fn initialize(&mut self, config: &RelayConfig) -> Result<()> {
        match self.channel {
            Channel::Unconfigured => {}
            Channel::Ready(_) => return Err(RelayError::AlreadyBound),
            Channel::ShutDown => return Err(RelayError::ShutDown),
        }

        config.validate().map_err(|e| {
            error!("❌ {}", e);
            RelayError::Config(e)
        })?;
        let endpoint = Endpoint::any(config.port_number()?);

        let mut socket = self.transport.socket().map_err(|e| {
            error!("❌ Could not create publish socket: {}", e);
            RelayError::SocketCreate(e)
        })?;

        debug!("Binding publish socket to {}", endpoint);
        socket.bind(&endpoint).map_err(|e| {
            error!("❌ Could not bind publish socket to {}: {}", endpoint, e);
            RelayError::Bind {
                endpoint: endpoint.to_string(),
                source: e,
            }
        })?;

        info!("🎵 Audio relay bound on port {}", endpoint.port);
        self.channel = Channel::Ready(socket);
        Ok(())
    }

    /// Release the channel. Does nothing unless the emitter is bound.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.channel, Channel::ShutDown) {
            Channel::Ready(mut socket) => {
                if let Err(e) = socket.shutdown() {
                    error!("Failed to shut down publish socket: {}", e);
                }
                info!(
                    "🛑 Audio relay shut down after {} messages",
                    self.published
                );
            }
            Channel::Unconfigured => self.channel = Channel::Unconfigured,
            Channel::ShutDown => {}
        }
    }

    pub fn state(&self) -> EmitterState {
        match self.channel {
            Channel::Unconfigured => EmitterState::Unconfigured,
            Channel::Ready(_) => EmitterState::Ready,
            Channel::ShutDown => EmitterState::ShutDown,
        }
    }

    /// The bound socket, if any
    pub fn socket(&self) -> Option<&T::Socket> {
        match &self.channel {
            Channel::Ready(socket) => Some(socket),
            _ => None,
        }
    }

    /// Messages published since `initialize`
    pub fn messages_published(&self) -> u64 {
        self.published
    }

    /// A stream is starting at `sample_rate`
    pub fn notify_start(&mut self, sample_rate: i32) -> Result<()> {
        if sample_rate != SUPPORTED_SAMPLE_RATE {
            error!("❌ Unsupported sample rate {}", sample_rate);
            return Err(RelayError::UnsupportedSampleRate(sample_rate));
        }
        self.publish(Message::Start { sample_rate })
    }

    /// Raw PCM samples, sent in the given order
    pub fn send_samples(&mut self, samples: &[i16]) -> Result<()> {
        self.publish(Message::Play { samples })
    }

    pub fn notify_stop(&mut self) -> Result<()> {
        self.publish(Message::Stop)
    }

    pub fn notify_flush(&mut self) -> Result<()> {
        self.publish(Message::Flush)
    }

    /// Volume level, narrowed to single precision on the wire
    pub fn set_volume(&mut self, level: f64) -> Result<()> {
        self.publish(Message::volume(level))
    }

    /// Mute flag, sent as is: zero unmutes, any other value mutes
    pub fn set_mute(&mut self, enabled: i32) -> Result<()> {
        self.publish(Message::Mute { enabled })
    }

    /// Encode and send one message. A failed or partial send leaves the
    /// channel in an unknown state, so it is shut down and nothing else goes
    /// out on it.
    fn publish(&mut self, message: Message<'_>) -> Result<()> {
        let socket = match &mut self.channel {
            Channel::Ready(socket) => socket,
            Channel::Unconfigured => return Err(RelayError::NotReady),
            Channel::ShutDown => return Err(RelayError::ShutDown),
        };

        let bytes = message.to_bytes()?;
        let sent = match socket.send(&bytes) {
            Ok(sent) => sent,
            Err(e) => {
                error!("❌ Publishing {:?} failed: {}", message.kind(), e);
                self.shutdown();
                return Err(RelayError::Publish(e));
            }
        };

        if sent != bytes.len() {
            error!(
                "❌ Partial publish of {:?}: {} of {} bytes",
                message.kind(),
                sent,
                bytes.len()
            );
            self.shutdown();
            return Err(RelayError::ShortPublish {
                expected: bytes.len(),
                sent,
            });
        }

        self.published += 1;
        debug!("📤 Published {:?} ({} bytes)", message.kind(), sent);
        Ok(())
    }
}

impl<T: Transport> Drop for AudioEmitter<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
