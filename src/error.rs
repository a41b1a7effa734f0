use crate::config::ConfigError;
use relay_protocol::ProtocolError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported sample rate {0}, only 44100 is supported")]
    UnsupportedSampleRate(i32),

    #[error("Could not create publish socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("Could not bind publish socket to {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Publish failed: {0}")]
    Publish(#[source] io::Error),

    #[error("Partial publish: sent {sent} of {expected} bytes")]
    ShortPublish { expected: usize, sent: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Emitter is not bound")]
    NotReady,

    #[error("Emitter is already bound")]
    AlreadyBound,

    #[error("Emitter has been shut down")]
    ShutDown,
}
