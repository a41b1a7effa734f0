pub mod config;
pub mod emitter;
pub mod error;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use emitter::{AudioEmitter, EmitterState, SUPPORTED_SAMPLE_RATE};
pub use error::{RelayError, Result};
pub use relay_protocol::{Message, MessageKind};
