//! # SpawnWatch Core
//! Shared error taxonomy, configuration, and the transport seam.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SpawnWatchConfig;
pub use error::{Result, SpawnWatchError, TransportError};
pub use traits::Transport;
pub use types::{Destination, MessageRef, SentMessage};
