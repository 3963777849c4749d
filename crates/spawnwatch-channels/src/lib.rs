//! # SpawnWatch Channels
//! Message transport implementations.

pub mod discord;
pub mod memory;

pub use discord::DiscordTransport;
pub use memory::MemoryTransport;
