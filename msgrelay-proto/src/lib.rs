//! Shared protocol definitions for the msgrelay wire format.

pub mod codec;
pub mod message;

pub use message::Message;
