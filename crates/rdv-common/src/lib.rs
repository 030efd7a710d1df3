//! Types shared by the rendezvous relay server and its clients.
//!
//! - Signaling message text codec ([`message`])
//! - Protocol constants and path/URL helpers ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod message;
pub mod types;

pub use message::{Message, MessageError};
