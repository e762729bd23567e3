//! Control-plane client and its wire messages.

pub mod client;
pub mod message;
pub(crate) mod pending;

pub use client::{ControlPlaneClient, SessionState};
pub use message::{ControlMsg, ControlReply, ControlRequest, LogLevel, ReplyMsg};
