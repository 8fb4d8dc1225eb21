//! voxrouter - single-threaded voice-session router
//!
//! Watches audio trigger sources (PTT remote, far-field remote, local mic
//! with wake-word detection), opens a streaming session to a configured
//! remote speech endpoint over HTTP(S) chunked POST, WebSocket(S), or a
//! simple datagram transport, and fans the captured audio out to every
//! destination in that source's route.

pub mod callbacks;
pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod model;
pub mod msgq;
pub mod reason;
pub mod route;
pub mod router;
pub mod stats;
pub mod timers;
pub mod transport;
pub mod urlparts;

pub use callbacks::RouterCallbacks;
pub use command::Command;
pub use config::RouterConfig;
pub use router::{Router, RouterHandle};
