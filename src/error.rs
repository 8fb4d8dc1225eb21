//! Crate-wide error types, one flat `thiserror` enum per subsystem.
//!
//! Follows the shape of `jamjam::network::error::NetworkError`: a single
//! `#[derive(Error, Debug)]` enum per module with `#[error("...")]` messages
//! and `#[from]` conversions for the I/O types it wraps.

use thiserror::Error;

/// Errors from the router event loop and command dispatch.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no route configured for source")]
    NoRoute,

    #[error("a session is already active on another source")]
    SessionInProgress,

    #[error("destination index {0} out of range")]
    BadDestinationIndex(usize),

    #[error("command queue error: {0}")]
    Queue(#[from] crate::msgq::QueueError),

    #[error("fan-out error: {0}")]
    Fanout(#[from] crate::fanout::FanoutError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timer error: {0}")]
    Timer(#[from] TimerError),
}

/// Errors surfaced by the per-destination transport implementations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid destination URL: {0}")]
    BadUrl(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("websocket error: {0}")]
    Ws(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the monotonic timer wheel.
#[derive(Error, Debug)]
pub enum TimerError {
    #[error("no timer registered with id {0:?}")]
    NotFound(crate::timers::TimerId),
}
