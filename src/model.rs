//! Core enumerations and value types shared across the router.
//!
//! Grounded on `xrsr.h`'s enum definitions; the Rust versions drop the
//! trailing `_INVALID` sentinel variants C used for out-of-band error
//! signaling in favor of `Option`/`Result`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An audio trigger source. Each source has at most one [`crate::route::Route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// A push-to-talk remote control.
    PttRemote,
    /// A far-field (always-listening) remote control.
    FarfieldRemote,
    /// A local microphone with on-device wake-word detection.
    LocalMic,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PttRemote => "PTT_REMOTE",
            Self::FarfieldRemote => "FARFIELD_REMOTE",
            Self::LocalMic => "LOCAL_MIC",
        };
        f.write_str(s)
    }
}

/// Wire transport family for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
    Ws,
    Wss,
    Sdt,
}

impl Protocol {
    /// Classify from a URL scheme string (case-insensitive).
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            "sdt" => Some(Self::Sdt),
            _ => None,
        }
    }

    /// Whether this protocol uses the WebSocket-shaped FSM (WS/WSS/SDT share
    /// a state alphabet; HTTP/HTTPS use the 5-state reduction).
    pub fn is_ws_family(self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }

    pub fn is_http_family(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }

    pub fn is_sdt(self) -> bool {
        matches!(self, Self::Sdt)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Ws => "WS",
            Self::Wss => "WSS",
            Self::Sdt => "SDT",
        };
        f.write_str(s)
    }
}

/// Encoding requested for the outbound audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Whatever format the source natively captures in.
    Native,
    Pcm,
    Adpcm,
    Opus,
}

/// Where in the captured audio a stream should begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFrom {
    Beginning,
    KeywordBegin,
    KeywordEnd,
}

/// The condition that ends a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamUntil {
    EndOfStream,
    EndOfSpeech,
    EndOfKeyword,
}

/// Device power mode. Selects which [`crate::config::TimeoutProfile`] is active
/// and which microphone variant the (external) audio engine should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Full,
    Low,
    Sleep,
}

impl PowerMode {
    /// `Low` and `Sleep` share a single timeout profile; only `Full` gets its own.
    pub fn is_full_power(self) -> bool {
        matches!(self, Self::Full)
    }
}

/// Policy for a second `KEYWORD_DETECTED`/`SESSION_BEGIN` on an already-active source.
///
/// Resolves the open question in spec.md §9 / §4.1: the original source had a
/// compile-time switch between these two behaviors; this keeps both and makes
/// the choice a runtime [`crate::config::RouterConfig`] field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetriggerPolicy {
    /// Abort the in-progress session and begin the new one.
    AbortAndRestart,
    /// Ignore the new trigger but restart keyword detection so the next
    /// wake-word isn't missed.
    IgnoreAndRestartDetector,
}
