//! Per-session and per-stream statistics accumulators reported through
//! `session_end`/`stream_end` callbacks.
//!
//! Grounded on `xrsr.h`'s HTTP/WS session-config structs (connect time, DNS
//! time, server IP, protocol/library result codes) and on
//! `jamjam::network::connection::ConnectionStats` for the Rust shape of a
//! plain accumulator struct updated in place as events arrive.

use std::time::Duration;

/// Audio-transport statistics accumulated over one destination's stream.
#[derive(Debug, Clone, Default)]
pub struct AudioStats {
    pub bytes_transmitted: u64,
    pub frames_transmitted: u64,
}

/// Reported via `stream_end`.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub audio: AudioStats,
    pub stream_duration: Option<Duration>,
}

/// Reported via `session_end`. `protocol_code`/`library_code` mirror the
/// original's transport-library result codes (HTTP status / CURLcode, or the
/// WS close code) surfaced opaquely as small integers.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub protocol_code: Option<i32>,
    pub library_code: Option<i32>,
    pub server_ip: Option<String>,
    pub connect_time: Option<Duration>,
    pub dns_time: Option<Duration>,
}
