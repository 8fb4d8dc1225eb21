//! Per-source routing table: which destinations a trigger on a given
//! [`crate::model::Source`] fans out to.
//!
//! Grounded on `xrsr.h`'s destination array (`XRSR_DST_QTY_MAX = 2` per
//! route) and `xrsr_dst_param_ptrs_t`'s nullable per-destination overrides,
//! carried here as [`DestinationParamOverrides`].

use std::time::Duration;

use crate::config::DestinationParamOverrides;
use crate::model::{AudioFormat, StreamFrom, StreamUntil};
use crate::urlparts::UrlParts;

/// Minimum audio duration required before a session is established with the
/// server, absent an explicit per-destination value (`xrsr.h`'s
/// `stream_time_min`, which defaults to 300ms across the original's presets).
pub const DEFAULT_STREAM_TIME_MIN: Duration = Duration::from_millis(300);

/// One remote speech endpoint within a [`Route`].
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub url: UrlParts,
    pub overrides: DestinationParamOverrides,
    pub stream_from: StreamFrom,
    pub stream_until: StreamUntil,
    pub format: AudioFormat,
    /// Minimum duration of audio required before establishing a session with
    /// the server.
    pub stream_time_min: Duration,
}

/// The destinations a single [`crate::model::Source`] trigger fans out to,
/// bounded at [`crate::fanout::DST_QTY_MAX`].
pub type Route = Vec<Destination>;

/// Validate a route against the fan-out limit before installing it.
pub fn validate(route: &Route) -> Result<(), crate::fanout::FanoutError> {
    if route.len() > crate::fanout::DST_QTY_MAX {
        return Err(crate::fanout::FanoutError::TooManyDestinations(route.len()));
    }
    Ok(())
}
