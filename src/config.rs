//! Router-wide and per-destination configuration surface.
//!
//! Grounded on `xrsr.h`'s configuration macros and `xrsr_dst_param_ptrs_t`'s
//! nullable-override struct, plus `jamjam::main::Cli`'s `clap` derive style
//! for the demo binary's flags (see `src/bin/voxrouterd.rs`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::RetriggerPolicy;

/// One full set of per-protocol timeout/backoff knobs. Two instances are held
/// simultaneously by the router (`full`, `low_power`); the active one is
/// selected by `PowerMode` (spec.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutProfile {
    /// Enable verbose transport-library tracing.
    pub debug: bool,
    /// Poll cadence during the WS/SDT handshake.
    pub connect_check_interval: Duration,
    /// Per-attempt connect budget.
    pub timeout_connect: Duration,
    /// Idle deadline once `Established`.
    pub timeout_inactivity: Duration,
    /// Overall session budget, including retries.
    pub timeout_session: Duration,
    /// Retry with IPv4 if IPv6 connect fails.
    pub ipv4_fallback: bool,
    /// Unit of exponential backoff.
    pub backoff_delay: Duration,
}

impl TimeoutProfile {
    /// A profile with all knobs at their documented range minimums, useful
    /// for fast-failing tests (spec.md §8 scenario S2).
    pub fn aggressive_for_testing() -> Self {
        Self {
            debug: false,
            connect_check_interval: Duration::from_millis(50),
            timeout_connect: Duration::from_millis(500),
            timeout_inactivity: Duration::from_secs(30),
            timeout_session: Duration::from_secs(3),
            ipv4_fallback: true,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl Default for TimeoutProfile {
    fn default() -> Self {
        Self {
            debug: false,
            connect_check_interval: Duration::from_millis(100),
            timeout_connect: Duration::from_secs(5),
            timeout_inactivity: Duration::from_secs(30),
            timeout_session: Duration::from_secs(20),
            ipv4_fallback: true,
            backoff_delay: Duration::from_millis(500),
        }
    }
}

/// A full power-mode-indexed pair of profiles, with `full` distinct from the
/// shared `low_power` profile used for both `Low` and `Sleep`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutProfiles {
    pub full: TimeoutProfile,
    pub low_power: TimeoutProfile,
}

impl Default for TimeoutProfiles {
    fn default() -> Self {
        Self {
            full: TimeoutProfile::default(),
            low_power: TimeoutProfile {
                // Low power favors shorter radio-on windows over responsiveness.
                timeout_connect: Duration::from_secs(3),
                timeout_session: Duration::from_secs(10),
                ..TimeoutProfile::default()
            },
        }
    }
}

/// Nullable per-destination overrides of a [`TimeoutProfile`]'s fields.
/// Fields set here take precedence over the active profile (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationParamOverrides {
    pub debug: Option<bool>,
    pub connect_check_interval: Option<Duration>,
    pub timeout_connect: Option<Duration>,
    pub timeout_inactivity: Option<Duration>,
    pub timeout_session: Option<Duration>,
    pub ipv4_fallback: Option<bool>,
    pub backoff_delay: Option<Duration>,
}

impl DestinationParamOverrides {
    /// Merge a profile with this destination's overrides, overrides winning.
    pub fn resolve(&self, profile: &TimeoutProfile) -> TimeoutProfile {
        TimeoutProfile {
            debug: self.debug.unwrap_or(profile.debug),
            connect_check_interval: self
                .connect_check_interval
                .unwrap_or(profile.connect_check_interval),
            timeout_connect: self.timeout_connect.unwrap_or(profile.timeout_connect),
            timeout_inactivity: self.timeout_inactivity.unwrap_or(profile.timeout_inactivity),
            timeout_session: self.timeout_session.unwrap_or(profile.timeout_session),
            ipv4_fallback: self.ipv4_fallback.unwrap_or(profile.ipv4_fallback),
            backoff_delay: self.backoff_delay.unwrap_or(profile.backoff_delay),
        }
    }
}

/// Top-level router configuration, supplied once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub profiles: TimeoutProfiles,
    /// How to handle a second trigger on an already-active source.
    pub retrigger_policy: RetriggerPolicy,
    /// Optional directory to write raw captured audio for diagnostics.
    pub capture_dir_path: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            profiles: TimeoutProfiles::default(),
            retrigger_policy: RetriggerPolicy::IgnoreAndRestartDetector,
            capture_dir_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_take_precedence_over_profile() {
        let profile = TimeoutProfile::default();
        let overrides = DestinationParamOverrides {
            timeout_connect: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let resolved = overrides.resolve(&profile);
        assert_eq!(resolved.timeout_connect, Duration::from_secs(1));
        assert_eq!(resolved.timeout_session, profile.timeout_session);
    }

    #[test]
    fn empty_overrides_leave_profile_unchanged() {
        let profile = TimeoutProfile::default();
        let resolved = DestinationParamOverrides::default().resolve(&profile);
        assert_eq!(resolved, profile);
    }
}
