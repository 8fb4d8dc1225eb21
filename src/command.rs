//! External commands accepted on the router's single queue.
//!
//! Grounded on `xrsr_private.h`'s `xrsr_queue_msg_type_t` message catalogue
//! (SPEC_FULL.md §4.1): every external API call is reified here as a value
//! that crosses the `tokio::sync::mpsc` channel into the event loop rather
//! than being invoked as a direct method call, preserving the "single task
//! owns all mutable state" rule even though callers may live on other tasks
//! (spec.md §5).

use crate::model::{PowerMode, Source};
use crate::msgq::Completion;
use crate::route::Route;

/// A keyword/PTT-press detection report handed in from the (external) audio
/// engine. `keyword_begin`/`keyword_end` are byte offsets into the engine's
/// own rolling capture buffer, used to seed [`crate::fanout::StreamSpec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectorResult {
    pub keyword_begin: Option<u64>,
    pub keyword_end: Option<u64>,
}

/// What happened to a source's raw audio capture, reported by the audio
/// engine out-of-band from the pipe bytes themselves.
#[derive(Debug, Clone, Copy)]
pub enum AudioEventKind {
    /// `n` bytes of audio became available (bookkeeping only; the pipe is
    /// the actual data path).
    DataAvailable(usize),
    /// Capture reached end-of-stream.
    Eos,
}

/// Outcome of a command that waits for one via a [`Completion`].
#[derive(Debug, Clone)]
pub enum CommandResult {
    Ack,
    PrivacyMode(bool),
    Error(String),
}

/// Commands the event loop dispatches on — one variant per external API call
/// (SPEC_FULL.md §4.1's 17-entry catalogue).
pub enum Command {
    /// Stop the event loop: terminate active sessions, then exit.
    Terminate { ack: Option<Completion<CommandResult>> },
    /// Replace the route for `source`.
    RouteUpdate { source: Source, route: Route, ack: Option<Completion<CommandResult>> },
    /// The wake-word model or its sensitivity changed for `source`.
    KeywordUpdate { source: Source, sensitivity: f32, ack: Option<Completion<CommandResult>> },
    /// The device's advertised hostname changed (surfaced in connect logs).
    HostNameUpdate { hostname: String, ack: Option<Completion<CommandResult>> },
    /// Device power mode changed; re-evaluate which [`crate::config::TimeoutProfile`]
    /// applies to new sessions (in-flight sessions keep their resolved profile).
    PowerModeUpdate { mode: PowerMode },
    /// Enable or disable microphone capture device-wide.
    PrivacyModeUpdate { enabled: bool },
    /// Query the current privacy-mode state.
    PrivacyModeGet { ack: Completion<CommandResult> },
    /// The audio engine granted `source` capture access.
    AudioGranted { source: Source },
    /// The audio engine revoked `source`'s capture access mid-session.
    AudioRevoked { source: Source },
    /// An out-of-band capture event for `source`'s audio engine handle.
    AudioEvent { source: Source, event: AudioEventKind },
    /// The audio engine detected a keyword/PTT press on `source`; begin (or
    /// continue, per [`crate::model::RetriggerPolicy`]) a session.
    KeywordDetected { source: Source, detector: DetectorResult },
    /// The audio engine failed to run keyword detection on `source`.
    KeywordDetectError { source: Source, message: String },
    /// Directly begin a session on `source`, bypassing keyword detection
    /// (e.g. PTT press, which has no detector result).
    SessionBegin { source: Source, detector: DetectorResult },
    /// Ask the active session on `source`, if any, to end. Resolved open
    /// question: the ack completes once terminate has been enqueued on every
    /// destination of the active source, not once teardown finishes.
    SessionTerminate { source: Source, ack: Option<Completion<()>> },
    /// Begin writing raw captured audio for `source` to the configured
    /// capture directory, for diagnostics.
    CaptureStart { source: Source, ack: Option<Completion<CommandResult>> },
    /// Stop an in-progress diagnostic capture for `source`.
    CaptureStop { source: Source, ack: Option<Completion<CommandResult>> },
    /// Periodic housekeeping tick (reconciling the timer wheel against wall
    /// clock drift); carries no payload.
    ThreadPoll,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminate { .. } => f.debug_struct("Terminate").finish(),
            Self::RouteUpdate { source, route, .. } => f
                .debug_struct("RouteUpdate")
                .field("source", source)
                .field("destinations", &route.len())
                .finish(),
            Self::KeywordUpdate { source, sensitivity, .. } => f
                .debug_struct("KeywordUpdate")
                .field("source", source)
                .field("sensitivity", sensitivity)
                .finish(),
            Self::HostNameUpdate { hostname, .. } => {
                f.debug_struct("HostNameUpdate").field("hostname", hostname).finish()
            }
            Self::PowerModeUpdate { mode } => {
                f.debug_struct("PowerModeUpdate").field("mode", mode).finish()
            }
            Self::PrivacyModeUpdate { enabled } => {
                f.debug_struct("PrivacyModeUpdate").field("enabled", enabled).finish()
            }
            Self::PrivacyModeGet { .. } => f.debug_struct("PrivacyModeGet").finish(),
            Self::AudioGranted { source } => {
                f.debug_struct("AudioGranted").field("source", source).finish()
            }
            Self::AudioRevoked { source } => {
                f.debug_struct("AudioRevoked").field("source", source).finish()
            }
            Self::AudioEvent { source, event } => {
                f.debug_struct("AudioEvent").field("source", source).field("event", event).finish()
            }
            Self::KeywordDetected { source, detector } => f
                .debug_struct("KeywordDetected")
                .field("source", source)
                .field("detector", detector)
                .finish(),
            Self::KeywordDetectError { source, message } => f
                .debug_struct("KeywordDetectError")
                .field("source", source)
                .field("message", message)
                .finish(),
            Self::SessionBegin { source, detector } => f
                .debug_struct("SessionBegin")
                .field("source", source)
                .field("detector", detector)
                .finish(),
            Self::SessionTerminate { source, .. } => {
                f.debug_struct("SessionTerminate").field("source", source).finish()
            }
            Self::CaptureStart { source, .. } => {
                f.debug_struct("CaptureStart").field("source", source).finish()
            }
            Self::CaptureStop { source, .. } => {
                f.debug_struct("CaptureStop").field("source", source).finish()
            }
            Self::ThreadPoll => f.debug_struct("ThreadPoll").finish(),
        }
    }
}
