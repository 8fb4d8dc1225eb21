//! Per-destination protocol state machines.
//!
//! Each transport's state enum is a pure value; `on_event` is a total
//! transition function returning the next state plus the I/O the router must
//! now perform, matching `jamjam::network::connection::ConnectionState`'s
//! predicate style (`is_connected`, `can_transmit`) but going further by
//! keeping the *transition* itself free of I/O too (spec.md §9's "FSM event
//! handlers are total" rule).

pub mod http;
pub mod io;
pub mod sdt;
pub mod ws;

use std::time::{Duration, Instant};

use crate::reason::{SessionEndReason, StreamEndReason};
use crate::timers::TimerKind;

/// Whether a transport-delivered payload was framed as text or binary,
/// carried from the live socket all the way to `RouterCallbacks::recv_msg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Events common to every transport FSM. Transport-specific events (e.g. a
/// WS text frame) are added on top by each transport's own `Event` enum via
/// [`Event::Protocol`].
#[derive(Debug, Clone)]
pub enum Event<P> {
    /// A destination's stream begins: enter `Buffering` if a non-zero
    /// minimum stream time applies, otherwise go straight to `Connecting`.
    /// `text_only` routes WS destinations into `TextOnlySession` instead.
    Begin { stream_time_min: Duration, text_only: bool },
    /// `stream_time_min` elapsed with no `Eos` yet — leave `Buffering`.
    Stm,
    /// End of audio capture for this destination.
    Eos,
    /// A connect attempt should be made now (initial or retry).
    Connect,
    /// The in-flight connect attempt succeeded.
    Connected,
    /// The handshake/upgrade finished; the transport can stream.
    Established,
    /// A registered [`TimerKind`] fired.
    Timeout(TimerKind),
    /// The remote end closed the transport.
    DisconnectedByRemote,
    /// The local side is tearing the transport down (`SessionTerminate` or
    /// fatal error elsewhere in the session).
    DisconnectLocal,
    /// A transport-level I/O error occurred.
    Error(String),
    /// An event specific to one transport (WS text frame, SDT ack, ...).
    Protocol(P),
}

/// Action the router must perform after an `on_event` transition. FSMs never
/// perform I/O themselves — this is the seam, mirroring `RttMeasurement`
/// being pure bookkeeping separate from the socket-owning `Connection` in
/// `jamjam::network::connection`.
#[derive(Debug, Clone)]
pub enum SideEffect {
    ArmTimer { kind: TimerKind, after: Duration },
    CancelTimer { kind: TimerKind },
    Connect,
    Send(Vec<u8>),
    CloseSocket,
    OpenPipe,
    ClosePipe,
    /// Entering `Connecting`/`Buffering`/`TextOnlySession` from `Disconnected`
    /// — the one point in each FSM's alphabet spec.md §8 invariant 3 ties a
    /// `session_begin` callback to.
    FireSessionBegin,
    FireSessionEnd(SessionEndReason),
    FireStreamBegin,
    FireStreamKwd,
    FireStreamEnd(StreamEndReason),
    FireConnected,
    FireDisconnected(SessionEndReason),
    /// Schedule a retry after backoff; `attempt` feeds the jitter draw
    /// (spec.md §4.4).
    ScheduleRetry { attempt: u32 },
    LogWarn(String),
}

/// Per-call context every FSM's `on_event` needs beyond its own state: the
/// current time, the session's absolute deadline, and the resolved
/// [`crate::config::TimeoutProfile`] values for this destination.
pub struct Ctx {
    pub now: Instant,
    pub session_deadline: Instant,
    pub timeout_connect: Duration,
    pub backoff_delay: Duration,
}

impl Ctx {
    pub fn new(now: Instant, profile: &crate::config::TimeoutProfile) -> Self {
        Self {
            now,
            session_deadline: now + profile.timeout_session,
            timeout_connect: profile.timeout_connect,
            backoff_delay: profile.backoff_delay,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        let now = Instant::now();
        Self {
            now,
            session_deadline: now + Duration::from_secs(20),
            timeout_connect: Duration::from_secs(5),
            backoff_delay: Duration::from_millis(500),
        }
    }
}
