//! HTTP/HTTPS destination FSM: the 5-state reduction of the WS alphabet.
//!
//! Grounded on `xrsr_protocol_http_sm.h`; there is no handshake/upgrade step
//! distinct from TCP/TLS connect, so `Connected` goes straight to
//! `Streaming` on the first chunk write. `transport::io::run_http` drains the
//! fan-out pipe and issues the upload with `reqwest` (the closest idiomatic
//! crate in the retrieved pack to the original's CURL multi-handle chunked
//! POST); see that module's doc comment for the buffered-vs-streaming-body
//! tradeoff it currently makes.

use super::{Ctx, Event, SideEffect};
use crate::reason::{SessionEndReason, StreamEndReason};
use crate::timers::TimerKind;

pub type HttpEvent = Event<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    Disconnected,
    Buffering,
    Connecting,
    Connected,
    Streaming,
}

impl HttpState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }

    pub fn can_transmit(self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn on_event(self, ev: HttpEvent, ctx: &Ctx) -> (Self, Vec<SideEffect>) {
        use HttpState::*;
        use SideEffect::*;

        match (self, ev) {
            (Disconnected, HttpEvent::Begin { stream_time_min, .. }) => {
                if stream_time_min > std::time::Duration::ZERO {
                    (Buffering, vec![FireSessionBegin, OpenPipe, ArmTimer { kind: TimerKind::SessionDeadline, after: stream_time_min }])
                } else {
                    (Connecting, vec![FireSessionBegin, OpenPipe, Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
                }
            }

            (Buffering, HttpEvent::Stm) => {
                (Connecting, vec![Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
            }
            (Buffering, HttpEvent::Eos) => (
                Disconnected,
                vec![ClosePipe, FireStreamEnd(StreamEndReason::DidNotBegin), FireSessionEnd(SessionEndReason::ErrorAudioDuration)],
            ),

            (Connecting, HttpEvent::Connected) => (
                Streaming,
                vec![CancelTimer { kind: TimerKind::Connect }, FireConnected, FireStreamBegin, ArmTimer { kind: TimerKind::Inactivity, after: ctx.session_deadline.saturating_duration_since(ctx.now) }],
            ),
            (Connecting, HttpEvent::Timeout(TimerKind::Connect)) => {
                let remaining = ctx.session_deadline.saturating_duration_since(ctx.now);
                if remaining < ctx.backoff_delay {
                    (Disconnected, vec![ClosePipe, FireSessionEnd(SessionEndReason::ErrorConnectTimeout)])
                } else {
                    (Connecting, vec![ScheduleRetry { attempt: 1 }])
                }
            }
            (Connecting, HttpEvent::Error(msg)) => (
                Disconnected,
                vec![CancelTimer { kind: TimerKind::Connect }, ClosePipe, LogWarn(msg), FireSessionEnd(SessionEndReason::ErrorConnectFailure)],
            ),

            (Streaming, HttpEvent::Eos) => (Disconnected, vec![ClosePipe, CloseSocket, FireStreamEnd(StreamEndReason::AudioEof), FireSessionEnd(SessionEndReason::Eos)]),
            (Streaming, HttpEvent::Timeout(TimerKind::Inactivity)) | (Streaming, HttpEvent::Timeout(TimerKind::SessionDeadline)) => (
                Disconnected,
                vec![ClosePipe, CloseSocket, FireStreamEnd(StreamEndReason::ErrorAudioRead), FireSessionEnd(SessionEndReason::ErrorSessionTimeout)],
            ),
            (Streaming, HttpEvent::DisconnectedByRemote) => (
                Disconnected,
                vec![ClosePipe, FireStreamEnd(StreamEndReason::DisconnectRemote), FireDisconnected(SessionEndReason::ErrorWsSend), FireSessionEnd(SessionEndReason::ErrorWsSend)],
            ),

            (_, HttpEvent::DisconnectLocal) => (
                Disconnected,
                vec![CancelTimer { kind: TimerKind::Connect }, CancelTimer { kind: TimerKind::Inactivity }, ClosePipe, CloseSocket, FireDisconnected(SessionEndReason::Terminate), FireSessionEnd(SessionEndReason::Terminate)],
            ),

            (state, _) => (state, vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connected_goes_straight_to_streaming_no_handshake_state() {
        let ctx = Ctx::for_tests();
        let (state, effects) = HttpState::Connecting.on_event(HttpEvent::Connected, &ctx);
        assert_eq!(state, HttpState::Streaming);
        assert!(effects.iter().any(|e| matches!(e, SideEffect::FireStreamBegin)));
    }

    #[test]
    fn eos_while_buffering_never_connects() {
        let ctx = Ctx::for_tests();
        let (state, effects) = HttpState::Buffering.on_event(HttpEvent::Eos, &ctx);
        assert_eq!(state, HttpState::Disconnected);
        assert!(!effects.iter().any(|e| matches!(e, SideEffect::Connect)));
    }

    #[test]
    fn zero_stream_time_min_skips_buffering() {
        let ctx = Ctx::for_tests();
        let (state, _) = HttpState::Disconnected.on_event(
            HttpEvent::Begin { stream_time_min: Duration::ZERO, text_only: false },
            &ctx,
        );
        assert_eq!(state, HttpState::Connecting);
    }
}
