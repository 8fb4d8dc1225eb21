//! WebSocket/WSS destination FSM.
//!
//! State alphabet and transition table reproduced from
//! `xrsr_protocol_ws_sm.h`'s `St_Ws_*` declarations (spec.md §4.2,
//! SPEC_FULL.md §4.2 — carried verbatim). The live socket itself is driven by
//! `jamjam::network::signaling`'s `tokio-tungstenite` usage; this module only
//! contains the pure transition function.

use std::time::Duration;

use super::{Ctx, Event, SideEffect};
use crate::reason::{SessionEndReason, StreamEndReason};
use crate::timers::TimerKind;

pub type WsEvent = Event<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Disconnecting,
    Buffering,
    Connecting,
    Connected,
    Established,
    Streaming,
    TextOnlySession,
    ConnectionRetry,
}

impl WsState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Established | Self::Streaming | Self::TextOnlySession)
    }

    pub fn can_transmit(self) -> bool {
        matches!(self, Self::Streaming | Self::TextOnlySession)
    }

    /// Pure transition: given the current state and an event, return the
    /// next state and the I/O the router must now perform.
    pub fn on_event(self, ev: WsEvent, ctx: &Ctx) -> (Self, Vec<SideEffect>) {
        use SideEffect::*;
        use WsState::*;

        match (self, ev) {
            (Disconnected, WsEvent::Begin { stream_time_min, text_only }) => {
                if text_only {
                    (TextOnlySession, vec![FireSessionBegin, Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
                } else if stream_time_min > Duration::ZERO {
                    (Buffering, vec![FireSessionBegin, OpenPipe, ArmTimer { kind: TimerKind::SessionDeadline, after: stream_time_min }])
                } else {
                    (Connecting, vec![FireSessionBegin, OpenPipe, Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
                }
            }

            (Buffering, WsEvent::Stm) => {
                (Connecting, vec![Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
            }
            (Buffering, WsEvent::Eos) => {
                // Minimum stream time never reached: no socket was ever opened.
                (Disconnected, vec![ClosePipe, FireStreamEnd(StreamEndReason::DidNotBegin), FireSessionEnd(SessionEndReason::ErrorAudioDuration)])
            }

            (Connecting, WsEvent::Connected) => {
                (Connected, vec![CancelTimer { kind: TimerKind::Connect }, FireConnected])
            }
            (Connecting, WsEvent::Timeout(TimerKind::Connect)) => retry_or_fail(ctx, 1),
            (Connecting, WsEvent::Error(msg)) => {
                (Disconnected, vec![CancelTimer { kind: TimerKind::Connect }, ClosePipe, LogWarn(msg), FireSessionEnd(SessionEndReason::ErrorConnectFailure)])
            }

            (Connected, WsEvent::Established) => {
                (Established, vec![ArmTimer { kind: TimerKind::Inactivity, after: ctx.session_deadline.saturating_duration_since(ctx.now) }])
            }
            (Connected, WsEvent::Error(msg)) => (Disconnected, vec![ClosePipe, LogWarn(msg), FireDisconnected(SessionEndReason::ErrorWsSend), FireSessionEnd(SessionEndReason::ErrorWsSend)]),

            (Established, WsEvent::Begin { .. }) | (Established, WsEvent::Stm) => {
                (Streaming, vec![FireStreamBegin, ArmTimer { kind: TimerKind::Inactivity, after: ctx.session_deadline.saturating_duration_since(ctx.now) }])
            }

            (Streaming, WsEvent::Eos) => {
                (Disconnecting, vec![ClosePipe, FireStreamEnd(StreamEndReason::AudioEof)])
            }
            (Streaming, WsEvent::Timeout(TimerKind::Inactivity)) | (Streaming, WsEvent::Timeout(TimerKind::SessionDeadline)) => {
                (Disconnecting, vec![ClosePipe, FireStreamEnd(StreamEndReason::ErrorAudioRead), FireSessionEnd(SessionEndReason::ErrorSessionTimeout)])
            }
            (Streaming, WsEvent::DisconnectedByRemote) => {
                (Disconnected, vec![ClosePipe, FireStreamEnd(StreamEndReason::DisconnectRemote), FireDisconnected(SessionEndReason::Eos), FireSessionEnd(SessionEndReason::Eos)])
            }

            (TextOnlySession, WsEvent::Connected) => (TextOnlySession, vec![FireConnected]),
            (TextOnlySession, WsEvent::DisconnectedByRemote) => {
                (Disconnected, vec![FireDisconnected(SessionEndReason::Eot), FireSessionEnd(SessionEndReason::Eot)])
            }

            (Disconnecting, WsEvent::DisconnectedByRemote) | (Disconnecting, WsEvent::Timeout(_)) => {
                (Disconnected, vec![CloseSocket, FireDisconnected(SessionEndReason::Eos), FireSessionEnd(SessionEndReason::Eos)])
            }

            (ConnectionRetry, WsEvent::Timeout(TimerKind::Backoff)) => {
                (Connecting, vec![Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
            }

            (_, WsEvent::DisconnectLocal) => {
                (Disconnected, vec![CancelTimer { kind: TimerKind::Connect }, CancelTimer { kind: TimerKind::Inactivity }, ClosePipe, CloseSocket, FireDisconnected(SessionEndReason::Terminate), FireSessionEnd(SessionEndReason::Terminate)])
            }

            // Any other (state, event) pair is a no-op: events arriving after
            // a destination has already moved on are expected (e.g. a late
            // socket-close notification after Disconnected).
            (state, _) => (state, vec![]),
        }
    }
}

fn retry_or_fail(ctx: &Ctx, attempt: u32) -> (WsState, Vec<SideEffect>) {
    let remaining = ctx.session_deadline.saturating_duration_since(ctx.now);
    if remaining < ctx.backoff_delay {
        (
            WsState::Disconnected,
            vec![SideEffect::ClosePipe, SideEffect::FireSessionEnd(SessionEndReason::ErrorConnectTimeout)],
        )
    } else {
        (WsState::ConnectionRetry, vec![SideEffect::ScheduleRetry { attempt }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_stream_time_min_skips_buffering() {
        let ctx = Ctx::for_tests();
        let (state, effects) =
            WsState::Disconnected.on_event(WsEvent::Begin { stream_time_min: Duration::ZERO, text_only: false }, &ctx);
        assert_eq!(state, WsState::Connecting);
        assert!(effects.iter().any(|e| matches!(e, SideEffect::Connect)));
    }

    #[test]
    fn nonzero_stream_time_min_enters_buffering_first() {
        let ctx = Ctx::for_tests();
        let (state, _) = WsState::Disconnected.on_event(
            WsEvent::Begin { stream_time_min: Duration::from_millis(300), text_only: false },
            &ctx,
        );
        assert_eq!(state, WsState::Buffering);
    }

    #[test]
    fn eos_during_buffering_never_opens_a_socket() {
        let ctx = Ctx::for_tests();
        let (state, effects) = WsState::Buffering.on_event(WsEvent::Eos, &ctx);
        assert_eq!(state, WsState::Disconnected);
        assert!(!effects.iter().any(|e| matches!(e, SideEffect::Connect)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, SideEffect::FireSessionEnd(SessionEndReason::ErrorAudioDuration))));
    }

    #[test]
    fn established_then_begin_enters_streaming_and_fires_callback() {
        let ctx = Ctx::for_tests();
        let (state, effects) = WsState::Established.on_event(
            WsEvent::Begin { stream_time_min: Duration::ZERO, text_only: false },
            &ctx,
        );
        assert_eq!(state, WsState::Streaming);
        assert!(effects.iter().any(|e| matches!(e, SideEffect::FireStreamBegin)));
    }

    #[test]
    fn connect_timeout_near_session_deadline_fails_without_retry() {
        let mut ctx = Ctx::for_tests();
        ctx.session_deadline = ctx.now + Duration::from_millis(10);
        let (state, effects) = WsState::Connecting.on_event(WsEvent::Timeout(TimerKind::Connect), &ctx);
        assert_eq!(state, WsState::Disconnected);
        assert!(effects
            .iter()
            .any(|e| matches!(e, SideEffect::FireSessionEnd(SessionEndReason::ErrorConnectTimeout))));
    }

    #[test]
    fn connect_timeout_with_budget_left_schedules_retry() {
        let ctx = Ctx::for_tests();
        let (state, effects) = WsState::Connecting.on_event(WsEvent::Timeout(TimerKind::Connect), &ctx);
        assert_eq!(state, WsState::ConnectionRetry);
        assert!(effects.iter().any(|e| matches!(e, SideEffect::ScheduleRetry { .. })));
    }

    #[test]
    fn disconnect_local_tears_down_from_any_state() {
        let ctx = Ctx::for_tests();
        let (state, effects) = WsState::Streaming.on_event(WsEvent::DisconnectLocal, &ctx);
        assert_eq!(state, WsState::Disconnected);
        assert!(effects
            .iter()
            .any(|e| matches!(e, SideEffect::FireSessionEnd(SessionEndReason::Terminate))));
    }

    #[test]
    fn text_only_session_skips_streaming_state() {
        let ctx = Ctx::for_tests();
        let (state, _) = WsState::Disconnected.on_event(
            WsEvent::Begin { stream_time_min: Duration::ZERO, text_only: true },
            &ctx,
        );
        assert_eq!(state, WsState::TextOnlySession);
    }
}
