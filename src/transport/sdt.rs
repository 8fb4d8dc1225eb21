//! SDT (simple datagram transport) destination FSM.
//!
//! Grounded on `xrsr_protocol_sdt_sm.h`: the same state alphabet as WS minus
//! `TextOnlySession` (SDT has no text-only mode). The live socket is a raw
//! `tokio::net::UdpSocket`, matching `jamjam::network::transport::UdpTransport`'s
//! bind/send/recv shape rather than `tokio-tungstenite`.

use super::{Ctx, Event, SideEffect};
use crate::reason::{SessionEndReason, StreamEndReason};
use crate::timers::TimerKind;

pub type SdtEvent = Event<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdtState {
    Disconnected,
    Disconnecting,
    Buffering,
    Connecting,
    Connected,
    Established,
    Streaming,
    ConnectionRetry,
}

impl SdtState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Established | Self::Streaming)
    }

    pub fn can_transmit(self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn on_event(self, ev: SdtEvent, ctx: &Ctx) -> (Self, Vec<SideEffect>) {
        use SdtState::*;
        use SideEffect::*;

        match (self, ev) {
            (Disconnected, SdtEvent::Begin { stream_time_min, .. }) => {
                if stream_time_min > std::time::Duration::ZERO {
                    (Buffering, vec![FireSessionBegin, OpenPipe, ArmTimer { kind: TimerKind::SessionDeadline, after: stream_time_min }])
                } else {
                    (Connecting, vec![FireSessionBegin, OpenPipe, Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
                }
            }

            (Buffering, SdtEvent::Stm) => {
                (Connecting, vec![Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
            }
            (Buffering, SdtEvent::Eos) => (
                Disconnected,
                vec![ClosePipe, FireStreamEnd(StreamEndReason::DidNotBegin), FireSessionEnd(SessionEndReason::ErrorAudioDuration)],
            ),

            (Connecting, SdtEvent::Connected) => {
                (Connected, vec![CancelTimer { kind: TimerKind::Connect }, FireConnected])
            }
            (Connecting, SdtEvent::Timeout(TimerKind::Connect)) => retry_or_fail(ctx),
            (Connecting, SdtEvent::Error(msg)) => (
                Disconnected,
                vec![CancelTimer { kind: TimerKind::Connect }, ClosePipe, LogWarn(msg), FireSessionEnd(SessionEndReason::ErrorConnectFailure)],
            ),

            (Connected, SdtEvent::Established) => (
                Established,
                vec![ArmTimer { kind: TimerKind::Inactivity, after: ctx.session_deadline.saturating_duration_since(ctx.now) }],
            ),

            (Established, SdtEvent::Begin { .. }) | (Established, SdtEvent::Stm) => (
                Streaming,
                vec![FireStreamBegin, ArmTimer { kind: TimerKind::Inactivity, after: ctx.session_deadline.saturating_duration_since(ctx.now) }],
            ),

            (Streaming, SdtEvent::Eos) => (Disconnecting, vec![ClosePipe, FireStreamEnd(StreamEndReason::AudioEof)]),
            (Streaming, SdtEvent::Timeout(TimerKind::Inactivity)) | (Streaming, SdtEvent::Timeout(TimerKind::SessionDeadline)) => (
                Disconnecting,
                vec![ClosePipe, FireStreamEnd(StreamEndReason::ErrorAudioRead), FireSessionEnd(SessionEndReason::ErrorSessionTimeout)],
            ),
            (Streaming, SdtEvent::DisconnectedByRemote) => (
                Disconnected,
                vec![ClosePipe, FireStreamEnd(StreamEndReason::DisconnectRemote), FireDisconnected(SessionEndReason::Eos), FireSessionEnd(SessionEndReason::Eos)],
            ),

            (Disconnecting, SdtEvent::DisconnectedByRemote) | (Disconnecting, SdtEvent::Timeout(_)) => {
                (Disconnected, vec![CloseSocket, FireDisconnected(SessionEndReason::Eos), FireSessionEnd(SessionEndReason::Eos)])
            }

            (ConnectionRetry, SdtEvent::Timeout(TimerKind::Backoff)) => {
                (Connecting, vec![Connect, ArmTimer { kind: TimerKind::Connect, after: ctx.timeout_connect }])
            }

            (_, SdtEvent::DisconnectLocal) => (
                Disconnected,
                vec![CancelTimer { kind: TimerKind::Connect }, CancelTimer { kind: TimerKind::Inactivity }, ClosePipe, CloseSocket, FireDisconnected(SessionEndReason::Terminate), FireSessionEnd(SessionEndReason::Terminate)],
            ),

            (state, _) => (state, vec![]),
        }
    }
}

fn retry_or_fail(ctx: &Ctx) -> (SdtState, Vec<SideEffect>) {
    let remaining = ctx.session_deadline.saturating_duration_since(ctx.now);
    if remaining < ctx.backoff_delay {
        (SdtState::Disconnected, vec![SideEffect::ClosePipe, SideEffect::FireSessionEnd(SessionEndReason::ErrorConnectTimeout)])
    } else {
        (SdtState::ConnectionRetry, vec![SideEffect::ScheduleRetry { attempt: 1 }])
    }
}
