//! The event loop: owns all router state, dispatches commands, demultiplexes
//! timer/transport readiness, and invokes callbacks.
//!
//! Grounded on `xrsr.c`'s single dispatch loop; the `tokio::select!` shape is
//! `jamjam::network::signaling::SignalingServer::handle_connection`'s fan-in
//! of a command channel with transport readiness, run on a
//! `tokio::task::LocalSet` so the loop never migrates threads or runs
//! concurrently with itself (spec.md §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::sleep_until;
use uuid::Uuid;

use crate::callbacks::{RouterCallbacks, SendHandle, SessionBeginConfig, SessionBeginCtx};
use crate::command::{Command, CommandResult, DetectorResult};
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::fanout::{CaptureState, SourceFanout};
use crate::model::{PowerMode, Protocol, RetriggerPolicy, Source};
use crate::msgq::{self, CommandReceiver, CommandSender};
use crate::reason::{SessionEndReason, StreamEndReason};
use crate::route::Route;
use crate::stats::{SessionStats, StreamStats};
use crate::timers::{TimerId, TimerKind, TimerWheel};
use crate::transport::http::HttpState;
use crate::transport::io::{DestinationEvent, IoReport};
use crate::transport::sdt::SdtState;
use crate::transport::ws::WsState;
use crate::transport::{Ctx, Event, SideEffect};

/// Tagged union over the three transports' state, owned per-destination.
/// Replaces inheritance with a sum type, per spec.md §9.
#[derive(Debug, Clone, Copy)]
enum TransportFsm {
    Http(HttpState),
    Ws(WsState),
    Sdt(SdtState),
}

impl TransportFsm {
    fn for_protocol(protocol: Protocol) -> Self {
        if protocol.is_ws_family() {
            Self::Ws(WsState::Disconnected)
        } else if protocol.is_sdt() {
            Self::Sdt(SdtState::Disconnected)
        } else {
            Self::Http(HttpState::Disconnected)
        }
    }

    fn on_event(self, ev: Event<()>, ctx: &Ctx) -> (Self, Vec<SideEffect>) {
        match self {
            Self::Http(s) => {
                let (next, effects) = s.on_event(ev, ctx);
                (Self::Http(next), effects)
            }
            Self::Ws(s) => {
                let (next, effects) = s.on_event(ev, ctx);
                (Self::Ws(next), effects)
            }
            Self::Sdt(s) => {
                let (next, effects) = s.on_event(ev, ctx);
                (Self::Sdt(next), effects)
            }
        }
    }
}

struct DestinationRuntime {
    fsm: TransportFsm,
    url: crate::urlparts::UrlParts,
    timeout_connect: Duration,
    retry_attempt: u32,
    auth_token: Option<String>,
    pass_through: Option<String>,
    /// Notified by `SideEffect::CloseSocket` to stop the live transport-IO
    /// task from outside; present only while a connect attempt is in flight
    /// or the transport is live.
    cancel: Option<Arc<Notify>>,
    /// The outbound queue handed to the embedder as a [`SendHandle`] once
    /// `connected` fires; only WS destinations drain it today.
    outbound_tx: Option<UnboundedSender<Vec<u8>>>,
    connect_started_at: Option<Instant>,
    connect_time: Option<Duration>,
    stream_started_at: Option<Instant>,
    bytes_forwarded: u64,
    protocol_code: Option<i32>,
    server_ip: Option<String>,
}

impl DestinationRuntime {
    fn stream_stats(&self, stream_duration: Option<Duration>) -> StreamStats {
        StreamStats {
            audio: crate::stats::AudioStats { bytes_transmitted: self.bytes_forwarded, frames_transmitted: 0 },
            stream_duration,
        }
    }

    fn session_stats(&self) -> SessionStats {
        SessionStats {
            protocol_code: self.protocol_code,
            library_code: None,
            server_ip: self.server_ip.clone(),
            connect_time: self.connect_time,
            dns_time: None,
        }
    }
}

struct SessionRuntime {
    uuid: Uuid,
    source: Source,
    destinations: Vec<DestinationRuntime>,
    fanout: SourceFanout,
    started_at: Instant,
    /// Byte offset of the detected keyword, from the triggering
    /// `KeywordDetected`/`SessionBegin` command, applied to each destination
    /// pipe as it opens so `stream_kwd` fires at the right point.
    keyword_offset: Option<u64>,
    detector: DetectorResult,
}

/// All router state, exclusively owned by the loop task.
struct GlobalState {
    config: RouterConfig,
    power_mode: PowerMode,
    privacy_mode: bool,
    routes: HashMap<Source, Route>,
    active: Option<SessionRuntime>,
    timers: TimerWheel,
    /// Per-source audio-engine handle lifecycle, tracked independently of
    /// `active` since capture is requested/granted/opened ahead of any
    /// trigger firing a session (spec.md §3.1 supplement).
    capture_states: HashMap<Source, CaptureState>,
}

impl GlobalState {
    fn new(config: RouterConfig) -> Self {
        Self {
            config,
            power_mode: PowerMode::Full,
            privacy_mode: false,
            routes: HashMap::new(),
            active: None,
            timers: TimerWheel::new(),
            capture_states: HashMap::new(),
        }
    }

    fn active_profile(&self) -> &crate::config::TimeoutProfile {
        if self.power_mode.is_full_power() {
            &self.config.profiles.full
        } else {
            &self.config.profiles.low_power
        }
    }

    fn capture_state(&self, source: Source) -> CaptureState {
        self.capture_states.get(&source).copied().unwrap_or_default()
    }

    fn set_capture_state(&mut self, source: Source, next: CaptureState) {
        self.capture_states.insert(source, next);
    }
}

/// A running router instance. `handle()` gives callers a cloneable command
/// sender; `run()` drives the event loop until `Command::Terminate`.
pub struct Router {
    state: GlobalState,
    callbacks: Arc<dyn RouterCallbacks>,
    commands: CommandReceiver<Command>,
    events_tx: UnboundedSender<DestinationEvent>,
    events_rx: UnboundedReceiver<DestinationEvent>,
}

/// Cloneable façade external callers enqueue commands through.
#[derive(Clone)]
pub struct RouterHandle {
    sender: CommandSender<Command>,
}

impl RouterHandle {
    pub fn send(&self, command: Command) -> Result<(), RouterError> {
        self.sender.try_send(command).map_err(RouterError::Queue)
    }
}

impl Router {
    /// Build a router and its handle. Does not start the loop — call
    /// [`Router::run`], normally spawned onto a `tokio::task::LocalSet`.
    pub fn new(config: RouterConfig, callbacks: Arc<dyn RouterCallbacks>) -> (Self, RouterHandle) {
        let (sender, commands) = msgq::channel();
        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { state: GlobalState::new(config), callbacks, commands, events_tx, events_rx }, RouterHandle { sender })
    }

    /// Drive the event loop until a `Terminate` command arrives or the
    /// command channel closes.
    pub async fn run(mut self) {
        loop {
            let deadline = self.state.timers.next_deadline();

            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::warn!("command channel closed, stopping event loop");
                        break;
                    };
                    if self.dispatch(cmd) {
                        break;
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_destination_event(event);
                }
                _ = sleep_until_or_pending(deadline) => {
                    self.handle_timeouts(Instant::now());
                }
            }
        }
    }

    fn handle_destination_event(&mut self, event: DestinationEvent) {
        let DestinationEvent { source, dst_index, report } = event;
        match report {
            IoReport::Fsm { event, bytes_forwarded } => {
                if let Some(bytes) = bytes_forwarded {
                    self.update_bytes_forwarded(source, dst_index, bytes);
                }
                if matches!(event, Event::Connected) {
                    self.note_connected(source, dst_index);
                }
                let established = matches!(event, Event::Established);
                self.drive_destination(source, dst_index, event);
                // WS/SDT have no separate "resume streaming" trigger for a
                // destination's first (and usually only) stream of a
                // session: reaching the handshake-complete state always
                // means the stream that's already buffered/connecting
                // should flow now.
                if established {
                    self.drive_destination(source, dst_index, Event::Stm);
                }
            }
            IoReport::KeywordCrossed => {
                self.fire_stream_kwd(source, dst_index);
            }
            IoReport::Recv { kind, bytes } => {
                let close = self.callbacks.recv_msg(source, dst_index, self.uuid_for(source), kind, &bytes);
                if close {
                    self.drive_destination(source, dst_index, Event::DisconnectLocal);
                }
            }
            IoReport::ProtocolCode(code) => {
                if let Some(runtime) = self.destination_mut(source, dst_index) {
                    runtime.protocol_code = Some(code);
                }
            }
            IoReport::ServerIp(ip) => {
                if let Some(runtime) = self.destination_mut(source, dst_index) {
                    runtime.server_ip = Some(ip);
                }
            }
        }
    }

    fn destination_mut(&mut self, source: Source, dst_index: usize) -> Option<&mut DestinationRuntime> {
        let active = self.state.active.as_mut()?;
        if active.source != source {
            return None;
        }
        active.destinations.get_mut(dst_index)
    }

    fn uuid_for(&self, source: Source) -> Uuid {
        self.state.active.as_ref().filter(|a| a.source == source).map(|a| a.uuid).unwrap_or_else(Uuid::nil)
    }

    fn update_bytes_forwarded(&mut self, source: Source, dst_index: usize, bytes: u64) {
        if let Some(runtime) = self.destination_mut(source, dst_index) {
            runtime.bytes_forwarded = bytes;
        }
    }

    fn note_connected(&mut self, source: Source, dst_index: usize) {
        if let Some(runtime) = self.destination_mut(source, dst_index) {
            if let Some(started) = runtime.connect_started_at.take() {
                runtime.connect_time = Some(started.elapsed());
            }
        }
    }

    fn fire_stream_kwd(&mut self, source: Source, dst_index: usize) {
        let uuid = self.uuid_for(source);
        self.callbacks.stream_kwd(source, dst_index, uuid, SystemTime::now());
    }

    /// Returns `true` if the loop should stop after this command.
    fn dispatch(&mut self, cmd: Command) -> bool {
        tracing::debug!(?cmd, "dispatching command");
        match cmd {
            Command::Terminate { ack } => {
                self.terminate_active_session(SessionEndReason::Terminate);
                reply(ack, CommandResult::Ack);
                return true;
            }
            Command::RouteUpdate { source, route, ack } => match crate::route::validate(&route) {
                Ok(()) => {
                    if route.is_empty() {
                        self.state.routes.remove(&source);
                    } else {
                        self.state.routes.insert(source, route);
                    }
                    reply(ack, CommandResult::Ack);
                }
                Err(e) => reply(ack, CommandResult::Error(e.to_string())),
            },
            Command::KeywordUpdate { ack, .. } => reply(ack, CommandResult::Ack),
            Command::HostNameUpdate { ack, .. } => reply(ack, CommandResult::Ack),
            Command::PowerModeUpdate { mode } => self.state.power_mode = mode,
            Command::PrivacyModeUpdate { enabled } => self.state.privacy_mode = enabled,
            Command::PrivacyModeGet { ack } => {
                let _ = ack.send(CommandResult::PrivacyMode(self.state.privacy_mode));
            }
            Command::AudioGranted { source } => {
                let next = self.state.capture_state(source).on_granted();
                self.state.set_capture_state(source, next);
            }
            Command::AudioRevoked { source } => {
                let next = self.state.capture_state(source).on_revoked();
                self.state.set_capture_state(source, next);
                tracing::debug!(%source, "audio handle revoked");
            }
            Command::AudioEvent { source, event } => match event {
                crate::command::AudioEventKind::DataAvailable(_) => {
                    let next = self.state.capture_state(source).on_detecting();
                    self.state.set_capture_state(source, next);
                }
                crate::command::AudioEventKind::Eos => {
                    self.drive_all_destinations(source, Event::Eos);
                }
            },
            Command::KeywordDetected { source, detector } | Command::SessionBegin { source, detector } => {
                self.begin_session(source, detector);
            }
            Command::KeywordDetectError { source, message } => {
                tracing::warn!(%source, %message, "keyword detection failed");
                self.callbacks.source_error(source);
            }
            Command::SessionTerminate { source, ack } => {
                if matches!(&self.state.active, Some(s) if s.source == source) {
                    self.terminate_active_session(SessionEndReason::Terminate);
                }
                // Resolved open question: the ack completes once teardown has
                // been enqueued, not once every destination has finished.
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::CaptureStart { source, ack } => {
                let next = self.state.capture_state(source).on_requested();
                self.state.set_capture_state(source, next);
                reply(ack, CommandResult::Ack);
            }
            Command::CaptureStop { source, ack } => {
                let next = self.state.capture_state(source).on_closed();
                self.state.set_capture_state(source, next);
                reply(ack, CommandResult::Ack);
            }
            Command::ThreadPoll => {}
        }
        false
    }

    fn begin_session(&mut self, source: Source, detector: DetectorResult) {
        if let Some(active) = &self.state.active {
            if active.source == source {
                match self.state.config.retrigger_policy {
                    RetriggerPolicy::AbortAndRestart => {
                        self.terminate_active_session(SessionEndReason::Terminate);
                    }
                    RetriggerPolicy::IgnoreAndRestartDetector => {
                        tracing::debug!(%source, "retrigger ignored, restarting detector only");
                        return;
                    }
                }
            } else {
                tracing::warn!(%source, active = %active.source, error = %RouterError::SessionInProgress, "rejecting trigger");
                return;
            }
        }

        let Some(route) = self.state.routes.get(&source).cloned() else {
            tracing::warn!(%source, error = %RouterError::NoRoute, "no route configured, dropping trigger");
            return;
        };
        if route.is_empty() {
            tracing::warn!(%source, "route has no destinations, dropping trigger");
            return;
        }

        let profile = self.state.active_profile().clone();
        let destinations = route
            .iter()
            .map(|d| {
                let overrides = d.overrides.resolve(&profile);
                DestinationRuntime {
                    fsm: TransportFsm::for_protocol(d.url.protocol),
                    url: d.url.clone(),
                    timeout_connect: overrides.timeout_connect,
                    retry_attempt: 0,
                    auth_token: None,
                    pass_through: None,
                    cancel: None,
                    outbound_tx: None,
                    connect_started_at: None,
                    connect_time: None,
                    stream_started_at: None,
                    bytes_forwarded: 0,
                    protocol_code: None,
                    server_ip: None,
                }
            })
            .collect::<Vec<_>>();
        let now = Instant::now();
        for (idx, dest) in route.iter().enumerate() {
            let overrides = dest.overrides.resolve(&profile);
            self.arm_session_timer(source, idx, overrides.timeout_session);
        }
        self.state.active = Some(SessionRuntime {
            uuid: Uuid::new_v4(),
            source,
            destinations,
            fanout: SourceFanout::new(),
            started_at: now,
            keyword_offset: detector.keyword_begin,
            detector,
        });
        self.state.set_capture_state(source, self.state.capture_state(source).on_streaming());

        for (idx, dest) in route.iter().enumerate() {
            self.drive_destination(source, idx, Event::Begin {
                stream_time_min: dest.stream_time_min,
                text_only: false,
            });
        }
    }

    fn arm_session_timer(&mut self, source: Source, dst_index: usize, timeout: Duration) {
        self.state.timers.insert(
            TimerId { source, dst_index, kind: TimerKind::SessionDeadline },
            Instant::now() + timeout,
        );
    }

    fn drive_all_destinations(&mut self, source: Source, ev: Event<()>) {
        let Some(active) = &self.state.active else { return };
        if active.source != source {
            return;
        }
        let count = active.destinations.len();
        for idx in 0..count {
            self.drive_destination(source, idx, ev.clone());
        }
    }

    fn drive_destination(&mut self, source: Source, dst_index: usize, ev: Event<()>) {
        let Some(active) = &self.state.active else { return };
        if active.source != source {
            return;
        }
        let profile = self.state.active_profile().clone();
        let Some(runtime) = self.state.active.as_mut().and_then(|a| a.destinations.get(dst_index)) else {
            tracing::warn!(%source, dst_index, error = %RouterError::BadDestinationIndex(dst_index), "no such destination");
            return;
        };
        let ctx = Ctx::new(Instant::now(), &profile);
        let (next_fsm, effects) = runtime.fsm.on_event(ev, &ctx);

        if let Some(active) = self.state.active.as_mut() {
            if let Some(runtime) = active.destinations.get_mut(dst_index) {
                runtime.fsm = next_fsm;
            }
        }

        for effect in effects {
            self.apply_side_effect(source, dst_index, effect);
        }
    }

    fn apply_side_effect(&mut self, source: Source, dst_index: usize, effect: SideEffect) {
        match effect {
            SideEffect::ArmTimer { kind, after } => {
                self.state.timers.insert(TimerId { source, dst_index, kind }, Instant::now() + after);
            }
            SideEffect::CancelTimer { kind } => {
                if let Err(e) = self.state.timers.remove(TimerId { source, dst_index, kind }) {
                    let err = RouterError::from(e);
                    tracing::debug!(%source, dst_index, ?kind, error = %err, "timer already inert");
                }
            }
            SideEffect::Connect => self.connect(source, dst_index),
            SideEffect::Send(bytes) => {
                tracing::trace!(%source, dst_index, len = bytes.len(), "send");
                self.callbacks.stream_audio(source, dst_index, &bytes);
            }
            SideEffect::CloseSocket => {
                if let Some(runtime) = self.destination_mut(source, dst_index) {
                    if let Some(cancel) = runtime.cancel.take() {
                        cancel.notify_one();
                    }
                    runtime.outbound_tx = None;
                }
            }
            SideEffect::OpenPipe => {
                if let Some(active) = self.state.active.as_mut() {
                    let dst_qty = active.destinations.len();
                    let keyword_offset = active.keyword_offset;
                    match active.fanout.ensure_pipe(dst_index, dst_qty) {
                        Ok(pipe) => {
                            if let Some(offset) = keyword_offset {
                                pipe.set_keyword_offset(offset);
                            }
                        }
                        Err(e) => {
                            tracing::error!(%source, dst_index, error = %e, "failed to open fan-out pipe");
                        }
                    }
                }
            }
            SideEffect::ClosePipe => {
                if let Some(active) = self.state.active.as_mut() {
                    active.fanout.close(dst_index);
                }
            }
            SideEffect::FireSessionBegin => self.fire_session_begin(source, dst_index),
            SideEffect::FireSessionEnd(reason) => {
                let uuid = self.uuid_for(source);
                let stats = self
                    .destination_mut(source, dst_index)
                    .map(|r| r.session_stats())
                    .unwrap_or_default();
                self.callbacks.session_end(source, uuid, reason, stats, SystemTime::now());
                self.maybe_clear_active(source);
            }
            SideEffect::FireStreamBegin => {
                let uuid = self.uuid_for(source);
                if let Some(runtime) = self.destination_mut(source, dst_index) {
                    runtime.stream_started_at = Some(Instant::now());
                }
                self.callbacks.stream_begin(source, dst_index, uuid, SystemTime::now());
            }
            SideEffect::FireStreamKwd => self.fire_stream_kwd(source, dst_index),
            SideEffect::FireStreamEnd(reason) => {
                let uuid = self.uuid_for(source);
                let (stats, duration) = match self.destination_mut(source, dst_index) {
                    Some(r) => {
                        let duration = r.stream_started_at.map(|t| t.elapsed());
                        (r.stream_stats(duration), duration)
                    }
                    None => (StreamStats::default(), None),
                };
                let _ = duration;
                self.callbacks.stream_end(source, dst_index, uuid, reason, stats, SystemTime::now());
            }
            SideEffect::FireConnected => self.fire_connected(source, dst_index),
            SideEffect::FireDisconnected(reason) => {
                let uuid = self.uuid_for(source);
                let retry = self
                    .destination_mut(source, dst_index)
                    .map(|r| r.retry_attempt > 0);
                self.callbacks.disconnected(source, dst_index, uuid, reason, retry, SystemTime::now());
            }
            SideEffect::ScheduleRetry { attempt } => {
                let profile = self.state.active_profile().clone();
                let delay = backoff_delay(profile.backoff_delay, attempt);
                self.state.timers.insert(
                    TimerId { source, dst_index, kind: TimerKind::Backoff },
                    Instant::now() + delay,
                );
                if let Some(runtime) = self.destination_mut(source, dst_index) {
                    runtime.retry_attempt = attempt;
                }
            }
            SideEffect::LogWarn(msg) => tracing::warn!(%source, dst_index, "{msg}"),
        }
    }

    fn fire_session_begin(&mut self, source: Source, dst_index: usize) {
        let uuid = self.uuid_for(source);
        let detector = self.state.active.as_ref().filter(|a| a.source == source).map(|a| a.detector);
        let mut config = SessionBeginConfig::default();
        self.callbacks.session_begin(SessionBeginCtx {
            uuid,
            source,
            dst_index,
            detector,
            user_text: None,
            config: &mut config,
            timestamp: SystemTime::now(),
        });
        if let Some(runtime) = self.destination_mut(source, dst_index) {
            runtime.auth_token = config.auth_token;
            runtime.pass_through = config.pass_through;
        }
    }

    fn fire_connected(&mut self, source: Source, dst_index: usize) {
        let uuid = self.uuid_for(source);
        let (send, pass_through) = match self.destination_mut(source, dst_index) {
            Some(runtime) => {
                let send = runtime.outbound_tx.clone().map(|tx| {
                    SendHandle::new(move |bytes| {
                        let _ = tx.send(bytes);
                    })
                });
                (send, runtime.pass_through.clone())
            }
            None => (None, None),
        };
        let Some(send) = send else {
            return;
        };
        self.callbacks.connected(source, dst_index, uuid, send, pass_through, SystemTime::now());
    }

    fn connect(&mut self, source: Source, dst_index: usize) {
        tracing::info!(%source, dst_index, "connecting");
        let Some(active) = self.state.active.as_mut() else { return };
        if active.source != source {
            return;
        }
        let Some(pipe) = active.fanout.take(dst_index) else {
            tracing::warn!(%source, dst_index, "connect requested with no open pipe");
            return;
        };
        let Some(runtime) = active.destinations.get_mut(dst_index) else { return };

        let url = runtime.url.clone();
        let timeout = runtime.timeout_connect;
        let auth_token = runtime.auth_token.clone();
        let cancel = Arc::new(Notify::new());
        runtime.cancel = Some(cancel.clone());
        runtime.connect_started_at = Some(Instant::now());

        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::unbounded_channel();
        if matches!(url.protocol, Protocol::Ws | Protocol::Wss) {
            runtime.outbound_tx = Some(outbound_tx);
        } else {
            drop(outbound_tx);
        }

        let events = self.events_tx.clone();
        tokio::spawn(crate::transport::io::drive(
            source, dst_index, url, timeout, auth_token, pipe, outbound_rx, events, cancel,
        ));
    }

    fn maybe_clear_active(&mut self, source: Source) {
        let Some(active) = &self.state.active else { return };
        if active.source != source {
            return;
        }
        let all_idle = active.destinations.iter().all(|d| match d.fsm {
            TransportFsm::Http(s) => s == HttpState::Disconnected,
            TransportFsm::Ws(s) => s == WsState::Disconnected,
            TransportFsm::Sdt(s) => s == SdtState::Disconnected,
        });
        if all_idle {
            tracing::debug!(%source, elapsed = ?active.started_at.elapsed(), "session fully torn down");
            self.state.active = None;
        }
    }

    fn terminate_active_session(&mut self, _reason: SessionEndReason) {
        let Some(active) = &self.state.active else { return };
        let source = active.source;
        let count = active.destinations.len();
        for idx in 0..count {
            self.drive_destination(source, idx, Event::DisconnectLocal);
        }
    }

    fn handle_timeouts(&mut self, now: Instant) {
        for id in self.state.timers.pop_expired(now) {
            self.drive_destination(id.source, id.dst_index, Event::Timeout(id.kind));
        }
    }
}

fn reply(ack: Option<crate::msgq::Completion<CommandResult>>, result: CommandResult) {
    if let Some(ack) = ack {
        let _ = ack.send(result);
    }
}

fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    use rand::Rng;
    let max_multiplier = 1u64 << attempt.min(16);
    let jitter = rand::thread_rng().gen_range(0..=max_multiplier);
    unit * jitter as u32
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => sleep_until(instant.into()).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::LoggingCallbacks;
    use crate::config::DestinationParamOverrides;
    use crate::model::{AudioFormat, StreamFrom, StreamUntil};
    use crate::route::Destination;
    use crate::urlparts::UrlParts;

    fn dest(url: &str) -> Destination {
        Destination {
            url: UrlParts::parse(url).unwrap(),
            overrides: DestinationParamOverrides::default(),
            stream_from: StreamFrom::KeywordBegin,
            stream_until: StreamUntil::EndOfSpeech,
            format: AudioFormat::Opus,
            stream_time_min: crate::route::DEFAULT_STREAM_TIME_MIN,
        }
    }

    #[tokio::test]
    async fn route_update_then_session_begin_opens_a_pipe() {
        let (mut router, handle) = Router::new(RouterConfig::default(), Arc::new(LoggingCallbacks));
        handle
            .send(Command::RouteUpdate {
                source: Source::LocalMic,
                route: vec![dest("wss://example.test/listen")],
                ack: None,
            })
            .unwrap();
        handle
            .send(Command::SessionBegin { source: Source::LocalMic, detector: DetectorResult::default() })
            .unwrap();
        handle.send(Command::Terminate { ack: None }).unwrap();

        // Drain synchronously: each dispatch() call is what `run()` would do
        // per iteration, exercised directly here without a real sleep.
        while let Some(cmd) = router.commands.recv().await {
            let stop = router.dispatch(cmd);
            if stop {
                break;
            }
        }
        assert!(router.state.active.is_none(), "Terminate must tear the session back down");
    }

    #[tokio::test]
    async fn second_source_rejected_while_one_is_active() {
        let (mut router, handle) = Router::new(RouterConfig::default(), Arc::new(LoggingCallbacks));
        handle
            .send(Command::RouteUpdate { source: Source::LocalMic, route: vec![dest("wss://a.test/s")], ack: None })
            .unwrap();
        handle
            .send(Command::RouteUpdate {
                source: Source::PttRemote,
                route: vec![dest("wss://b.test/s")],
                ack: None,
            })
            .unwrap();
        for _ in 0..2 {
            let cmd = router.commands.recv().await.unwrap();
            router.dispatch(cmd);
        }
        router.dispatch(Command::SessionBegin {
            source: Source::LocalMic,
            detector: DetectorResult::default(),
        });
        assert!(router.state.active.is_some());
        router.dispatch(Command::SessionBegin {
            source: Source::PttRemote,
            detector: DetectorResult::default(),
        });
        assert_eq!(router.state.active.as_ref().unwrap().source, Source::LocalMic);
    }

    #[tokio::test]
    async fn route_update_with_empty_route_deletes_it() {
        let (mut router, handle) = Router::new(RouterConfig::default(), Arc::new(LoggingCallbacks));
        handle
            .send(Command::RouteUpdate { source: Source::LocalMic, route: vec![dest("wss://a.test/s")], ack: None })
            .unwrap();
        handle.send(Command::RouteUpdate { source: Source::LocalMic, route: vec![], ack: None }).unwrap();
        for _ in 0..2 {
            let cmd = router.commands.recv().await.unwrap();
            router.dispatch(cmd);
        }
        assert!(!router.state.routes.contains_key(&Source::LocalMic), "an empty route must delete the entry");
    }

    #[tokio::test]
    async fn audio_eos_drives_every_destination_of_the_active_session() {
        let (mut router, handle) = Router::new(RouterConfig::default(), Arc::new(LoggingCallbacks));
        handle
            .send(Command::RouteUpdate {
                source: Source::LocalMic,
                route: vec![dest("wss://a.test/s")],
                ack: None,
            })
            .unwrap();
        for _ in 0..1 {
            let cmd = router.commands.recv().await.unwrap();
            router.dispatch(cmd);
        }
        router.dispatch(Command::SessionBegin { source: Source::LocalMic, detector: DetectorResult::default() });
        assert!(router.state.active.is_some());
        router.dispatch(Command::AudioEvent { source: Source::LocalMic, event: crate::command::AudioEventKind::Eos });
        assert!(router.state.active.is_none(), "Eos on a still-buffering destination ends the session");
    }
}
