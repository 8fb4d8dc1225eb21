//! Lifecycle callbacks surfaced to the router's embedder.
//!
//! `jamjam::network::connection` hands the application boxed closures
//! (`AudioCallback`, `LatencyInfoCallback`) for events off the hot path; this
//! crate instead collects them into one trait so an embedder implements only
//! the events it cares about, matching spec.md §6's callback table while
//! keeping a single object to register instead of half a dozen closures.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use uuid::Uuid;

use crate::command::DetectorResult;
use crate::model::Source;
use crate::reason::SessionEndReason;
use crate::reason::StreamEndReason;
use crate::stats::{SessionStats, StreamStats};
use crate::transport::FrameKind;

/// Mutable, per-destination configuration an embedder may fill in from
/// `session_begin` before the connect attempt is made — an auth token or
/// extra query parameters the destination's config didn't already carry, plus
/// an opaque pass-through value handed back unchanged at `connected` time
/// (spec.md §6, §9).
#[derive(Debug, Clone, Default)]
pub struct SessionBeginConfig {
    pub auth_token: Option<String>,
    pub query_params: Vec<(String, String)>,
    pub pass_through: Option<String>,
}

/// Everything `session_begin` reports about the destination that's about to
/// connect.
pub struct SessionBeginCtx<'a> {
    pub uuid: Uuid,
    pub source: Source,
    pub dst_index: usize,
    /// The detector report that triggered this session, if any (absent for a
    /// plain PTT `SessionBegin` with no keyword detector behind it).
    pub detector: Option<DetectorResult>,
    /// Free text associated with the trigger, e.g. a transcribed wake phrase.
    pub user_text: Option<&'a str>,
    pub config: &'a mut SessionBeginConfig,
    pub timestamp: SystemTime,
}

/// An opaque handle the application may use to push bytes onto a connected
/// destination from outside the router's own event loop (spec.md §9's "send
/// function" handed to `connected`). Cloning shares the same underlying
/// queue; `Debug` never prints the contents.
#[derive(Clone)]
pub struct SendHandle {
    inner: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
}

impl SendHandle {
    pub fn new(f: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    pub fn send(&self, bytes: Vec<u8>) {
        (self.inner)(bytes);
    }
}

impl fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendHandle(..)")
    }
}

/// Lifecycle notifications for one source's sessions and each destination's
/// streams within them. All methods default to doing nothing so an embedder
/// implements only what it needs.
pub trait RouterCallbacks: Send + Sync {
    /// A session started on `ctx.source`, triggered by a keyword or PTT
    /// press; `ctx.config` can be filled in before the connect attempt.
    fn session_begin(&self, ctx: SessionBeginCtx<'_>) {
        let _ = ctx;
    }

    /// `source`'s session ended for `reason`, with accumulated statistics.
    fn session_end(
        &self,
        source: Source,
        uuid: Uuid,
        reason: SessionEndReason,
        stats: SessionStats,
        timestamp: SystemTime,
    ) {
        let _ = (source, uuid, reason, stats, timestamp);
    }

    /// Destination `dst_index` of `source`'s session began streaming audio.
    fn stream_begin(&self, source: Source, dst_index: usize, uuid: Uuid, timestamp: SystemTime) {
        let _ = (source, dst_index, uuid, timestamp);
    }

    /// The forwarded audio for `dst_index` has passed the keyword-end offset.
    /// Fires at most once per stream (see [`crate::fanout::DestinationPipe::account_forwarded`]).
    fn stream_kwd(&self, source: Source, dst_index: usize, uuid: Uuid, timestamp: SystemTime) {
        let _ = (source, dst_index, uuid, timestamp);
    }

    /// Destination `dst_index` stopped streaming, with its own end reason
    /// distinct from the session's overall `reason` (spec.md §3: a stream can
    /// end independently of its session, e.g. on remote disconnect).
    fn stream_end(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        reason: StreamEndReason,
        stats: StreamStats,
        timestamp: SystemTime,
    ) {
        let _ = (source, dst_index, uuid, reason, stats, timestamp);
    }

    /// The transport for `dst_index` reached a connected, ready-to-stream
    /// state. `send` pushes bytes onto the live connection from outside the
    /// loop; `pass_through` is whatever `session_begin` stashed in
    /// [`SessionBeginConfig::pass_through`].
    fn connected(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        send: SendHandle,
        pass_through: Option<String>,
        timestamp: SystemTime,
    ) {
        let _ = (source, dst_index, uuid, send, pass_through, timestamp);
    }

    /// The transport for `dst_index` dropped its connection. `retry` is
    /// `Some(true)` if the router is about to attempt a reconnect,
    /// `Some(false)` if it gave up, `None` if the destination was never
    /// connected to begin with (e.g. it never left `Buffering`).
    fn disconnected(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        reason: SessionEndReason,
        retry: Option<bool>,
        timestamp: SystemTime,
    ) {
        let _ = (source, dst_index, uuid, reason, retry, timestamp);
    }

    /// A message arrived from the remote endpoint. Returning `true` closes
    /// the session locally, mirroring `xrsr`'s `recv_msg` closing on an
    /// application-recognized terminal message.
    fn recv_msg(&self, source: Source, dst_index: usize, uuid: Uuid, kind: FrameKind, bytes: &[u8]) -> bool {
        let _ = (source, dst_index, uuid, kind, bytes);
        false
    }

    /// The (external) audio engine reported an error unrelated to any
    /// particular destination's transport.
    fn source_error(&self, source: Source) {
        let _ = source;
    }

    /// Raw audio as it's forwarded to `dst_index`, for diagnostics/metering.
    /// Optional: most embedders only need the higher-level stream callbacks.
    fn stream_audio(&self, source: Source, dst_index: usize, bytes: &[u8]) {
        let _ = (source, dst_index, bytes);
    }
}

/// A callback set that logs every event at `debug!` and otherwise does
/// nothing; useful as the demo binary's default and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallbacks;

impl RouterCallbacks for LoggingCallbacks {
    fn session_begin(&self, ctx: SessionBeginCtx<'_>) {
        tracing::debug!(%ctx.source, dst_index = ctx.dst_index, %ctx.uuid, "session_begin");
    }

    fn session_end(
        &self,
        source: Source,
        uuid: Uuid,
        reason: SessionEndReason,
        stats: SessionStats,
        _timestamp: SystemTime,
    ) {
        tracing::debug!(%source, %uuid, %reason, ?stats, "session_end");
    }

    fn stream_begin(&self, source: Source, dst_index: usize, uuid: Uuid, _timestamp: SystemTime) {
        tracing::debug!(%source, dst_index, %uuid, "stream_begin");
    }

    fn stream_kwd(&self, source: Source, dst_index: usize, uuid: Uuid, _timestamp: SystemTime) {
        tracing::debug!(%source, dst_index, %uuid, "stream_kwd");
    }

    fn stream_end(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        reason: StreamEndReason,
        stats: StreamStats,
        _timestamp: SystemTime,
    ) {
        tracing::debug!(%source, dst_index, %uuid, %reason, ?stats, "stream_end");
    }

    fn connected(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        _send: SendHandle,
        pass_through: Option<String>,
        _timestamp: SystemTime,
    ) {
        tracing::debug!(%source, dst_index, %uuid, ?pass_through, "connected");
    }

    fn disconnected(
        &self,
        source: Source,
        dst_index: usize,
        uuid: Uuid,
        reason: SessionEndReason,
        retry: Option<bool>,
        _timestamp: SystemTime,
    ) {
        tracing::debug!(%source, dst_index, %uuid, %reason, ?retry, "disconnected");
    }

    fn recv_msg(&self, source: Source, dst_index: usize, uuid: Uuid, kind: FrameKind, bytes: &[u8]) -> bool {
        tracing::debug!(%source, dst_index, %uuid, ?kind, len = bytes.len(), "recv_msg");
        false
    }

    fn source_error(&self, source: Source) {
        tracing::warn!(%source, "source_error");
    }

    fn stream_audio(&self, source: Source, dst_index: usize, bytes: &[u8]) {
        tracing::trace!(%source, dst_index, len = bytes.len(), "stream_audio");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCallbacks {
        session_begins: AtomicUsize,
    }

    impl RouterCallbacks for CountingCallbacks {
        fn session_begin(&self, _ctx: SessionBeginCtx<'_>) {
            self.session_begins.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn default_methods_are_no_ops_and_overrides_run() {
        let cb = CountingCallbacks::default();
        let mut config = SessionBeginConfig::default();
        cb.session_begin(SessionBeginCtx {
            uuid: Uuid::nil(),
            source: Source::LocalMic,
            dst_index: 0,
            detector: None,
            user_text: None,
            config: &mut config,
            timestamp: SystemTime::now(),
        });
        cb.stream_begin(Source::LocalMic, 0, Uuid::nil(), SystemTime::now()); // default no-op, must not panic
        assert_eq!(cb.session_begins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_handle_forwards_to_its_closure() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handle = SendHandle::new(move |bytes| seen2.lock().unwrap().push(bytes));
        handle.send(vec![1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);
    }
}
