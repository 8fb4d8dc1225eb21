//! Multi-destination audio fan-out: one audio source feeds 1..N destinations
//! through OS pipes, sized to hold roughly 10 seconds of 16kHz/16-bit mono
//! audio (spec.md §4.5). Grounded on `xrsr_xraudio.c`'s pipe creation/handoff
//! to the external audio engine, realized with the same `target_os`-gated
//! platform code style `jamjam`'s `Cargo.toml` uses for its audio backends.

use std::fs::File;

use nix::fcntl::OFlag;
use nix::unistd;
use thiserror::Error;
use tokio::net::unix::pipe;

use crate::model::{AudioFormat, StreamFrom, StreamUntil};
use crate::model::Source;

/// Maximum destinations fanned out to for one source, matching `XRSR_DST_QTY_MAX`.
pub const DST_QTY_MAX: usize = 2;

/// Target pipe capacity: ~10s of 16kHz/16-bit mono PCM.
pub const PIPE_CAPACITY_BYTES: i32 = 16_000 * 2 * 10;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("destination index {0} exceeds DST_QTY_MAX ({DST_QTY_MAX})")]
    TooManyDestinations(usize),

    #[error("failed to create pipe: {0}")]
    PipeCreate(#[from] std::io::Error),
}

/// Record handed to the (external) audio engine describing how to feed one
/// destination's pipe: where in the audio to start, and when to stop.
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    pub format: AudioFormat,
    pub stream_from: StreamFrom,
    /// Byte offset relative to `stream_from`'s reference point. May be
    /// negative (e.g. "start 8000 bytes before the keyword" as in spec.md §8
    /// scenario S1's `offset_buf_begin=-8000`).
    pub stream_offset: i64,
    pub stream_until: StreamUntil,
}

/// One destination's audio pipe: the read end this crate (or a spawned
/// transport-IO task) consumes from, the write end handed to the caller that
/// actually produces audio, and keyword-offset tracking over the bytes that
/// have passed through.
pub struct DestinationPipe {
    pub reader: pipe::Receiver,
    writer: pipe::Sender,
    keyword_offset: Option<u64>,
    bytes_forwarded: u64,
    keyword_fired: bool,
}

impl DestinationPipe {
    fn new(reader: pipe::Receiver, writer: pipe::Sender) -> Self {
        Self { reader, writer, keyword_offset: None, bytes_forwarded: 0, keyword_fired: false }
    }

    /// The write end, for the (external) audio engine or a synthetic feeder
    /// (tests, the demo binary) to push bytes into.
    pub fn writer_mut(&mut self) -> &mut pipe::Sender {
        &mut self.writer
    }

    /// Record a `STREAM_KWD_INFO` byte offset from the audio engine.
    pub fn set_keyword_offset(&mut self, byte_offset: u64) {
        self.keyword_offset = Some(byte_offset);
    }

    /// Account for `n` forwarded bytes. Returns `true` exactly once, the call
    /// where the running total first reaches the keyword offset — the
    /// `stream_kwd` callback should fire on that return value, never more
    /// than once per session (spec.md §8 invariant 2).
    pub fn account_forwarded(&mut self, n: usize) -> bool {
        self.bytes_forwarded += n as u64;
        if !self.keyword_fired {
            if let Some(offset) = self.keyword_offset {
                if self.bytes_forwarded >= offset {
                    self.keyword_fired = true;
                    return true;
                }
            }
        }
        false
    }

    pub fn bytes_forwarded(&self) -> u64 {
        self.bytes_forwarded
    }
}

/// Per-source fan-out state: which destinations have a live pipe, and
/// whether the next `stream_begin` must allocate fresh ones.
#[derive(Default)]
pub struct SourceFanout {
    pipes: Vec<Option<DestinationPipe>>,
    /// `true` until the first destination of the current session requests a
    /// stream; once all destinations have ended, this resets to `true` so the
    /// next session recreates pipes (spec.md §4.5).
    first_stream_req: bool,
}

impl SourceFanout {
    pub fn new() -> Self {
        Self { pipes: Vec::new(), first_stream_req: true }
    }

    /// Entering `Streaming`/`Buffering` for `dst_index`: return the read end
    /// for this destination, creating pipes for every destination of the
    /// route on the first call of a new session.
    ///
    /// `dst_qty` is the number of destinations in the route so every pipe can
    /// be created up front on the first request, matching the original's
    /// "first stream_begin for a new session creates N OS pipes" rule.
    pub fn ensure_pipe(
        &mut self,
        dst_index: usize,
        dst_qty: usize,
    ) -> Result<&mut DestinationPipe, FanoutError> {
        if dst_index >= DST_QTY_MAX || dst_index >= dst_qty {
            return Err(FanoutError::TooManyDestinations(dst_index));
        }

        if self.first_stream_req {
            self.pipes = Vec::with_capacity(dst_qty);
            for _ in 0..dst_qty {
                self.pipes.push(None);
            }
            self.first_stream_req = false;
        }

        if self.pipes.get(dst_index).and_then(|p| p.as_ref()).is_none() {
            let (writer, reader) = create_pipe()?;
            self.pipes[dst_index] = Some(DestinationPipe::new(reader, writer));
        }

        Ok(self.pipes[dst_index].as_mut().expect("just inserted"))
    }

    /// A destination's `stream_end`: close its pipe read end. Once every
    /// destination has ended, the next session starts fresh.
    pub fn close(&mut self, dst_index: usize) {
        if let Some(slot) = self.pipes.get_mut(dst_index) {
            *slot = None;
        }
        if self.pipes.iter().all(Option::is_none) {
            self.first_stream_req = true;
        }
    }

    /// Remove and hand over the full pipe state for `dst_index` — both ends,
    /// plus its running keyword-offset counters — to a caller that will own
    /// it for the life of the connection (a spawned transport-IO task).
    /// Bookkeeping (`is_open`) reflects the slot as closed immediately;
    /// calling `close` on the same index afterward is still safe and is how
    /// the final `stream_end` resets `first_stream_req`.
    pub fn take(&mut self, dst_index: usize) -> Option<DestinationPipe> {
        self.pipes.get_mut(dst_index).and_then(|slot| slot.take())
    }

    pub fn is_open(&self, dst_index: usize) -> bool {
        self.pipes.get(dst_index).map(|p| p.is_some()).unwrap_or(false)
    }
}

/// Create an anonymous OS pipe, sized to [`PIPE_CAPACITY_BYTES`] where the
/// platform supports it (Linux `F_SETPIPE_SZ`; a no-op elsewhere, logged at
/// `debug!`, exactly as the default pipe capacity is still usable). Both ends
/// are opened non-blocking: the write end is handed to the external audio
/// engine as-is, the read end is wrapped for async reads here.
fn create_pipe() -> Result<(pipe::Sender, pipe::Receiver), FanoutError> {
    let (read_fd, write_fd) = unistd::pipe2(OFlag::O_NONBLOCK)
        .map_err(|e| FanoutError::PipeCreate(std::io::Error::from(e)))?;

    #[cfg(target_os = "linux")]
    {
        use std::os::fd::AsRawFd;
        // Best-effort: failure to resize just means less buffering headroom.
        if let Err(e) = nix::fcntl::fcntl(
            write_fd.as_raw_fd(),
            nix::fcntl::FcntlArg::F_SETPIPE_SZ(PIPE_CAPACITY_BYTES),
        ) {
            tracing::debug!("F_SETPIPE_SZ failed, keeping default pipe capacity: {e}");
        }
    }

    let receiver = pipe::Receiver::from_file(File::from(read_fd))?;
    let sender = pipe::Sender::from_file(File::from(write_fd))?;
    Ok((sender, receiver))
}

/// Per-source source of audio, identified for logging only.
pub fn label(source: Source, dst_index: usize) -> String {
    format!("{source}/{dst_index}")
}

/// Where a source's (external) audio-engine handle sits in its own
/// open/grant/stream lifecycle, mirroring `xrsr_xraudio_state_t`. Bookkeeping
/// only: this crate never owns the capture device, but `AudioGranted`/
/// `AudioRevoked`/`CaptureStart`/`CaptureStop` all need somewhere to land
/// that a session-begin/STM decision can later read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Created,
    Requested,
    Granted,
    Opened,
    Detecting,
    Streaming,
}

impl CaptureState {
    /// `CaptureStart`: ask for the device, or open it if already granted.
    pub fn on_requested(self) -> Self {
        match self {
            Self::Created => Self::Requested,
            Self::Granted => Self::Opened,
            other => other,
        }
    }

    /// `AudioGranted`.
    pub fn on_granted(self) -> Self {
        match self {
            Self::Requested => Self::Granted,
            other => other,
        }
    }

    /// `AudioRevoked`: the external engine pulled the handle back regardless
    /// of where we were in the lifecycle.
    pub fn on_revoked(self) -> Self {
        Self::Created
    }

    /// `AudioEvent::DataAvailable` arriving while `Opened`: detection has begun.
    pub fn on_detecting(self) -> Self {
        match self {
            Self::Opened => Self::Detecting,
            other => other,
        }
    }

    /// `KeywordDetected`/`SessionBegin`: the destination fan-out is live.
    pub fn on_streaming(self) -> Self {
        match self {
            Self::Detecting | Self::Opened => Self::Streaming,
            other => other,
        }
    }

    /// `CaptureStop`: release back down to granted-but-closed.
    pub fn on_closed(self) -> Self {
        match self {
            Self::Streaming | Self::Detecting | Self::Opened => Self::Granted,
            other => other,
        }
    }
}
