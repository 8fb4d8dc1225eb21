//! Session/stream outcome codes surfaced through [`crate::callbacks::RouterCallbacks`].
//!
//! These are protocol outcomes, not Rust errors — they are reported via
//! `session_end`/`stream_end`, never propagated with `?`.

use std::fmt;

/// Why a session (all destinations of one source trigger) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// Normal end of speech/stream.
    Eos,
    /// Text-only session ended normally.
    Eot,
    /// Local cancellation (`Command::Terminate` / `Command::SessionTerminate`).
    Terminate,
    /// Bug or invariant violation.
    ErrorInternal,
    /// Transport write failure.
    ErrorWsSend,
    /// Could not open the audio pipeline.
    ErrorAudioBegin,
    /// `Eos` arrived before the minimum stream time was reached.
    ErrorAudioDuration,
    /// All connect attempts within the session budget failed.
    ErrorConnectFailure,
    /// A single connect attempt exceeded `timeout_connect` with no budget left.
    ErrorConnectTimeout,
    /// `timeout_inactivity` or `timeout_session` elapsed in `Established`.
    ErrorSessionTimeout,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eos => "EOS",
            Self::Eot => "EOT",
            Self::Terminate => "TERMINATE",
            Self::ErrorInternal => "ERROR_INTERNAL",
            Self::ErrorWsSend => "ERROR_WS_SEND",
            Self::ErrorAudioBegin => "ERROR_AUDIO_BEGIN",
            Self::ErrorAudioDuration => "ERROR_AUDIO_DURATION",
            Self::ErrorConnectFailure => "ERROR_CONNECT_FAILURE",
            Self::ErrorConnectTimeout => "ERROR_CONNECT_TIMEOUT",
            Self::ErrorSessionTimeout => "ERROR_SESSION_TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Why an individual destination's audio stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndReason {
    /// Stream ended normally at end of file (pipe EOF from the audio engine).
    AudioEof,
    /// Remote peer closed the transport unexpectedly.
    DisconnectRemote,
    /// The local side tore the transport down.
    DisconnectLocal,
    /// An error occurred reading the audio stream.
    ErrorAudioRead,
    /// The stream never began (e.g. minimum-stream-time not met).
    DidNotBegin,
}

impl fmt::Display for StreamEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AudioEof => "AUDIO_EOF",
            Self::DisconnectRemote => "DISCONNECT_REMOTE",
            Self::DisconnectLocal => "DISCONNECT_LOCAL",
            Self::ErrorAudioRead => "ERROR_AUDIO_READ",
            Self::DidNotBegin => "DID_NOT_BEGIN",
        };
        f.write_str(s)
    }
}

/// Internal signal an FSM uses when unwinding from `Disconnecting`/`Buffering`
/// to pick the right [`SessionEndReason`]. Mirrors `xrsr_ret_code_internal_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalRetCode {
    Success,
    AudioDuration,
    Terminate,
}

impl InternalRetCode {
    pub fn into_session_end_reason(self) -> SessionEndReason {
        match self {
            Self::Success => SessionEndReason::Eos,
            Self::AudioDuration => SessionEndReason::ErrorAudioDuration,
            Self::Terminate => SessionEndReason::Terminate,
        }
    }
}
