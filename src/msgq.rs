//! The router's single inbound command queue.
//!
//! Grounded on `xrsr_msgq.c`: a fixed-capacity queue (`max_msg=16`) that
//! every external call — `session_begin`, `session_terminate`, device
//! hot-plug, power-mode changes — pushes onto, with push failing loudly
//! rather than blocking the caller when the queue is full. Realized with
//! `tokio::sync::mpsc::channel`, the same bounded-channel idiom `jamjam`
//! uses to hand work to its connection tasks, plus `tokio::sync::oneshot`
//! for calls that need to observe completion (spec.md §4.6).

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Matches the original's `max_msg` queue depth.
pub const QUEUE_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("command queue is full (capacity {QUEUE_CAPACITY})")]
    Full,
    #[error("command queue is closed")]
    Closed,
}

/// Sending half of the command queue. Cloneable so every external entry
/// point (the demo binary's CLI, a future RPC surface) can hold its own
/// handle without contending on a lock.
#[derive(Clone)]
pub struct CommandSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> CommandSender<T> {
    /// Non-blocking push, matching `xrsr_queue_msg_push`'s semantics: a full
    /// queue is an error returned to the caller, never a wait.
    pub fn try_send(&self, msg: T) -> Result<(), QueueError> {
        self.inner.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Receiving half, owned by the event loop.
pub struct CommandReceiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> CommandReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }
}

/// Create a bounded command queue at [`QUEUE_CAPACITY`].
pub fn channel<T>() -> (CommandSender<T>, CommandReceiver<T>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    (CommandSender { inner: tx }, CommandReceiver { inner: rx })
}

/// One-shot completion handle attached to a command that the caller wants to
/// block on, e.g. "has `session_terminate` actually been processed". Errors
/// if the event loop drops it without replying, which only happens on
/// shutdown.
pub type Completion<T> = oneshot::Sender<T>;
pub type CompletionWait<T> = oneshot::Receiver<T>;

pub fn completion<T>() -> (Completion<T>, CompletionWait<T>) {
    oneshot::channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv_round_trips() {
        let (tx, mut rx) = channel::<u32>();
        tx.try_send(42).unwrap();
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn full_queue_reports_full_not_blocking() {
        let (tx, _rx) = channel::<u32>();
        for i in 0..QUEUE_CAPACITY {
            tx.try_send(i as u32).unwrap();
        }
        match tx.try_send(999) {
            Err(QueueError::Full) => {}
            other => panic!("expected Full, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_receiver_reports_closed() {
        let (tx, rx) = channel::<u32>();
        drop(rx);
        match tx.try_send(1) {
            Err(QueueError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_delivers_value() {
        let (tx, rx) = completion::<&'static str>();
        tx.send("done").unwrap();
        assert_eq!(rx.await, Ok("done"));
    }
}
