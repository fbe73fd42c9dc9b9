// packages/mesh/src/transport/receiver.rs
//! Receive loop for one connection

use futures::{Stream, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Returned by the frame callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Why a receive loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer finished the stream
    EndOfStream,

    /// Stream failed
    Error(String),

    /// Local shutdown
    Cancelled,

    /// Callback asked to stop
    Stopped,
}

/// Drive a frame stream, invoking `on_frame` once per frame
///
/// Frames are handled strictly one after another in arrival order; the next
/// frame is not read until the previous callback has completed.
pub async fn drive<S, T, E, F, Fut>(
    mut stream: S,
    cancel: CancellationToken,
    peer: &str,
    mut on_frame: F,
) -> CloseReason
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Flow>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Receive loop for {} cancelled", peer);
                return CloseReason::Cancelled;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if on_frame(frame).await == Flow::Stop {
                    debug!("Receive loop for {} stopped by handler", peer);
                    return CloseReason::Stopped;
                }
            }
            Some(Err(e)) => {
                warn!("Stream from {} failed: {}", peer, e);
                return CloseReason::Error(e.to_string());
            }
            None => {
                debug!("Stream from {} ended", peer);
                return CloseReason::EndOfStream;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_in_order() {
        let stream = futures::stream::iter((0..5).map(Ok::<u32, String>));
        let mut seen = vec![];

        let reason = drive(stream, CancellationToken::new(), "test", |frame| {
            seen.push(frame);
            async { Flow::Continue }
        })
        .await;

        assert_eq!(reason, CloseReason::EndOfStream);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_callbacks_never_overlap() {
        let stream = futures::stream::iter((0..10).map(Ok::<u32, String>));
        let busy = Arc::new(AtomicBool::new(false));

        drive(stream, CancellationToken::new(), "test", |_| {
            let busy = Arc::clone(&busy);
            async move {
                assert!(!busy.swap(true, Ordering::SeqCst));
                tokio::time::sleep(Duration::from_millis(1)).await;
                busy.store(false, Ordering::SeqCst);
                Flow::Continue
            }
        })
        .await;
    }

    #[tokio::test]
    async fn test_error_ends_loop() {
        let stream = futures::stream::iter(vec![Ok(1u32), Err("boom".to_string()), Ok(2)]);
        let mut seen = vec![];

        let reason = drive(stream, CancellationToken::new(), "test", |frame| {
            seen.push(frame);
            async { Flow::Continue }
        })
        .await;

        assert_eq!(reason, CloseReason::Error("boom".to_string()));
        assert_eq!(seen, vec![1]);
    }

    #[tokio::test]
    async fn test_stop_and_cancel() {
        let stream = futures::stream::iter((0..5).map(Ok::<u32, String>));
        let reason = drive(stream, CancellationToken::new(), "test", |frame| async move {
            if frame == 2 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        })
        .await;
        assert_eq!(reason, CloseReason::Stopped);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let pending = futures::stream::pending::<Result<u32, String>>();
        let reason = drive(pending, cancel, "test", |_| async { Flow::Continue }).await;
        assert_eq!(reason, CloseReason::Cancelled);
    }
}
