// packages/mesh/src/transport/frame_sink.rs
//! Ordered send side of a connection

use crate::utils::errors::{MeshError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::trace;

/// Send half of one connection
///
/// Frames are delivered in send order. `send` returns once the frame is
/// queued for the stream, not when the peer has processed it.
pub struct FrameSink<T> {
    tx: mpsc::Sender<T>,
    peer: Arc<str>,
}

impl<T> Clone for FrameSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            peer: Arc::clone(&self.peer),
        }
    }
}

impl<T> FrameSink<T> {
    /// Queue a frame; fails with `TransportClosed` once the stream is gone
    pub async fn send(&self, frame: T) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| MeshError::TransportClosed(self.peer.to_string()))?;
        trace!("Queued frame for {}", self.peer);
        Ok(())
    }

    /// Queue a frame without waiting for capacity
    ///
    /// A full queue fails with `Backpressure`; the frame is dropped.
    pub fn try_send(&self, frame: T) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MeshError::Backpressure(self.peer.to_string()),
            mpsc::error::TrySendError::Closed(_) => MeshError::TransportClosed(self.peer.to_string()),
        })?;
        trace!("Queued frame for {}", self.peer);
        Ok(())
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Peer label used in logs and errors
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// Create a sink and the stream that feeds the connection
pub fn channel<T>(capacity: usize, peer: impl Into<String>) -> (FrameSink<T>, ReceiverStream<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sink = FrameSink {
        tx,
        peer: Arc::from(peer.into()),
    };
    (sink, ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (sink, mut stream) = channel::<u32>(8, "test");

        for i in 0..5 {
            sink.send(i).await.unwrap();
        }
        drop(sink);

        let mut received = vec![];
        while let Some(frame) = stream.next().await {
            received.push(frame);
        }
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (sink, stream) = channel::<u32>(8, "worker-1");
        drop(stream);

        assert!(sink.is_closed());
        let err = sink.send(1).await.unwrap_err();
        assert!(matches!(err, MeshError::TransportClosed(peer) if peer == "worker-1"));
    }

    #[tokio::test]
    async fn test_try_send_full_queue_is_backpressure() {
        let (sink, mut stream) = channel::<u32>(1, "slow");

        sink.try_send(1).unwrap();
        let err = sink.try_send(2).unwrap_err();
        assert!(matches!(err, MeshError::Backpressure(peer) if peer == "slow"));

        assert_eq!(stream.next().await, Some(1));
        sink.try_send(3).unwrap();

        drop(stream);
        assert!(matches!(sink.try_send(4), Err(MeshError::TransportClosed(_))));
    }
}
