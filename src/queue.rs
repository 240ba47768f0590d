//! Outbound delivery queue.
//!
//! A single unbounded FIFO decouples every producer (classifier, command
//! replies, background detail lookups) from one serialized egress worker.
//! The queue is deliberately unbounded with no backpressure, and messages
//! still queued at shutdown are dropped; see DESIGN.md.

use crate::message::{MessageOut, WireFormat};
use crate::transport::OutboundSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Producer handle; enqueue never blocks.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<MessageOut>,
}

impl QueueHandle {
    pub fn send(&self, message: MessageOut) {
        if self.tx.send(message).is_err() {
            warn!("Egress worker gone; outbound message dropped");
        }
    }
}

/// Create the queue pair: a cloneable producer handle and the receiver for
/// the egress worker.
pub fn channel() -> (QueueHandle, mpsc::UnboundedReceiver<MessageOut>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { tx }, rx)
}

/// The single egress worker: drains the queue in FIFO order, encodes each
/// message and writes it to the outbound transport with a bounded timeout.
pub struct EgressWorker {
    rx: mpsc::UnboundedReceiver<MessageOut>,
    sink: Arc<dyn OutboundSink>,
    format: WireFormat,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl EgressWorker {
    pub fn new(
        rx: mpsc::UnboundedReceiver<MessageOut>,
        sink: Arc<dyn OutboundSink>,
        format: WireFormat,
        send_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            rx,
            sink,
            format,
            send_timeout,
            shutdown,
        }
    }

    /// Drain until cancelled or all producers hang up. Whatever remains
    /// queued at that point is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => self.deliver(message).await,
                    None => break,
                },
            }
        }

        self.rx.close();
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            info!(dropped, "Egress worker stopped with messages still queued");
        } else {
            info!("Egress worker stopped");
        }
    }

    async fn deliver(&self, message: MessageOut) {
        let frame = match message.encode(self.format) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound message; dropped");
                return;
            }
        };

        match timeout(self.send_timeout, self.sink.deliver(frame)).await {
            Ok(Ok(())) => debug!("Outbound message delivered"),
            Ok(Err(e)) => warn!(error = %e, "Outbound send failed; message dropped"),
            Err(_) => warn!(
                timeout_ms = self.send_timeout.as_millis() as u64,
                "Outbound send timed out; message dropped"
            ),
        }
    }
}
