use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::stats::ViewData;

/// Largest capacity the export channel accepts; larger requests are clamped.
pub const MAX_EXPORT_CAPACITY: usize = 1 << 16;

/// Creates the outbound snapshot channel.
///
/// # Overflow policy: drop-oldest
///
/// The channel holds at least `capacity` snapshots (rounded up to a power
/// of two). Sending never blocks and never fails. When the consumer falls
/// behind, the oldest queued snapshots are discarded so the freshest data
/// survives; the receiver counts what it missed in
/// [`ExportReceiver::dropped`]. Snapshots sent while no receiver exists
/// are discarded as well.
///
/// `capacity` is clamped to `1..=MAX_EXPORT_CAPACITY`.
pub fn channel(capacity: usize) -> (ExportSender, ExportReceiver) {
    let (tx, rx) = broadcast::channel(capacity.clamp(1, MAX_EXPORT_CAPACITY));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        ExportSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        ExportReceiver { rx, dropped },
    )
}

// ─── Producer side ───────────────────────────────────────────────

#[derive(Clone)]
pub struct ExportSender {
    tx: broadcast::Sender<Arc<ViewData>>,
    dropped: Arc<AtomicU64>,
}

impl ExportSender {
    pub fn send(&self, data: ViewData) {
        if self.tx.send(Arc::new(data)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn has_receiver(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

// ─── Consumer side ───────────────────────────────────────────────

/// The single consumer of exported snapshots.
pub struct ExportReceiver {
    rx: broadcast::Receiver<Arc<ViewData>>,
    dropped: Arc<AtomicU64>,
}

impl ExportReceiver {
    /// Waits for the next snapshot. Returns `None` once every sender is
    /// gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<ViewData>> {
        loop {
            match self.rx.recv().await {
                Ok(data) => return Some(data),
                Err(RecvError::Lagged(n)) => note_lag(&self.dropped, n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ViewData>> {
        loop {
            match self.rx.try_recv() {
                Ok(data) => return Some(data),
                Err(TryRecvError::Lagged(n)) => note_lag(&self.dropped, n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Snapshots lost to overflow or to having no receiver.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Consumer-paced stream of snapshots; ends when all senders are gone.
    pub fn into_stream(self) -> impl Stream<Item = Arc<ViewData>> {
        let dropped = self.dropped;
        BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(data) => Some(data),
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                note_lag(&dropped, n);
                None
            }
        })
    }
}

fn note_lag(dropped: &AtomicU64, n: u64) {
    dropped.fetch_add(n, Ordering::Relaxed);
    tracing::warn!(skipped = n, "export consumer lagging, dropped oldest snapshots");
}
