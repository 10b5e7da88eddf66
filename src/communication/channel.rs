//! The in-process data channel connecting two task instances.
//!
//! Grounded on erdos's `data_plane::data_sender` and `receivers` (the same
//! tokio mpsc producer/consumer task-loop shape), adapted to a simpler
//! in-process bounded-queue contract (no on-wire framing).
use tokio::sync::mpsc;

use crate::errors::ChannelError;

/// An item traveling through a [`DataChannel`]: either a record, or the
/// end-of-stream sentinel that each task forwards exactly once to every
/// downstream channel it owns.
#[derive(Debug, Clone)]
pub enum ChannelItem<T> {
    Record(T),
    Eos,
}

/// The sending half of a bounded, backpressured channel between two task
/// instances. Exactly one [`ChannelItem::Eos`] may be sent, after which
/// further sends fail with [`ChannelError::Closed`].
pub struct ChannelSender<T> {
    inner: mpsc::Sender<ChannelItem<T>>,
    eos_sent: bool,
}

impl<T> std::fmt::Debug for ChannelSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender").finish_non_exhaustive()
    }
}

/// Identity equality: two distinct senders are never equal, even if they
/// happen to address the same channel, since there's no value-level notion
/// of equality for a live channel handle.
impl<T> PartialEq for ChannelSender<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl<T: Send + 'static> ChannelSender<T> {
    pub async fn send(&mut self, item: T) -> Result<(), ChannelError> {
        if self.eos_sent {
            return Err(ChannelError::Closed);
        }
        self.inner
            .send(ChannelItem::Record(item))
            .await
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Sends the end-of-stream marker. Idempotent on a best-effort basis:
    /// repeated calls after the first are rejected with `Closed`, keeping
    /// the "sent exactly once" invariant.
    pub async fn send_eos(&mut self) -> Result<(), ChannelError> {
        if self.eos_sent {
            return Err(ChannelError::Closed);
        }
        self.eos_sent = true;
        self.inner
            .send(ChannelItem::Eos)
            .await
            .map_err(|_| ChannelError::Disconnected)
    }
}

/// The receiving half. Yields records until EOS, after which every further
/// `recv()` returns `None`.
pub struct ChannelReceiver<T> {
    inner: mpsc::Receiver<ChannelItem<T>>,
    eos_seen: bool,
}

impl<T> std::fmt::Debug for ChannelReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReceiver").finish_non_exhaustive()
    }
}

/// Identity equality: see [`ChannelSender`]'s impl for rationale.
impl<T> PartialEq for ChannelReceiver<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl<T: Send + 'static> ChannelReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        if self.eos_seen {
            return None;
        }
        match self.inner.recv().await {
            Some(ChannelItem::Record(item)) => Some(item),
            Some(ChannelItem::Eos) | None => {
                self.eos_seen = true;
                None
            }
        }
    }
}

/// A bounded, FIFO, single-producer/single-consumer channel carrying
/// [`crate::dataflow::record::Record`]s between two task instances. The
/// bound enforces backpressure: a slow consumer blocks its producer rather
/// than growing memory without limit.
pub fn data_channel<T: Send + 'static>(capacity: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        ChannelSender { inner: tx, eos_sent: false },
        ChannelReceiver { inner: rx, eos_seen: false },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_flow_in_fifo_order() {
        let (mut tx, mut rx) = data_channel::<i32>(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        tx.send_eos().await.unwrap();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_eos_is_rejected() {
        let (mut tx, _rx) = data_channel::<i32>(4);
        tx.send_eos().await.unwrap();
        assert_eq!(tx.send(1).await, Err(ChannelError::Closed));
        assert_eq!(tx.send_eos().await, Err(ChannelError::Closed));
    }

    #[tokio::test]
    async fn recv_after_eos_keeps_returning_none() {
        let (mut tx, mut rx) = data_channel::<i32>(4);
        tx.send_eos().await.unwrap();
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.recv().await, None);
    }
}
