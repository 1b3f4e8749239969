//! Progress reporting for in-flight downloads.

use tokio::sync::mpsc;

/// Cloneable handle over an optional caller-supplied progress channel.
///
/// The first event on the channel is the total content length (0 when the
/// server never declared one); every later event is a byte-count delta for a
/// completed chunk or whole-body copy, so the deltas sum to the first event
/// on a successful download.
///
/// Sends are discarded once the receiver is gone: a caller that stops
/// listening cannot stall the workers. A bounded channel gives a slow but
/// live receiver backpressure instead of unbounded memory growth.
#[derive(Clone)]
pub(crate) struct ProgressSender {
    tx: Option<mpsc::Sender<u64>>,
}

impl ProgressSender {
    pub fn new(tx: Option<mpsc::Sender<u64>>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, bytes: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(bytes).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detached_sender_is_a_no_op() {
        let progress = ProgressSender::new(None);
        progress.send(42).await;
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let progress = ProgressSender::new(Some(tx));

        progress.send(160).await;
        progress.send(16).await;

        assert_eq!(rx.recv().await, Some(160));
        assert_eq!(rx.recv().await, Some(16));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_block() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let progress = ProgressSender::new(Some(tx));
        progress.send(1).await;
        progress.send(2).await;
    }
}
