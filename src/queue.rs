//! Demand-driven request queue.
//!
//! The user side pushes requests through a [`QueueHandle`]; the connection
//! engine holds the [`Subscription`] and signals how many requests it is
//! willing to admit with [`Subscription::ask`]. A small pump task buffers
//! pushed requests and ships them to the engine in batches, never exceeding
//! the outstanding demand. Initial demand is zero, so nothing reaches the
//! engine before the peer's first SETTINGS frame sizes the admission budget.

use std::collections::VecDeque;

use bytes::Bytes;
use http::{Method, Uri};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// One queued HTTP/2 request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Caller-visible correlation token, echoed in response events.
    pub token: u64,
    pub method: Method,
    pub uri: Uri,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Producer side of the queue.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl QueueHandle {
    /// Enqueue a request. Fails once the connection is gone.
    pub fn push(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|_| Error::transport("request queue closed"))
    }
}

/// Engine side of the queue.
pub struct Subscription {
    demand_tx: mpsc::UnboundedSender<u32>,
    batch_rx: mpsc::Receiver<Vec<Request>>,
}

impl Subscription {
    /// Grant the producer `n` more admission slots.
    pub fn ask(&self, n: u32) {
        if n > 0 {
            let _ = self.demand_tx.send(n);
        }
    }

    /// Receive the next batch of admitted requests.
    ///
    /// Returns `None` once the producer is gone and its buffer drained.
    pub async fn recv(&mut self) -> Option<Vec<Request>> {
        self.batch_rx.recv().await
    }
}

/// Create a connected queue pair and spawn its pump task.
pub fn subscription() -> (QueueHandle, Subscription) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (demand_tx, demand_rx) = mpsc::unbounded_channel();
    let (batch_tx, batch_rx) = mpsc::channel(1);

    tokio::spawn(pump(request_rx, demand_rx, batch_tx));

    (
        QueueHandle { tx: request_tx },
        Subscription {
            demand_tx,
            batch_rx,
        },
    )
}

async fn pump(
    mut request_rx: mpsc::UnboundedReceiver<Request>,
    mut demand_rx: mpsc::UnboundedReceiver<u32>,
    batch_tx: mpsc::Sender<Vec<Request>>,
) {
    let mut buffer: VecDeque<Request> = VecDeque::new();
    let mut demand: u64 = 0;
    let mut producer_open = true;

    loop {
        // Ship everything the current demand covers in one batch.
        if demand > 0 && !buffer.is_empty() {
            let take = (demand.min(buffer.len() as u64)) as usize;
            let batch: Vec<Request> = buffer.drain(..take).collect();
            demand -= take as u64;
            if batch_tx.send(batch).await.is_err() {
                // Engine is gone.
                return;
            }
            continue;
        }

        if !producer_open && buffer.is_empty() {
            // Nothing left to deliver.
            return;
        }

        tokio::select! {
            request = request_rx.recv(), if producer_open => match request {
                Some(request) => buffer.push_back(request),
                None => producer_open = false,
            },
            grant = demand_rx.recv() => match grant {
                Some(n) => demand += n as u64,
                None => return, // Engine dropped its subscription.
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(token: u64) -> Request {
        Request {
            token,
            method: Method::GET,
            uri: "https://example.com/".parse().unwrap(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn nothing_is_delivered_before_demand() {
        let (handle, mut sub) = subscription();
        handle.push(request(1)).unwrap();

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(waited.is_err(), "request delivered with zero demand");

        sub.ask(1);
        let batch = sub.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].token, 1);
    }

    #[tokio::test]
    async fn demand_bounds_batch_size() {
        let (handle, mut sub) = subscription();
        for token in 0..5 {
            handle.push(request(token)).unwrap();
        }

        sub.ask(2);
        let batch = sub.recv().await.unwrap();
        assert_eq!(batch.iter().map(|r| r.token).collect::<Vec<_>>(), [0, 1]);

        sub.ask(10);
        let batch = sub.recv().await.unwrap();
        assert_eq!(
            batch.iter().map(|r| r.token).collect::<Vec<_>>(),
            [2, 3, 4]
        );
    }

    #[tokio::test]
    async fn unused_demand_carries_over() {
        let (handle, mut sub) = subscription();
        sub.ask(3);
        handle.push(request(7)).unwrap();

        let batch = sub.recv().await.unwrap();
        assert_eq!(batch.len(), 1);

        handle.push(request(8)).unwrap();
        let batch = sub.recv().await.unwrap();
        assert_eq!(batch[0].token, 8);
    }
}
