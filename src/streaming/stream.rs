//! Bounded fragment stream fed by a worker task
//!
//! The worker pushes fragments into a bounded channel and blocks when the
//! consumer falls behind. Dropping the stream aborts the worker, which drops
//! the underlying HTTP response and releases its connection.

use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::Result;

/// Default fragments buffered between worker and consumer
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Lazy sequence of answer fragments, in arrival order
#[derive(Debug)]
pub struct CompletionStream {
    rx: mpsc::Receiver<Result<String>>,
    worker: Option<JoinHandle<()>>,
}

impl CompletionStream {
    /// Drive `source` on a worker task, buffering at most `buffer` fragments
    pub fn spawn<S>(source: S, buffer: usize) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let worker = tokio::spawn(async move {
            futures_util::pin_mut!(source);
            while let Some(item) = source.next().await {
                let is_err = item.is_err();
                if tx.send(item).await.is_err() || is_err {
                    // consumer gone, or the stream ended in an error
                    break;
                }
            }
        });

        Self {
            rx,
            worker: Some(worker),
        }
    }

    /// Stream over already-known fragments
    pub fn from_fragments(fragments: Vec<String>) -> Self {
        Self::spawn(futures_util::stream::iter(fragments.into_iter().map(Ok)), DEFAULT_STREAM_BUFFER)
    }

    /// Drain the stream into one string
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for CompletionStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
