//! Bounded event bridging between producer and consumer tasks
//!
//! The upstream-consuming side and the client-writing side of a stream
//! run on separate tasks at independent paces. [`spawn_pump`] connects
//! them through a bounded, ordered channel: a slow client backpressures
//! the producer instead of dropping or reordering events, and client
//! disconnect cancels upstream consumption promptly.

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crosswire_core::CanonicalEvent;

use crate::error::StreamError;

/// Bridge an upstream event stream across tasks
///
/// Spawns a producer task that drains `upstream` into a bounded channel
/// and returns the consumer side as a stream. The producer stops when:
/// - the upstream ends,
/// - `cancel` fires (client disconnect or transport timeout), or
/// - the returned stream is dropped (the channel closes).
///
/// In every case upstream consumption stops promptly; nothing is left
/// orphaned.
pub fn spawn_pump<S>(
    upstream: S,
    capacity: usize,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<CanonicalEvent, StreamError>> + Send
where
    S: Stream<Item = Result<CanonicalEvent, StreamError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<CanonicalEvent, StreamError>>(capacity.max(1));

    tokio::spawn(async move {
        let mut upstream = std::pin::pin!(upstream);

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("stream pump cancelled, dropping upstream");
                    break;
                }
                next = upstream.next() => next,
            };

            let Some(item) = next else { break };
            let is_err = item.is_err();

            // A closed receiver means the consumer went away; stop
            // draining the upstream.
            if tx.send(item).await.is_err() {
                tracing::debug!("stream pump consumer dropped, stopping");
                break;
            }
            if is_err {
                break;
            }
        }
    });

    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;

    use super::*;

    fn content(text: &str) -> Result<CanonicalEvent, StreamError> {
        Ok(CanonicalEvent::ContentDelta { text: text.to_owned() })
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let upstream = stream::iter(vec![content("a"), content("b"), content("c")]);
        let pumped = spawn_pump(upstream, 2, CancellationToken::new());

        let texts: Vec<String> = pumped
            .map(|item| match item.unwrap() {
                CanonicalEvent::ContentDelta { text } => text,
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
            .await;

        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn cancellation_stops_upstream_consumption() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&consumed);

        // An endless upstream that counts how far it was driven.
        let upstream = stream::unfold(0u64, move |n| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some((content("tick"), n + 1))
            }
        });

        let cancel = CancellationToken::new();
        let mut pumped = std::pin::pin!(spawn_pump(upstream, 1, cancel.clone()));

        assert!(pumped.next().await.is_some());
        cancel.cancel();

        // Drain whatever was already buffered; the stream must then end.
        while pumped.next().await.is_some() {}

        let after_cancel = consumed.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(consumed.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn dropping_consumer_stops_producer() {
        let consumed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&consumed);

        let upstream = stream::unfold(0u64, move |n| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some((content("tick"), n + 1))
            }
        });

        let pumped = spawn_pump(upstream, 1, CancellationToken::new());
        drop(pumped);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let settled = consumed.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(consumed.load(Ordering::SeqCst), settled);
    }

    #[tokio::test]
    async fn upstream_error_is_delivered_then_stream_ends() {
        let upstream = stream::iter(vec![
            content("a"),
            Err(StreamError::Upstream {
                message: "connection reset".to_owned(),
            }),
        ]);
        let pumped = spawn_pump(upstream, 4, CancellationToken::new());
        let items: Vec<_> = pumped.collect().await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(StreamError::Upstream { .. })));
    }
}
