//! Channel-based query iterator.
//!
//! A query iterator is a bounded concurrent producer: records arrive on a
//! channel, the consumer cancels through a token the producers observe in
//! their send-select, and a terminal error is retrievable after the
//! record channel closes.

use std::sync::Arc;

use parking_lot::Mutex;
use rampart_core::Record;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Default channel capacity for query iterators.
pub const ITERATOR_BUFFER: usize = 32;

/// Creates a connected feeder/iterator pair.
#[must_use]
pub fn channel(buffer: usize) -> (IteratorFeeder, RecordIterator) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let done = CancellationToken::new();
    let error = Arc::new(Mutex::new(None));
    (
        IteratorFeeder {
            sender: tx,
            done: done.clone(),
            error: Arc::clone(&error),
        },
        RecordIterator {
            receiver: rx,
            done,
            error,
        },
    )
}

/// Producer half of a query iterator. Clonable for parallel producers.
#[derive(Clone)]
pub struct IteratorFeeder {
    sender: mpsc::Sender<Arc<dyn Record>>,
    done: CancellationToken,
    error: Arc<Mutex<Option<Error>>>,
}

impl IteratorFeeder {
    /// Sends a record, backing off until the consumer takes it or
    /// cancels. Returns `false` when the producer should stop.
    pub async fn feed(&self, record: Arc<dyn Record>) -> bool {
        tokio::select! {
            () = self.done.cancelled() => false,
            sent = self.sender.send(record) => sent.is_ok(),
        }
    }

    /// Records the iterator's terminal error. The first error wins.
    pub fn report_error(&self, err: Error) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Whether the consumer has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.done.is_cancelled()
    }
}

/// Consumer half of a query iterator.
pub struct RecordIterator {
    receiver: mpsc::Receiver<Arc<dyn Record>>,
    done: CancellationToken,
    error: Arc<Mutex<Option<Error>>>,
}

impl RecordIterator {
    /// The next record, or `None` once all producers are done.
    pub async fn next(&mut self) -> Option<Arc<dyn Record>> {
        self.receiver.recv().await
    }

    /// Tells the producers to stop early.
    pub fn cancel(&self) {
        self.done.cancel();
    }

    /// Takes the terminal error, if the producers reported one.
    ///
    /// Meaningful once [`next`](Self::next) has returned `None`.
    pub fn error(&mut self) -> Option<Error> {
        self.error.lock().take()
    }

    /// Drains the iterator into a vector.
    ///
    /// # Errors
    ///
    /// The terminal error, if the producers reported one.
    pub async fn collect(mut self) -> Result<Vec<Arc<dyn Record>>, Error> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record);
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(records),
        }
    }
}

impl Drop for RecordIterator {
    fn drop(&mut self) {
        // A dropped consumer counts as cancellation.
        self.done.cancel();
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use rampart_core::{dsd, Base, Format};

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Blip {
        #[serde(skip)]
        base: Base,
        n: i64,
    }

    impl Record for Blip {
        fn base(&self) -> &Base {
            &self.base
        }

        fn payload(&self, format: Format) -> Result<Vec<u8>, rampart_core::Error> {
            dsd::dump(self, format)
        }

        fn attributes(&self) -> Option<serde_json::Value> {
            serde_json::to_value(self).ok()
        }
    }

    fn blip(n: i64) -> Arc<dyn Record> {
        let blip = Blip {
            n,
            ..Blip::default()
        };
        blip.set_key(&format!("t1:{n}")).unwrap();
        Arc::new(blip)
    }

    #[tokio::test]
    async fn records_arrive_in_feed_order() {
        let (feeder, iterator) = channel(4);
        tokio::spawn(async move {
            for n in 0..5 {
                assert!(feeder.feed(blip(n)).await);
            }
        });

        let records = iterator.collect().await.unwrap();
        let keys: Vec<_> = records.iter().filter_map(|r| r.database_key()).collect();
        assert_eq!(keys, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn cancel_stops_producers() {
        let (feeder, mut iterator) = channel(1);
        let producer = tokio::spawn(async move {
            let mut sent = 0;
            while feeder.feed(blip(sent)).await {
                sent += 1;
            }
            sent
        });

        assert!(iterator.next().await.is_some());
        iterator.cancel();

        // The producer observes the cancellation in its send-select.
        let sent = producer.await.unwrap();
        assert!(sent < 1000);
    }

    #[tokio::test]
    async fn terminal_error_is_surfaced_after_close() {
        let (feeder, mut iterator) = channel(4);
        tokio::spawn(async move {
            assert!(feeder.feed(blip(1)).await);
            feeder.report_error(Error::NotImplemented);
        });

        assert!(iterator.next().await.is_some());
        assert!(iterator.next().await.is_none());
        assert!(matches!(iterator.error(), Some(Error::NotImplemented)));
    }

    #[tokio::test]
    async fn first_error_wins() {
        let (feeder, iterator) = channel(4);
        feeder.report_error(Error::NotFound);
        feeder.report_error(Error::ReadOnly);
        drop(feeder);

        let err = iterator.collect().await.unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn dropping_iterator_cancels() {
        let (feeder, iterator) = channel(1);
        drop(iterator);
        assert!(feeder.is_cancelled());
        assert!(!feeder.feed(blip(1)).await);
    }
}
