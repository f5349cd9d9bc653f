//! Live subscriptions: query-scoped feeds of stored records.
//!
//! Delivery is non-blocking by design: a subscriber whose feed buffer is
//! full misses that update but never stalls the writer. Subscribers size
//! their own buffers when subscribing.

use std::sync::Arc;

use rampart_core::{Query, Record};
use tokio::sync::mpsc;

use crate::controller::Controller;

/// Controller-side half of a subscription.
pub(crate) struct Subscription {
    pub(crate) id: u64,
    pub(crate) q: Query,
    pub(crate) local: bool,
    pub(crate) internal: bool,
    pub(crate) sender: mpsc::Sender<Arc<dyn Record>>,
}

impl Subscription {
    /// Delivers an update without blocking. Returns `false` when the
    /// feed has been closed by the subscriber.
    pub(crate) fn deliver(&self, record: &Arc<dyn Record>) -> bool {
        match self.sender.try_send(Arc::clone(record)) {
            Ok(()) => true,
            // A full feed drops the update but keeps the subscription.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Subscriber-side handle: the feed of matching records.
///
/// Dropping the handle closes the feed; [`cancel`](Self::cancel) also
/// removes the subscription from the controller immediately.
pub struct SubscriptionHandle {
    id: u64,
    controller: Arc<Controller>,
    feed: mpsc::Receiver<Arc<dyn Record>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: u64,
        controller: Arc<Controller>,
        feed: mpsc::Receiver<Arc<dyn Record>>,
    ) -> Self {
        Self {
            id,
            controller,
            feed,
        }
    }

    /// The next update, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<Arc<dyn Record>> {
        self.feed.recv().await
    }

    /// A pending update, if one is buffered.
    pub fn try_next(&mut self) -> Option<Arc<dyn Record>> {
        self.feed.try_recv().ok()
    }

    /// Removes the subscription and closes the feed.
    pub fn cancel(mut self) {
        self.controller.remove_subscription(self.id);
        self.feed.close();
    }
}
