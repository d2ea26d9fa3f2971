//! Per-subscriber buffering
//!
//! Each subscriber owns a bounded inbox. Publishers only ever append to the
//! inbox (applying the overflow policy when it is full); the delivery
//! context drains it and invokes the callback. At most one drain per
//! subscriber is scheduled at a time, which keeps per-subscriber delivery in
//! publish order.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::config::OverflowPolicy;

pub(crate) type Callback<T> = Box<dyn FnMut(T) + Send + 'static>;

struct Inbox<T> {
    items: VecDeque<T>,
    /// A drain task is queued on the delivery context
    scheduled: bool,
}

/// Delivery counters for one subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Items handed to the callback
    pub delivered: u64,
    /// Items discarded by the overflow policy
    pub dropped: u64,
    /// Items waiting in the inbox
    pub queued: usize,
    /// Callback invocations that panicked
    pub panicked: u64,
}

pub(crate) struct Subscriber<T> {
    id: u64,
    topic: String,
    capacity: usize,
    policy: OverflowPolicy,
    inbox: Mutex<Inbox<T>>,
    callback: Mutex<Callback<T>>,
    active: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

impl<T: Send + 'static> Subscriber<T> {
    pub(crate) fn new(
        id: u64,
        topic: String,
        capacity: usize,
        policy: OverflowPolicy,
        callback: Callback<T>,
    ) -> Self {
        Self {
            id,
            topic,
            capacity: capacity.max(1),
            policy,
            inbox: Mutex::new(Inbox {
                items: VecDeque::new(),
                scheduled: false,
            }),
            callback: Mutex::new(callback),
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    /// Append an item to the inbox
    ///
    /// Returns `true` if the caller must schedule a drain.
    pub(crate) fn offer(&self, item: T) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }

        let mut inbox = self.inbox.lock();
        if inbox.items.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match self.policy {
                OverflowPolicy::DropOldest => {
                    inbox.items.pop_front();
                    inbox.items.push_back(item);
                }
                OverflowPolicy::DropNewest => {}
            }
        } else {
            inbox.items.push_back(item);
        }

        if inbox.scheduled {
            false
        } else {
            inbox.scheduled = true;
            true
        }
    }

    /// Deliver up to `max_batch` items; must run on the delivery context
    ///
    /// Returns `true` if items remain and another drain must be scheduled.
    pub(crate) fn drain(&self, max_batch: usize) -> bool {
        let batch: Vec<T> = {
            let mut inbox = self.inbox.lock();
            let take = inbox.items.len().min(max_batch);
            inbox.items.drain(..take).collect()
        };

        {
            let mut callback = self.callback.lock();
            for item in batch {
                if !self.active.load(Ordering::Acquire) {
                    break;
                }
                // A panicking callback loses that item only
                if panic::catch_unwind(AssertUnwindSafe(|| callback(item))).is_err() {
                    self.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        topic = %self.topic,
                        subscription = self.id,
                        "Subscriber callback panicked"
                    );
                    continue;
                }
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut inbox = self.inbox.lock();
        if inbox.items.is_empty() || !self.active.load(Ordering::Acquire) {
            inbox.scheduled = false;
            false
        } else {
            true
        }
    }

    /// Forget that a drain is queued (the context refused it)
    pub(crate) fn unschedule(&self) {
        self.inbox.lock().scheduled = false;
    }

    /// Stop accepting and delivering items
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.inbox.lock().items.clear();
    }

    pub(crate) fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            queued: self.inbox.lock().items.len(),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}
