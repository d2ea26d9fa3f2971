//! Event bus implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::BusConfig;
use super::context::{DeliveryContext, Task};
use super::subscriber::{Subscriber, SubscriberStats};
use super::topic;

/// Registration returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    topic: String,
}

impl Subscription {
    /// Subscription id, unique per bus
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic subscribed to
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct BusInner<T> {
    context: Arc<dyn DeliveryContext>,
    config: BusConfig,
    topics: RwLock<HashMap<String, Vec<Arc<Subscriber<T>>>>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// Topic-addressed publish/subscribe channel
///
/// Publishing never blocks and never runs subscriber code; callbacks run on
/// the delivery context the bus was built with. Cheap to clone: all clones
/// share the same subscriptions.
pub struct EventBus<T> {
    inner: Arc<BusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus delivering onto `context`
    pub fn new(context: Arc<dyn DeliveryContext>, config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                context,
                config,
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Get the bus configuration
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Publish `item` to every subscriber of `topic`
    ///
    /// With hierarchical delivery, subscribers of parent scopes receive it
    /// too. Full buffers apply the overflow policy; this call never blocks
    /// on a subscriber. Returns the number of subscribers the item was
    /// offered to.
    pub fn publish(&self, topic: &str, item: T) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<Subscriber<T>>> = {
            let topics = self.inner.topics.read();
            let mut targets = Vec::new();
            if self.inner.config.hierarchical {
                for scope in topic::scopes(topic) {
                    if let Some(subscribers) = topics.get(scope) {
                        targets.extend(subscribers.iter().cloned());
                    }
                }
            } else if let Some(subscribers) = topics.get(topic) {
                targets.extend(subscribers.iter().cloned());
            }
            targets
        };

        for subscriber in &targets {
            if subscriber.offer(item.clone()) {
                schedule_drain(
                    Arc::clone(&self.inner.context),
                    Arc::clone(subscriber),
                    self.inner.config.max_batch.max(1),
                );
            }
        }

        tracing::trace!(topic = %topic, subscribers = targets.len(), "Published");

        targets.len()
    }

    /// Register `callback` for items published on `topic`
    ///
    /// The callback runs on the delivery context, never on the publisher's
    /// thread.
    pub fn subscribe<F>(&self, topic: impl Into<String>, callback: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(
            id,
            topic.clone(),
            self.inner.config.subscriber_capacity,
            self.inner.config.overflow,
            Box::new(callback),
        ));

        self.inner
            .topics
            .write()
            .entry(topic.clone())
            .or_default()
            .push(subscriber);

        tracing::debug!(topic = %topic, subscription = id, "Subscribed");

        Subscription { id, topic }
    }

    /// Remove a subscription
    ///
    /// No item published after this returns is delivered to it. Returns
    /// `false` if the subscription was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let removed = {
            let mut topics = self.inner.topics.write();
            let Some(subscribers) = topics.get_mut(&subscription.topic) else {
                return false;
            };
            let Some(index) = subscribers.iter().position(|s| s.id() == subscription.id) else {
                return false;
            };
            let removed = subscribers.remove(index);
            if subscribers.is_empty() {
                topics.remove(&subscription.topic);
            }
            removed
        };

        removed.deactivate();
        tracing::debug!(
            topic = %removed.topic(),
            subscription = subscription.id,
            "Unsubscribed"
        );
        true
    }

    /// Number of subscribers registered exactly on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Delivery counters for a subscription
    pub fn stats(&self, subscription: &Subscription) -> Option<SubscriberStats> {
        self.inner
            .topics
            .read()
            .get(&subscription.topic)?
            .iter()
            .find(|s| s.id() == subscription.id)
            .map(|s| s.stats())
    }

    /// Total number of publish calls
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

fn schedule_drain<T: Send + 'static>(
    context: Arc<dyn DeliveryContext>,
    subscriber: Arc<Subscriber<T>>,
    max_batch: usize,
) {
    let next_context = Arc::clone(&context);
    let next_subscriber = Arc::clone(&subscriber);
    let task: Task = Box::new(move || {
        if next_subscriber.drain(max_batch) {
            schedule_drain(next_context, next_subscriber, max_batch);
        }
    });

    if context.schedule(task).is_err() {
        subscriber.unschedule();
        tracing::debug!(
            topic = %subscriber.topic(),
            subscription = subscriber.id(),
            "Delivery context closed, item left undelivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::*;
    use crate::bus::OverflowPolicy;
    use crate::test_support::ManualContext;

    fn collector() -> (Arc<Mutex<Vec<u32>>>, impl FnMut(u32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |item| sink.lock().push(item))
    }

    #[test]
    fn test_k_items_delivered_in_order() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default().max_batch(4));
        let (seen, callback) = collector();
        bus.subscribe("camera/front/frame", callback);

        for i in 0..50 {
            bus.publish("camera/front/frame", i);
        }

        // Nothing runs on the publisher's thread
        assert!(seen.lock().is_empty());

        context.run_pending();
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_callback_runs_on_delivery_context() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default());
        let thread_name = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&thread_name);
        bus.subscribe("t", move |_: u32| {
            *seen.lock() = thread::current().name().map(str::to_owned);
        });

        let publisher = {
            let bus = bus.clone();
            thread::Builder::new()
                .name("producer".into())
                .spawn(move || bus.publish("t", 1))
                .unwrap()
        };
        assert_eq!(publisher.join().unwrap(), 1);
        assert!(thread_name.lock().is_none());

        let delivery = thread::Builder::new()
            .name("delivery".into())
            .spawn(move || context.run_pending())
            .unwrap();
        assert_eq!(delivery.join().unwrap(), 1);
        assert_eq!(thread_name.lock().as_deref(), Some("delivery"));
    }

    #[test]
    fn test_overflow_drop_oldest() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default().capacity(3));
        let (seen, callback) = collector();
        let sub = bus.subscribe("t", callback);

        for i in 0..10 {
            bus.publish("t", i);
        }
        context.run_pending();

        assert_eq!(*seen.lock(), vec![7, 8, 9]);
        let stats = bus.stats(&sub).unwrap();
        assert_eq!(stats.dropped, 7);
        assert_eq!(stats.delivered, 3);
    }

    #[test]
    fn test_overflow_drop_newest() {
        let context = ManualContext::new();
        let config = BusConfig::default()
            .capacity(3)
            .overflow(OverflowPolicy::DropNewest);
        let bus = EventBus::new(context.clone(), config);
        let (seen, callback) = collector();
        bus.subscribe("t", callback);

        for i in 0..10 {
            bus.publish("t", i);
        }
        context.run_pending();

        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_publish_never_blocks_on_stalled_subscriber() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default().capacity(8));
        bus.subscribe("t", |_: u32| thread::sleep(Duration::from_secs(10)));

        let started = Instant::now();
        for i in 0..10_000 {
            bus.publish("t", i);
        }
        assert!(started.elapsed() < Duration::from_secs(2));

        // One drain task queued, never one per item
        assert_eq!(context.pending(), 1);
    }

    #[test]
    fn test_hierarchical_delivery() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default());
        let (camera_seen, camera_cb) = collector();
        let (all_seen, all_cb) = collector();
        let (other_seen, other_cb) = collector();
        bus.subscribe("camera/front", camera_cb);
        bus.subscribe("camera", all_cb);
        bus.subscribe("camera/back", other_cb);

        assert_eq!(bus.publish("camera/front/frame", 1), 2);
        bus.publish("camera/back/frame", 2);
        context.run_pending();

        assert_eq!(*camera_seen.lock(), vec![1]);
        assert_eq!(*all_seen.lock(), vec![1, 2]);
        assert_eq!(*other_seen.lock(), vec![2]);
    }

    #[test]
    fn test_flat_delivery_exact_topic_only() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default().flat());
        let (seen, callback) = collector();
        bus.subscribe("camera", callback);

        assert_eq!(bus.publish("camera/front/frame", 1), 0);
        bus.publish("camera", 2);
        context.run_pending();

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default());
        let (seen, callback) = collector();
        let sub = bus.subscribe("t", callback);

        bus.publish("t", 1);
        context.run_pending();

        assert!(bus.unsubscribe(&sub));
        assert!(!bus.unsubscribe(&sub));
        assert_eq!(bus.publish("t", 2), 0);
        context.run_pending();

        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[test]
    fn test_closed_context_does_not_fail_publisher() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default());
        let (seen, callback) = collector();
        bus.subscribe("t", callback);

        context.close();
        assert_eq!(bus.publish("t", 1), 1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_concurrent_publishers_keep_per_publisher_order() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default().capacity(10_000));
        let (seen, callback) = collector();
        bus.subscribe("t", callback);

        let publishers: Vec<_> = (0..4u32)
            .map(|p| {
                let bus = bus.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        bus.publish("t", p * 1000 + i);
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }
        context.run_pending();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2000);
        for p in 0..4u32 {
            let items: Vec<_> = seen.iter().filter(|i| *i / 1000 == p).collect();
            assert!(items.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_panicking_callback_keeps_subscription_alive() {
        let context = ManualContext::new();
        let bus = EventBus::new(context.clone(), BusConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.subscribe("t", move |item: u32| {
            if item == 1 {
                panic!("bad item");
            }
            sink.lock().push(item);
        });

        bus.publish("t", 1);
        context.run_pending();

        for i in 2..=4 {
            bus.publish("t", i);
        }
        context.run_pending();

        assert_eq!(*seen.lock(), vec![2, 3, 4]);
        let stats = bus.stats(&sub).unwrap();
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.queued, 0);
    }
}
