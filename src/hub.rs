//! The hub replicates every frame from the source to every subscription.
//!
//! The hub runs as a single task which is the only owner of the set of subscriptions.
//! Everyone else talks to it through a [`HubHandle`].
//! Subscribing, unsubscribing and delivering frames is therefore never racing
//! against each other, no matter how many tasks use the handle.
//!
//! Each subscription has its own bounded buffer.
//! What happens when a buffer is full is decided by its [`OverflowPolicy`].

use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::{error::Error, frame::Frame, source::FrameSource};

/// The default number of frames buffered per subscription.
pub const DEFAULT_CAPACITY: usize = 1024;

/// What to do with a frame when a subscriber's buffer is full.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum OverflowPolicy {
    /// Wait until the subscriber has room.
    /// While waiting, no other subscriber gets any frames.
    /// Unsubscribing the subscriber stops the wait.
    Block,

    /// Skip this frame for the full subscriber only.
    #[default]
    DropNewest,

    /// Remove the full subscriber.
    /// It still gets what was already buffered, then its subscription closes.
    Disconnect,
}

impl Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Block => write!(f, "block"),
            OverflowPolicy::DropNewest => write!(f, "drop newest"),
            OverflowPolicy::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Settings for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// How many frames each subscription may have buffered.
    pub capacity: usize,

    /// The [`OverflowPolicy`] of subscriptions made with [`HubHandle::subscribe`].
    pub overflow: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Identifies a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The cancellation tokens of the subscriptions the hub delivers to.
///
/// Shared between the hub task and its handles, so a handle can close a subscription
/// even while the hub task is busy waiting on it.
#[derive(Debug, Clone, Default)]
struct Tokens(Arc<Mutex<HashMap<SubscriptionId, CancellationToken>>>);

impl Tokens {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, CancellationToken>> {
        // Nothing done while holding the lock can leave the map half updated.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: SubscriptionId, token: CancellationToken) {
        self.lock().insert(id, token);
    }

    fn remove(&self, id: SubscriptionId) -> Option<CancellationToken> {
        self.lock().remove(&id)
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

/// A live copy of the frames going through the hub.
///
/// Only frames ingested after [`HubHandle::subscribe`] returned are seen.
/// Dropping this is the same as unsubscribing.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    hub: Uuid,
    frames: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    dropped: Arc<AtomicU64>,
    messages: mpsc::WeakUnboundedSender<HubMessage>,
}

impl Subscription {
    /// The next frame.
    ///
    /// `None` when the subscription is closed.
    /// This happens when unsubscribed, when disconnected by the hub,
    /// or when the source has ended and everything buffered has been read.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;

            _ = self.closed.cancelled() => None,
            frame = self.frames.recv() => frame,
        }
    }

    /// The id of this subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// How many frames were skipped for this subscription because its buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.closed.cancel();

        // Weak, so a subscription outliving every handle does not keep the hub listening.
        if let Some(messages) = self.messages.upgrade() {
            let _ = messages.send(HubMessage::Unsubscribe(self.id));
        }
    }
}

/// The hub's side of a subscription.
#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
    dropped: Arc<AtomicU64>,
    overflow: OverflowPolicy,
}

enum Delivery {
    Delivered,
    Skipped,
    Gone,
}

impl Subscriber {
    async fn deliver(&self, frame: Frame) -> Delivery {
        if self.closed.is_cancelled() {
            return Delivery::Gone;
        }

        if self.overflow == OverflowPolicy::Block {
            return tokio::select! {
                biased;

                _ = self.closed.cancelled() => Delivery::Gone,
                sent = self.sender.send(frame) => match sent {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Gone,
                },
            };
        }

        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
            Err(TrySendError::Full(_)) if self.overflow == OverflowPolicy::DropNewest => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

                // Log the first drop, then less and less often.
                if dropped.is_power_of_two() {
                    warn!(subscription = %self.id, %dropped, "Subscriber is full, dropping frames");
                }

                Delivery::Skipped
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscription = %self.id, "Subscriber is full, disconnecting it");
                Delivery::Gone
            }
        }
    }
}

enum HubMessage {
    /// `None` means the configured policy.
    Subscribe(Option<OverflowPolicy>, oneshot::Sender<Subscription>),
    Unsubscribe(SubscriptionId),
    Count(oneshot::Sender<usize>),
}

impl std::fmt::Debug for HubMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubMessage::Subscribe(Some(overflow), _) => write!(f, "Subscribe({overflow})"),
            HubMessage::Subscribe(None, _) => write!(f, "Subscribe"),
            HubMessage::Unsubscribe(id) => write!(f, "Unsubscribe({id})"),
            HubMessage::Count(_) => write!(f, "Count"),
        }
    }
}

struct Hub {
    id: Uuid,

    config: HubConfig,

    /// Requests for the hub to handle.
    messages: mpsc::UnboundedReceiver<HubMessage>,

    /// Handed to subscriptions so dropping one tells the hub.
    weak_messages: mpsc::WeakUnboundedSender<HubMessage>,

    /// Where frames come from.
    source: FrameSource,

    /// Kept in the order they subscribed.
    subscribers: Vec<Subscriber>,

    tokens: Tokens,
}

impl Hub {
    fn subscribe(&mut self, overflow: OverflowPolicy) -> Subscription {
        let (sender, frames) = mpsc::channel(self.config.capacity.max(1));
        let closed = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));
        let id = SubscriptionId::new();

        self.tokens.insert(id, closed.clone());
        self.subscribers.push(Subscriber {
            id,
            sender,
            closed: closed.clone(),
            dropped: dropped.clone(),
            overflow,
        });

        debug!(subscription = %id, %overflow, subscribers = self.subscribers.len(), "Subscribed");

        Subscription {
            id,
            hub: self.id,
            frames,
            closed,
            dropped,
            messages: self.weak_messages.clone(),
        }
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        let Some(index) = self
            .subscribers
            .iter()
            .position(|subscriber| subscriber.id == id)
        else {
            trace!(subscription = %id, "Unsubscribe of unknown subscription, ignoring");
            return;
        };

        let subscriber = self.subscribers.remove(index);
        subscriber.closed.cancel();
        self.tokens.remove(id);

        debug!(subscription = %id, subscribers = self.subscribers.len(), "Unsubscribed");
    }

    /// Remove the given subscribers without closing them,
    /// so they may still read what they have buffered.
    fn remove(&mut self, ids: &[SubscriptionId]) {
        for id in ids {
            self.tokens.remove(*id);
        }

        self.subscribers
            .retain(|subscriber| !ids.contains(&subscriber.id));
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Subscribe(overflow, response) => {
                let overflow = overflow.unwrap_or(self.config.overflow);

                // If the requester went away the subscription is dropped here,
                // which closes it.
                let _ = response.send(self.subscribe(overflow));
            }
            HubMessage::Unsubscribe(id) => self.unsubscribe(id),
            HubMessage::Count(response) => {
                let _ = response.send(self.subscribers.len());
            }
        }
    }

    async fn broadcast(&mut self, frame: Frame) {
        trace!(%frame, subscribers = self.subscribers.len(), "Broadcasting");

        let mut gone = vec![];

        for subscriber in &self.subscribers {
            match subscriber.deliver(frame.clone()).await {
                Delivery::Delivered | Delivery::Skipped => {}
                Delivery::Gone => gone.push(subscriber.id),
            }
        }

        if !gone.is_empty() {
            self.remove(&gone);

            debug!(
                removed = gone.len(),
                subscribers = self.subscribers.len(),
                "Removed subscriptions found closed during delivery"
            );
        }
    }

    fn spawn(self) {
        tokio::spawn(self.run().instrument(info_span!("hub")));
    }

    async fn run(mut self) {
        info!(capacity = self.config.capacity, overflow = %self.config.overflow, "Hub running");

        let mut handles_alive = true;
        let mut frames = 0u64;

        loop {
            tokio::select! {
                // Requests first, so what has been asked for is in place before the next frame.
                biased;

                message = self.messages.recv(), if handles_alive => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        debug!("All handles dropped, only delivering to existing subscriptions");
                        handles_alive = false;
                    }
                },
                frame = self.source.next() => match frame {
                    Some(frame) => {
                        frames += 1;
                        self.broadcast(frame).await;
                    }
                    None => break,
                },
            }
        }

        info!(
            %frames,
            subscribers = self.subscribers.len(),
            "Source ended, closing all subscriptions"
        );

        // Dropping the senders lets each subscriber read what is buffered, then see the end.
        self.tokens.clear();
        self.subscribers.clear();
    }
}

/// A handle to the hub.
///
/// Cheap to clone, each consumer may hold its own.
#[derive(Debug, Clone)]
pub struct HubHandle {
    id: Uuid,
    messages: mpsc::UnboundedSender<HubMessage>,
    tokens: Tokens,
}

impl HubHandle {
    fn prepare(source: FrameSource, config: HubConfig) -> (Self, Hub) {
        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let tokens = Tokens::default();

        let hub = Hub {
            id,
            config,
            messages: messages_rx,
            weak_messages: messages_tx.downgrade(),
            source,
            subscribers: vec![],
            tokens: tokens.clone(),
        };

        let handle = Self {
            id,
            messages: messages_tx,
            tokens,
        };

        (handle, hub)
    }

    /// Start a hub fed by the given source.
    ///
    /// The hub stops when the source ends.
    pub fn new(source: FrameSource, config: HubConfig) -> Self {
        let (handle, hub) = Self::prepare(source, config);
        hub.spawn();

        handle
    }

    /// Start a hub, with a subscription in place before the first frame is read.
    ///
    /// Use this when a consumer must see the stream from the very start.
    /// The subscription uses the given `overflow`, not the one in `config`.
    pub fn new_subscribed(
        source: FrameSource,
        config: HubConfig,
        overflow: OverflowPolicy,
    ) -> (Self, Subscription) {
        let (handle, mut hub) = Self::prepare(source, config);
        let subscription = hub.subscribe(overflow);
        hub.spawn();

        (handle, subscription)
    }

    async fn request_subscription(
        &self,
        overflow: Option<OverflowPolicy>,
    ) -> Result<Subscription, Error> {
        let (tx, rx) = oneshot::channel();

        self.messages
            .send(HubMessage::Subscribe(overflow, tx))
            .map_err(|_| Error::HubStopped)?;

        rx.await.map_err(|_| Error::HubStopped)
    }

    /// Get a new [`Subscription`], using the hub's configured [`OverflowPolicy`].
    ///
    /// It will see every frame ingested after this returns.
    pub async fn subscribe(&self) -> Result<Subscription, Error> {
        self.request_subscription(None).await
    }

    /// Get a new [`Subscription`] with its own [`OverflowPolicy`].
    pub async fn subscribe_with(&self, overflow: OverflowPolicy) -> Result<Subscription, Error> {
        self.request_subscription(Some(overflow)).await
    }

    /// Stop a subscription.
    ///
    /// Takes effect right away: no more frames are delivered,
    /// a delivery waiting on it is abandoned,
    /// and anyone waiting in [`Subscription::recv`] gets `None`.
    ///
    /// Unsubscribing twice, or a subscription from another hub, does nothing.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if subscription.hub != self.id {
            trace!(subscription = %subscription.id, "Subscription belongs to another hub, ignoring");
            return;
        }

        subscription.closed.cancel();
        self.unsubscribe_id(subscription.id);
    }

    /// Stop a subscription by its id.
    ///
    /// Same as [`HubHandle::unsubscribe`].
    /// Unknown ids are ignored.
    pub fn unsubscribe_id(&self, id: SubscriptionId) {
        // The hub task may be stuck delivering to this very subscription,
        // so it is closed here rather than by the hub.
        if let Some(token) = self.tokens.remove(id) {
            token.cancel();
        }

        // If the hub is gone, so is the subscription.
        let _ = self.messages.send(HubMessage::Unsubscribe(id));
    }

    /// The number of live subscriptions.
    pub async fn subscriber_count(&self) -> Result<usize, Error> {
        let (tx, rx) = oneshot::channel();

        self.messages
            .send(HubMessage::Count(tx))
            .map_err(|_| Error::HubStopped)?;

        rx.await.map_err(|_| Error::HubStopped)
    }

    /// True if the hub has stopped.
    pub fn is_stopped(&self) -> bool {
        self.messages.is_closed()
    }

    /// Completes when the hub has stopped.
    pub async fn stopped(&self) {
        self.messages.closed().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tokio::time::timeout;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    fn hub(config: HubConfig) -> (mpsc::Sender<Frame>, HubHandle) {
        let (frames_tx, frames_rx) = mpsc::channel(16);
        let handle = HubHandle::new(ReceiverStream::new(frames_rx).boxed(), config);

        (frames_tx, handle)
    }

    fn config(capacity: usize, overflow: OverflowPolicy) -> HubConfig {
        HubConfig { capacity, overflow }
    }

    fn numbered(n: u64) -> Frame {
        Frame::from(n.to_be_bytes().to_vec())
    }

    fn number(frame: &Frame) -> u64 {
        u64::from_be_bytes(frame.as_bytes().try_into().unwrap())
    }

    async fn recv(subscription: &mut Subscription) -> Option<Frame> {
        timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("Frame should arrive in time")
    }

    async fn recv_all(subscription: &mut Subscription) -> Vec<Frame> {
        let mut frames = vec![];
        while let Some(frame) = recv(subscription).await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn early_and_late_subscribers() {
        let (source, hub) = hub(HubConfig::default());

        let mut first = hub.subscribe().await.unwrap();
        let mut second = hub.subscribe().await.unwrap();

        source.send("AB".into()).await.unwrap();
        assert_eq!(recv(&mut first).await, Some("AB".into()));

        // The hub is past "AB" once any subscriber has it.
        let mut late = hub.subscribe().await.unwrap();

        source.send("CD".into()).await.unwrap();
        source.send("EF".into()).await.unwrap();
        drop(source);

        let expected: Vec<Frame> = vec!["AB".into(), "CD".into(), "EF".into()];

        let mut first_frames = vec![Frame::from("AB")];
        first_frames.extend(recv_all(&mut first).await);

        assert_eq!(first_frames, expected);
        assert_eq!(recv_all(&mut second).await, expected);
        assert_eq!(recv_all(&mut late).await, expected[1..].to_vec());
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_frame_in_order() {
        let (source, hub) = hub(config(1024, OverflowPolicy::Block));

        let mut subscriptions = vec![];
        for _ in 0..8 {
            subscriptions.push(hub.subscribe().await.unwrap());
        }

        let readers = subscriptions
            .into_iter()
            .map(|mut subscription| tokio::spawn(async move { recv_all(&mut subscription).await }))
            .collect::<Vec<_>>();

        for n in 0..500 {
            source.send(numbered(n)).await.unwrap();
        }
        drop(source);

        for reader in readers {
            let frames = reader.await.unwrap();
            let numbers = frames.iter().map(number).collect::<Vec<_>>();

            assert_eq!(numbers, (0..500).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (_source, hub) = hub(HubConfig::default());

        let subscription = hub.subscribe().await.unwrap();
        let _other = hub.subscribe().await.unwrap();
        assert_eq!(hub.subscriber_count().await.unwrap(), 2);

        hub.unsubscribe(&subscription);
        hub.unsubscribe(&subscription);
        hub.unsubscribe_id(subscription.id());
        hub.unsubscribe_id(SubscriptionId::new());

        assert_eq!(hub.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_of_other_hubs_subscription_does_nothing() {
        let (source, hub) = hub(HubConfig::default());
        let (_other_source, other_hub) = self::hub(HubConfig::default());

        let mut subscription = hub.subscribe().await.unwrap();
        other_hub.unsubscribe(&subscription);

        source.send("still here".into()).await.unwrap();

        assert_eq!(recv(&mut subscription).await, Some("still here".into()));
        assert_eq!(hub.subscriber_count().await.unwrap(), 1);
        assert_eq!(other_hub.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_wakes_waiting_receiver() {
        let (_source, hub) = hub(HubConfig::default());

        let mut subscription = hub.subscribe().await.unwrap();
        let id = subscription.id();

        let waiter = tokio::spawn(async move { subscription.recv().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        hub.unsubscribe_id(id);

        let received = timeout(Duration::from_secs(5), waiter)
            .await
            .expect("Waiting receiver should be woken")
            .unwrap();

        assert_eq!(received, None);
        assert_eq!(hub.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn no_frames_after_unsubscribe() {
        let (source, hub) = hub(HubConfig::default());

        let mut subscription = hub.subscribe().await.unwrap();
        source.send("before".into()).await.unwrap();
        assert_eq!(recv(&mut subscription).await, Some("before".into()));

        hub.unsubscribe(&subscription);
        source.send("after".into()).await.unwrap();

        assert_eq!(recv(&mut subscription).await, None);
    }

    #[tokio::test]
    async fn dropped_subscription_does_not_disturb_others() {
        let (source, hub) = hub(config(4, OverflowPolicy::Block));

        let mut subscriptions = vec![];
        for _ in 0..5 {
            subscriptions.push(hub.subscribe().await.unwrap());
        }

        source.send(numbered(0)).await.unwrap();
        for subscription in &mut subscriptions {
            assert_eq!(recv(subscription).await, Some(numbered(0)));
        }

        // The consumer of this one failed.
        drop(subscriptions.remove(2));

        // More frames than the buffer holds, so a stuck subscriber would stall the hub.
        for n in 1..20 {
            source.send(numbered(n)).await.unwrap();
            for subscription in &mut subscriptions {
                assert_eq!(recv(subscription).await, Some(numbered(n)));
            }
        }

        assert_eq!(hub.subscriber_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn source_end_closes_all_subscriptions() {
        let (source, hub) = hub(HubConfig::default());

        let mut first = hub.subscribe().await.unwrap();
        let mut second = hub.subscribe().await.unwrap();

        source.send("last words".into()).await.unwrap();
        drop(source);

        assert_eq!(recv_all(&mut first).await, vec![Frame::from("last words")]);
        assert_eq!(recv_all(&mut second).await, vec![Frame::from("last words")]);

        timeout(Duration::from_secs(5), hub.stopped())
            .await
            .expect("Hub should stop");

        assert!(hub.is_stopped());
        assert!(matches!(hub.subscribe().await, Err(Error::HubStopped)));
        assert!(matches!(
            hub.subscriber_count().await,
            Err(Error::HubStopped)
        ));
    }

    #[tokio::test]
    async fn drop_newest_only_affects_full_subscriber() {
        let (source, hub) = hub(config(2, OverflowPolicy::DropNewest));

        // Subscribed first, so it has been delivered to when `fast` gets a frame.
        let mut slow = hub.subscribe().await.unwrap();
        let mut fast = hub.subscribe().await.unwrap();

        for n in 0..5 {
            source.send(numbered(n)).await.unwrap();
            assert_eq!(recv(&mut fast).await, Some(numbered(n)));
        }
        drop(source);

        assert_eq!(slow.dropped(), 3);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(recv_all(&mut slow).await, vec![numbered(0), numbered(1)]);
    }

    #[tokio::test]
    async fn disconnect_removes_full_subscriber() {
        let (source, hub) = hub(config(1, OverflowPolicy::Disconnect));

        let mut slow = hub.subscribe().await.unwrap();
        let mut fast = hub.subscribe().await.unwrap();

        for n in 0..3 {
            source.send(numbered(n)).await.unwrap();
            assert_eq!(recv(&mut fast).await, Some(numbered(n)));
        }

        assert_eq!(hub.subscriber_count().await.unwrap(), 1);

        // What was buffered before the disconnect is still there.
        assert_eq!(recv_all(&mut slow).await, vec![numbered(0)]);
    }

    #[tokio::test]
    async fn blocked_delivery_is_released_by_unsubscribe() {
        let (source, hub) = hub(config(1, OverflowPolicy::Block));

        let slow = hub.subscribe().await.unwrap();
        let mut fast = hub.subscribe().await.unwrap();

        source.send(numbered(0)).await.unwrap();
        assert_eq!(recv(&mut fast).await, Some(numbered(0)));

        // `slow` is full, so the hub waits on it.
        source.send(numbered(1)).await.unwrap();
        assert!(timeout(Duration::from_millis(200), fast.recv()).await.is_err());

        hub.unsubscribe(&slow);

        assert_eq!(recv(&mut fast).await, Some(numbered(1)));
    }

    #[tokio::test]
    async fn blocked_delivery_is_released_by_unsubscribe_id() {
        let (source, hub) = hub(config(1, OverflowPolicy::Block));

        let slow = hub.subscribe().await.unwrap();
        let mut fast = hub.subscribe().await.unwrap();

        source.send(numbered(0)).await.unwrap();
        assert_eq!(recv(&mut fast).await, Some(numbered(0)));

        source.send(numbered(1)).await.unwrap();
        assert!(timeout(Duration::from_millis(200), fast.recv()).await.is_err());

        // Only the id is known, like a consumer which gave its subscription away.
        hub.unsubscribe_id(slow.id());

        assert_eq!(recv(&mut fast).await, Some(numbered(1)));
        assert_eq!(hub.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_id_discards_buffered_frames() {
        let (source, hub) = hub(HubConfig::default());

        let mut unread = hub.subscribe().await.unwrap();
        let mut witness = hub.subscribe().await.unwrap();

        source.send("one".into()).await.unwrap();
        source.send("two".into()).await.unwrap();
        assert_eq!(recv(&mut witness).await, Some("one".into()));
        assert_eq!(recv(&mut witness).await, Some("two".into()));

        hub.unsubscribe_id(unread.id());

        assert_eq!(recv(&mut unread).await, None);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_forgotten_without_traffic() {
        let (_source, hub) = hub(HubConfig::default());

        for _ in 0..100 {
            let subscription = hub.subscribe().await.unwrap();
            drop(subscription);
        }

        // No frame has gone through the hub, so nothing was found closed during delivery.
        assert_eq!(hub.subscriber_count().await.unwrap(), 0);
        assert!(hub.tokens.lock().is_empty());
    }

    #[tokio::test]
    async fn subscription_may_override_configured_policy() {
        let (source, hub) = hub(config(2, OverflowPolicy::DropNewest));

        let mut lossless = hub.subscribe_with(OverflowPolicy::Block).await.unwrap();
        let mut lossy = hub.subscribe().await.unwrap();

        let producer = tokio::spawn(async move {
            for n in 0..10 {
                source.send(numbered(n)).await.unwrap();
            }
        });

        let mut numbers = vec![];
        while let Some(frame) = recv(&mut lossless).await {
            numbers.push(number(&frame));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        producer.await.unwrap();

        assert_eq!(numbers, (0..10).collect::<Vec<_>>());
        assert_eq!(lossless.dropped(), 0);
        assert_eq!(lossy.dropped(), 8);
        assert_eq!(recv_all(&mut lossy).await, vec![numbered(0), numbered(1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_subscribe_and_unsubscribe() {
        let (source, hub) = hub(config(8, OverflowPolicy::DropNewest));

        let producer = tokio::spawn(async move {
            let mut n = 0;
            while source.send(numbered(n)).await.is_ok() {
                n += 1;
                if n % 16 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });

        let workers = (0..16u64)
            .map(|seed| {
                let hub = hub.clone();

                tokio::spawn(async move {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut held: Vec<Subscription> = vec![];

                    for _ in 0..200 {
                        match rng.random_range(0..4) {
                            0 | 1 => held.push(hub.subscribe().await.unwrap()),
                            2 if !held.is_empty() => {
                                let index = rng.random_range(0..held.len());
                                let subscription = held.swap_remove(index);
                                hub.unsubscribe(&subscription);

                                if rng.random_bool(0.5) {
                                    hub.unsubscribe(&subscription);
                                }
                            }
                            3 if !held.is_empty() => {
                                let index = rng.random_range(0..held.len());
                                let subscription = &mut held[index];

                                let mut last = None;
                                while let Ok(Some(frame)) =
                                    timeout(Duration::from_millis(1), subscription.recv()).await
                                {
                                    let n = number(&frame);
                                    if let Some(last) = last {
                                        assert!(n > last, "Frames must arrive in order");
                                    }
                                    last = Some(n);
                                }
                            }
                            _ => tokio::task::yield_now().await,
                        }
                    }

                    held
                })
            })
            .collect::<Vec<_>>();

        let mut still_held = vec![];
        for worker in workers {
            still_held.extend(worker.await.unwrap());
        }

        assert_eq!(hub.subscriber_count().await.unwrap(), still_held.len());

        drop(still_held);
        assert_eq!(hub.subscriber_count().await.unwrap(), 0);

        producer.abort();
    }
}
