//! The event channel: subscriber registry, durable fan-out and recovery.

use crate::consumer::{Consumer, Dispatcher};
use crate::{
	ChannelError, DeadLetter, DeadLetters, Delivery, EventHandler, EventPublisher, MessageId,
	RedeliveryPolicy,
};
use async_trait::async_trait;
use order_storage::{QueryFilter, StorageService};
use order_types::{truncate_id, EventKind, OrderEvent, StorageKey};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock, Semaphore};
use uuid::Uuid;

struct Subscription {
	name: String,
	kinds: HashSet<EventKind>,
	queue: mpsc::UnboundedSender<Delivery>,
}

struct Inner {
	storage: Arc<StorageService>,
	dead_letters: DeadLetters,
	policy: RedeliveryPolicy,
	max_concurrent_deliveries: usize,
	subscriptions: RwLock<Vec<Subscription>>,
	closed: AtomicBool,
}

/// Durable publish/subscribe channel. Cheap to clone.
#[derive(Clone)]
pub struct EventChannel {
	inner: Arc<Inner>,
}

impl EventChannel {
	pub fn new(
		storage: Arc<StorageService>,
		policy: RedeliveryPolicy,
		max_concurrent_deliveries: usize,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				dead_letters: DeadLetters::new(storage.clone()),
				storage,
				policy,
				max_concurrent_deliveries: max_concurrent_deliveries.max(1),
				subscriptions: RwLock::new(Vec::new()),
				closed: AtomicBool::new(false),
			}),
		}
	}

	pub fn dead_letter_area(&self) -> &DeadLetters {
		&self.inner.dead_letters
	}

	pub fn policy(&self) -> RedeliveryPolicy {
		self.inner.policy
	}

	/// Registers `handler` under `name` for the given event kinds. The
	/// returned consumer must be run for deliveries to be dispatched.
	pub async fn subscribe(
		&self,
		name: impl Into<String>,
		kinds: impl IntoIterator<Item = EventKind>,
		handler: Arc<dyn EventHandler>,
	) -> Result<Consumer, ChannelError> {
		let name = name.into();
		let mut subscriptions = self.inner.subscriptions.write().await;
		if subscriptions.iter().any(|s| s.name == name) {
			return Err(ChannelError::DuplicateSubscriber(name));
		}

		let (queue, receiver) = mpsc::unbounded_channel();
		subscriptions.push(Subscription {
			name: name.clone(),
			kinds: kinds.into_iter().collect(),
			queue,
		});

		tracing::debug!(subscriber = %name, "Registered subscriber");
		let dispatcher = Dispatcher::new(
			name,
			handler,
			self.inner.storage.clone(),
			self.inner.dead_letters.clone(),
			self.inner.policy,
		);
		Ok(Consumer::new(
			dispatcher,
			receiver,
			Arc::new(Semaphore::new(self.inner.max_concurrent_deliveries)),
		))
	}

	/// Stops accepting new messages. Publishing afterwards fails with
	/// [`ChannelError::Unavailable`].
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::SeqCst);
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Re-queues every persisted delivery to its subscriber. Called at
	/// startup, after subscribers are registered, to resume work that was
	/// in flight when the process stopped. Returns the number re-queued.
	pub async fn recover(&self) -> Result<usize, ChannelError> {
		let pending: Vec<(String, Delivery)> = self
			.inner
			.storage
			.query(StorageKey::Deliveries.as_str(), QueryFilter::All)
			.await
			.map_err(|e| ChannelError::Storage(e.to_string()))?;

		let subscriptions = self.inner.subscriptions.read().await;
		let mut requeued = 0;
		for (_, delivery) in pending {
			match subscriptions.iter().find(|s| s.name == delivery.subscriber) {
				Some(subscription) => {
					if subscription.queue.send(delivery).is_ok() {
						requeued += 1;
					}
				},
				None => {
					tracing::warn!(
						delivery_id = %truncate_id(&delivery.id.to_string()),
						subscriber = %delivery.subscriber,
						"Persisted delivery has no registered subscriber"
					);
				},
			}
		}

		if requeued > 0 {
			tracing::info!(requeued, "Recovered pending deliveries");
		}
		Ok(requeued)
	}

	/// Lists parked messages, oldest first.
	pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, ChannelError> {
		self.inner.dead_letters.list().await
	}

	/// Takes a message out of the dead-letter area and delivers it again with
	/// a fresh attempt count. A parked delivery goes back to its subscriber
	/// only; a parked unpublished event is published to everyone.
	pub async fn replay_dead_letter(&self, id: Uuid) -> Result<MessageId, ChannelError> {
		let letter = self.inner.dead_letters.get(id).await?;

		let message_id = match &letter.subscriber {
			None => self.publish(letter.event).await?,
			Some(subscriber) => {
				let message_id = Uuid::new_v4();
				let delivery = Delivery::new(message_id, subscriber.clone(), letter.event);
				self.persist(std::slice::from_ref(&delivery)).await?;

				let subscriptions = self.inner.subscriptions.read().await;
				match subscriptions.iter().find(|s| &s.name == subscriber) {
					Some(subscription) => {
						let _ = subscription.queue.send(delivery);
					},
					None => tracing::warn!(
						subscriber = %subscriber,
						"Replayed delivery persisted for an unregistered subscriber"
					),
				}
				message_id
			},
		};

		self.inner
			.storage
			.remove(StorageKey::DeadLetters.as_str(), &id.to_string())
			.await
			.map_err(|e| ChannelError::Storage(e.to_string()))?;

		tracing::info!(
			dead_letter_id = %truncate_id(&id.to_string()),
			event = %letter.event.kind(),
			"Replayed dead letter"
		);
		Ok(message_id)
	}

	/// Writes deliveries in one unit of work so a fan-out is all or nothing.
	async fn persist(&self, deliveries: &[Delivery]) -> Result<(), ChannelError> {
		let mut uow = self.inner.storage.begin().await;
		for delivery in deliveries {
			uow.put(
				StorageKey::Deliveries.as_str(),
				&delivery.id.to_string(),
				delivery,
			)
			.map_err(|e| ChannelError::Unavailable(e.to_string()))?;
		}
		uow.commit()
			.await
			.map_err(|e| ChannelError::Unavailable(e.to_string()))
	}
}

#[async_trait]
impl EventPublisher for EventChannel {
	async fn publish(&self, event: OrderEvent) -> Result<MessageId, ChannelError> {
		if self.is_closed() {
			return Err(ChannelError::Unavailable("channel is closed".into()));
		}

		let message_id = Uuid::new_v4();
		let subscriptions = self.inner.subscriptions.read().await;
		let targets: Vec<&Subscription> = subscriptions
			.iter()
			.filter(|s| s.kinds.contains(&event.kind()))
			.collect();

		let deliveries: Vec<Delivery> = targets
			.iter()
			.map(|s| Delivery::new(message_id, s.name.clone(), event))
			.collect();
		self.persist(&deliveries).await?;

		for (subscription, delivery) in targets.into_iter().zip(deliveries) {
			if subscription.queue.send(delivery).is_err() {
				// Stays persisted and is picked up by the next recovery.
				tracing::warn!(
					subscriber = %subscription.name,
					"Subscriber queue closed; delivery left for recovery"
				);
			}
		}

		tracing::debug!(
			message_id = %truncate_id(&message_id.to_string()),
			order_id = %truncate_id(&event.order_id().to_string()),
			event = %event.kind(),
			"Published event"
		);
		Ok(message_id)
	}
}
