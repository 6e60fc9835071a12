//! Subscriber-side dispatch loop with acknowledgement and redelivery.

use crate::records::NextStep;
use crate::{DeadLetter, DeadLetters, Delivery, EventHandler, RedeliveryPolicy};
use order_storage::StorageService;
use order_types::{truncate_id, StorageKey};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Runs one subscriber's handler over its delivery queue.
pub struct Consumer {
	dispatcher: Arc<Dispatcher>,
	receiver: mpsc::UnboundedReceiver<Delivery>,
	semaphore: Arc<Semaphore>,
}

impl Consumer {
	pub(crate) fn new(
		dispatcher: Dispatcher,
		receiver: mpsc::UnboundedReceiver<Delivery>,
		semaphore: Arc<Semaphore>,
	) -> Self {
		Self {
			dispatcher: Arc::new(dispatcher),
			receiver,
			semaphore,
		}
	}

	pub fn subscriber(&self) -> &str {
		&self.dispatcher.subscriber
	}

	/// Dispatches deliveries concurrently until `shutdown` is cancelled, then
	/// waits for in-flight handlers to finish. Deliveries still queued at that
	/// point remain persisted for the next recovery.
	pub async fn run(mut self, shutdown: CancellationToken) {
		tracing::info!(subscriber = %self.dispatcher.subscriber, "Consumer started");
		let mut in_flight = JoinSet::new();

		loop {
			tokio::select! {
				biased;

				_ = shutdown.cancelled() => break,

				Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
					if let Err(e) = joined {
						tracing::error!(
							subscriber = %self.dispatcher.subscriber,
							error = %e,
							"Delivery task aborted; the delivery stays persisted"
						);
					}
				}

				received = self.receiver.recv() => {
					let Some(delivery) = received else { break };
					let permit = tokio::select! {
						_ = shutdown.cancelled() => break,
						permit = self.semaphore.clone().acquire_owned() => match permit {
							Ok(permit) => permit,
							Err(_) => break,
						},
					};

					let dispatcher = self.dispatcher.clone();
					let shutdown = shutdown.clone();
					in_flight.spawn(async move {
						let _permit = permit;
						dispatcher.dispatch(delivery, shutdown).await;
					});
				}
			}
		}

		let pending = in_flight.len();
		if pending > 0 {
			tracing::info!(
				subscriber = %self.dispatcher.subscriber,
				pending,
				"Waiting for in-flight deliveries"
			);
		}
		while let Some(joined) = in_flight.join_next().await {
			if let Err(e) = joined {
				tracing::error!(error = %e, "Delivery task aborted during shutdown");
			}
		}
		tracing::info!(subscriber = %self.dispatcher.subscriber, "Consumer stopped");
	}
}

/// Invokes the handler for one delivery and applies the redelivery policy.
pub(crate) struct Dispatcher {
	subscriber: String,
	handler: Arc<dyn EventHandler>,
	storage: Arc<StorageService>,
	dead_letters: DeadLetters,
	policy: RedeliveryPolicy,
}

impl Dispatcher {
	pub(crate) fn new(
		subscriber: String,
		handler: Arc<dyn EventHandler>,
		storage: Arc<StorageService>,
		dead_letters: DeadLetters,
		policy: RedeliveryPolicy,
	) -> Self {
		Self {
			subscriber,
			handler,
			storage,
			dead_letters,
			policy,
		}
	}

	#[instrument(skip_all, fields(
		subscriber = %self.subscriber,
		event = %delivery.event.kind(),
		order_id = %truncate_id(&delivery.event.order_id().to_string()),
	))]
	async fn dispatch(&self, mut delivery: Delivery, shutdown: CancellationToken) {
		loop {
			delivery.attempts += 1;
			let fault = match self.handler.handle(delivery.event).await {
				Ok(()) => {
					self.acknowledge(&delivery).await;
					return;
				},
				Err(fault) => fault,
			};

			delivery.last_error = Some(fault.to_string());
			match self.policy.next_step(delivery.attempts) {
				NextStep::RetryNow => {
					tracing::warn!(
						attempt = delivery.attempts,
						error = %fault,
						"Handler failed; retrying immediately"
					);
				},
				NextStep::RetryAfter(delay) => {
					tracing::warn!(
						attempt = delivery.attempts,
						error = %fault,
						delay_ms = delay.as_millis() as u64,
						"Handler failed; scheduling delayed retry"
					);
					self.save_progress(&delivery).await;
					tokio::select! {
						_ = shutdown.cancelled() => {
							tracing::info!("Shutdown during retry delay; delivery left for recovery");
							return;
						}
						_ = tokio::time::sleep(delay) => {}
					}
				},
				NextStep::Park => {
					self.park(&delivery).await;
					return;
				},
			}
		}
	}

	async fn acknowledge(&self, delivery: &Delivery) {
		if let Err(e) = self
			.storage
			.remove(StorageKey::Deliveries.as_str(), &delivery.id.to_string())
			.await
		{
			// Unacknowledged deliveries are redelivered after recovery.
			tracing::error!(error = %e, "Failed to acknowledge delivery");
		}
	}

	/// Persists the attempt count so a recovered delivery continues the policy.
	async fn save_progress(&self, delivery: &Delivery) {
		if let Err(e) = self
			.storage
			.store(
				StorageKey::Deliveries.as_str(),
				&delivery.id.to_string(),
				delivery,
			)
			.await
		{
			tracing::warn!(error = %e, "Failed to persist delivery progress");
		}
	}

	/// Moves the delivery to the dead-letter area in one unit of work.
	async fn park(&self, delivery: &Delivery) {
		let letter = DeadLetter::from_delivery(delivery);
		if let Err(e) = self.dead_letters.park(&letter).await {
			tracing::error!(error = %e, "Failed to park delivery; it stays pending");
			return;
		}
		self.acknowledge(delivery).await;
	}
}

#[cfg(test)]
mod tests {
	use crate::{
		ChannelError, EventChannel, EventHandler, EventPublisher, HandlerFault, RedeliveryPolicy,
	};
	use async_trait::async_trait;
	use order_storage::{implementations::memory::MemoryStorage, QueryFilter, StorageService};
	use order_types::{EventKind, OrderEvent, StorageKey};
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::{Arc, Mutex};
	use std::time::Duration;
	use tokio_util::sync::CancellationToken;
	use uuid::Uuid;

	/// Records events and fails the first `failures` invocations.
	struct Recorder {
		seen: Mutex<Vec<OrderEvent>>,
		calls: AtomicU32,
		failures: u32,
	}

	impl Recorder {
		fn new(failures: u32) -> Arc<Self> {
			Arc::new(Self {
				seen: Mutex::new(Vec::new()),
				calls: AtomicU32::new(0),
				failures,
			})
		}

		fn seen(&self) -> Vec<OrderEvent> {
			self.seen.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl EventHandler for Recorder {
		async fn handle(&self, event: OrderEvent) -> Result<(), HandlerFault> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if call <= self.failures {
				return Err(HandlerFault::new(format!("failure {}", call)));
			}
			self.seen.lock().unwrap().push(event);
			Ok(())
		}
	}

	fn storage() -> Arc<StorageService> {
		Arc::new(StorageService::new(Box::new(MemoryStorage::new())))
	}

	fn policy() -> RedeliveryPolicy {
		RedeliveryPolicy {
			immediate_retries: 2,
			delayed_retries: 2,
			retry_delay: Duration::from_millis(5),
		}
	}

	fn created() -> OrderEvent {
		OrderEvent::Created {
			order_id: Uuid::new_v4(),
		}
	}

	async fn pending_deliveries(storage: &StorageService) -> usize {
		storage
			.query::<serde_json::Value>(StorageKey::Deliveries.as_str(), QueryFilter::All)
			.await
			.unwrap()
			.len()
	}

	/// Polls `check` until it holds or two seconds pass.
	async fn eventually<F, Fut>(mut check: F)
	where
		F: FnMut() -> Fut,
		Fut: std::future::Future<Output = bool>,
	{
		for _ in 0..200 {
			if check().await {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("condition not reached in time");
	}

	#[tokio::test]
	async fn test_fan_out_by_kind_and_acknowledge() {
		let storage = storage();
		let channel = EventChannel::new(storage.clone(), policy(), 4);
		let processing = Recorder::new(0);
		let recorder = Recorder::new(0);

		let shutdown = CancellationToken::new();
		let consumer = channel
			.subscribe("processing", [EventKind::OrderCreated], processing.clone())
			.await
			.unwrap();
		tokio::spawn(consumer.run(shutdown.clone()));
		let consumer = channel
			.subscribe(
				"recorder",
				[EventKind::OrderCompleted, EventKind::OrderExpired],
				recorder.clone(),
			)
			.await
			.unwrap();
		tokio::spawn(consumer.run(shutdown.clone()));

		let event = created();
		channel.publish(event).await.unwrap();
		let completed = OrderEvent::Completed {
			order_id: event.order_id(),
		};
		channel.publish(completed).await.unwrap();

		eventually(|| async { pending_deliveries(&storage).await == 0 }).await;
		assert_eq!(processing.seen(), vec![event]);
		assert_eq!(recorder.seen(), vec![completed]);
		shutdown.cancel();
	}

	#[tokio::test]
	async fn test_duplicate_subscriber_rejected() {
		let channel = EventChannel::new(storage(), policy(), 1);
		channel
			.subscribe("processing", [EventKind::OrderCreated], Recorder::new(0))
			.await
			.unwrap();
		let second = channel
			.subscribe("processing", [EventKind::OrderCreated], Recorder::new(0))
			.await;
		assert!(matches!(second, Err(ChannelError::DuplicateSubscriber(_))));
	}

	#[tokio::test]
	async fn test_transient_faults_are_redelivered() {
		let storage = storage();
		let channel = EventChannel::new(storage.clone(), policy(), 4);
		// Fails through both immediate retries and the first delayed one.
		let handler = Recorder::new(3);

		let shutdown = CancellationToken::new();
		let consumer = channel
			.subscribe("processing", [EventKind::OrderCreated], handler.clone())
			.await
			.unwrap();
		tokio::spawn(consumer.run(shutdown.clone()));

		channel.publish(created()).await.unwrap();

		eventually(|| async { handler.seen().len() == 1 }).await;
		eventually(|| async { pending_deliveries(&storage).await == 0 }).await;
		assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
		assert!(channel.dead_letters().await.unwrap().is_empty());
		shutdown.cancel();
	}

	#[tokio::test]
	async fn test_exhausted_delivery_is_parked_and_replayable() {
		let storage = storage();
		let channel = EventChannel::new(storage.clone(), policy(), 4);
		// Fails on every attempt the policy allows, then succeeds on replay.
		let handler = Recorder::new(policy().max_attempts());

		let shutdown = CancellationToken::new();
		let consumer = channel
			.subscribe("processing", [EventKind::OrderCreated], handler.clone())
			.await
			.unwrap();
		tokio::spawn(consumer.run(shutdown.clone()));

		let event = created();
		channel.publish(event).await.unwrap();

		eventually(|| async { channel.dead_letters().await.unwrap().len() == 1 }).await;
		let letters = channel.dead_letters().await.unwrap();
		assert_eq!(letters[0].attempts, 5);
		assert_eq!(letters[0].reason, "failure 5");
		assert_eq!(letters[0].subscriber.as_deref(), Some("processing"));
		eventually(|| async { pending_deliveries(&storage).await == 0 }).await;

		channel.replay_dead_letter(letters[0].id).await.unwrap();
		eventually(|| async { handler.seen() == vec![event] }).await;
		assert!(channel.dead_letters().await.unwrap().is_empty());
		shutdown.cancel();
	}

	#[tokio::test]
	async fn test_recover_requeues_persisted_deliveries() {
		let storage = storage();
		let event = created();

		{
			// The consumer is never run, as if the process died before dispatch.
			let channel = EventChannel::new(storage.clone(), policy(), 4);
			let _consumer = channel
				.subscribe("processing", [EventKind::OrderCreated], Recorder::new(0))
				.await
				.unwrap();
			channel.publish(event).await.unwrap();
		}
		assert_eq!(pending_deliveries(&storage).await, 1);

		let channel = EventChannel::new(storage.clone(), policy(), 4);
		let handler = Recorder::new(0);
		let consumer = channel
			.subscribe("processing", [EventKind::OrderCreated], handler.clone())
			.await
			.unwrap();
		assert_eq!(channel.recover().await.unwrap(), 1);

		let shutdown = CancellationToken::new();
		tokio::spawn(consumer.run(shutdown.clone()));
		eventually(|| async { pending_deliveries(&storage).await == 0 }).await;
		assert_eq!(handler.seen(), vec![event]);
		shutdown.cancel();
	}

	#[tokio::test]
	async fn test_closed_channel_is_unavailable() {
		let channel = EventChannel::new(storage(), policy(), 1);
		channel.close();
		assert!(matches!(
			channel.publish(created()).await,
			Err(ChannelError::Unavailable(_))
		));
	}

	#[tokio::test]
	async fn test_shutdown_waits_for_in_flight_handler() {
		struct Slow(Arc<AtomicU32>);

		#[async_trait]
		impl EventHandler for Slow {
			async fn handle(&self, _event: OrderEvent) -> Result<(), HandlerFault> {
				tokio::time::sleep(Duration::from_millis(50)).await;
				self.0.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		}

		let storage = storage();
		let channel = EventChannel::new(storage.clone(), policy(), 4);
		let finished = Arc::new(AtomicU32::new(0));
		let consumer = channel
			.subscribe(
				"processing",
				[EventKind::OrderCreated],
				Arc::new(Slow(finished.clone())),
			)
			.await
			.unwrap();

		let shutdown = CancellationToken::new();
		let running = tokio::spawn(consumer.run(shutdown.clone()));
		channel.publish(created()).await.unwrap();
		tokio::time::sleep(Duration::from_millis(10)).await;

		shutdown.cancel();
		running.await.unwrap();
		assert_eq!(finished.load(Ordering::SeqCst), 1);
		assert_eq!(pending_deliveries(&storage).await, 0);
	}
}
