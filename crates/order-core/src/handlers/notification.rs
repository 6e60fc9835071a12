//! Notification recorder for terminal orders.
//!
//! Writes one audit [`Notification`] per `(order, kind)`. For completed
//! orders it also sends a best-effort notice to the owner first; a failed
//! notice is logged and the record is still written.

use async_trait::async_trait;
use order_channel::{EventHandler, HandlerFault};
use order_notify::{Notice, NotifyService};
use order_storage::{StorageError, StorageService};
use order_types::{truncate_id, Notification, NotificationKind, Order, OrderEvent, StorageKey};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

/// Errors that can occur while recording a notification.
#[derive(Debug, Error)]
pub enum RecorderError {
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for RecorderError {
	fn from(err: StorageError) -> Self {
		RecorderError::Storage(err.to_string())
	}
}

/// What the recorder did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
	/// A new notification was written.
	Recorded,
	/// A notification for this order and kind already existed.
	Duplicate,
	/// The event does not lead to a notification.
	Ignored,
}

pub struct NotificationRecorder {
	storage: Arc<StorageService>,
	notifier: Arc<NotifyService>,
}

impl NotificationRecorder {
	pub fn new(storage: Arc<StorageService>, notifier: Arc<NotifyService>) -> Self {
		Self { storage, notifier }
	}

	/// Records the notification for `event`, at most once per order and kind.
	#[instrument(skip_all, fields(
		order_id = %truncate_id(&event.order_id().to_string()),
		event = %event.kind()
	))]
	pub async fn record(&self, event: OrderEvent) -> Result<RecordOutcome, RecorderError> {
		let (order_id, kind) = match event {
			OrderEvent::Completed { order_id } => (order_id, NotificationKind::Completed),
			OrderEvent::Expired { order_id } => (order_id, NotificationKind::Expired),
			OrderEvent::Created { .. } => return Ok(RecordOutcome::Ignored),
		};
		let key = Notification::key(&order_id, kind);

		// Cheap pre-check so a redelivery does not resend the notice.
		if self
			.storage
			.exists(StorageKey::Notifications.as_str(), &key)
			.await?
		{
			tracing::debug!("Notification already recorded");
			return Ok(RecordOutcome::Duplicate);
		}

		if kind == NotificationKind::Completed {
			self.send_notice(order_id).await?;
		}

		let mut uow = self.storage.begin().await;
		if uow
			.get::<Notification>(StorageKey::Notifications.as_str(), &key)
			.await?
			.is_some()
		{
			return Ok(RecordOutcome::Duplicate);
		}
		let notification = Notification::new(order_id, kind, message_for(order_id, kind));
		uow.put(StorageKey::Notifications.as_str(), &key, &notification)?;
		uow.commit().await?;

		tracing::info!(kind = kind.as_str(), "Notification recorded");
		Ok(RecordOutcome::Recorded)
	}

	async fn send_notice(&self, order_id: Uuid) -> Result<(), RecorderError> {
		let Some(order) = self
			.storage
			.retrieve_optional::<Order>(StorageKey::Orders.as_str(), &order_id.to_string())
			.await?
		else {
			tracing::warn!("Order not found; skipping notice");
			return Ok(());
		};

		let notice = Notice {
			order_id,
			owner_id: order.owner_id,
			kind: NotificationKind::Completed,
			message: message_for(order_id, NotificationKind::Completed),
		};
		if let Err(e) = self.notifier.notify(&notice).await {
			tracing::warn!(error = %e, "Failed to send completion notice");
		}
		Ok(())
	}
}

fn message_for(order_id: Uuid, kind: NotificationKind) -> String {
	match kind {
		NotificationKind::Completed => format!("Order {} has been completed", order_id),
		NotificationKind::Expired => {
			format!("Order {} expired before processing finished", order_id)
		},
	}
}

#[async_trait]
impl EventHandler for NotificationRecorder {
	async fn handle(&self, event: OrderEvent) -> Result<(), HandlerFault> {
		self.record(event)
			.await
			.map(|_| ())
			.map_err(HandlerFault::new)
	}
}
