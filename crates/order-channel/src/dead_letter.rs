//! Dead-letter area backed by the store.

use crate::{ChannelError, DeadLetter};
use order_storage::{QueryFilter, StorageService};
use order_types::{truncate_id, StorageKey};
use std::sync::Arc;
use uuid::Uuid;

/// Parked messages. Nothing here is retried automatically.
#[derive(Clone)]
pub struct DeadLetters {
	storage: Arc<StorageService>,
}

impl DeadLetters {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Stores a parked message.
	pub async fn park(&self, letter: &DeadLetter) -> Result<(), ChannelError> {
		tracing::error!(
			dead_letter_id = %truncate_id(&letter.id.to_string()),
			order_id = %truncate_id(&letter.event.order_id().to_string()),
			event = %letter.event.kind(),
			subscriber = letter.subscriber.as_deref().unwrap_or("-"),
			reason = %letter.reason,
			"Message parked in dead-letter area"
		);
		self.storage
			.store(
				StorageKey::DeadLetters.as_str(),
				&letter.id.to_string(),
				letter,
			)
			.await
			.map_err(|e| ChannelError::Storage(e.to_string()))
	}

	/// Lists parked messages, oldest first.
	pub async fn list(&self) -> Result<Vec<DeadLetter>, ChannelError> {
		let mut letters: Vec<DeadLetter> = self
			.storage
			.query(StorageKey::DeadLetters.as_str(), QueryFilter::All)
			.await
			.map_err(|e| ChannelError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, letter)| letter)
			.collect();
		letters.sort_by_key(|letter| letter.parked_at);
		Ok(letters)
	}

	pub async fn get(&self, id: Uuid) -> Result<DeadLetter, ChannelError> {
		self.storage
			.retrieve_optional(StorageKey::DeadLetters.as_str(), &id.to_string())
			.await
			.map_err(|e| ChannelError::Storage(e.to_string()))?
			.ok_or(ChannelError::DeadLetterNotFound(id))
	}
}
