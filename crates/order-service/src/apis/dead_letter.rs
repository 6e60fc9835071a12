//! Dead-letter inspection and replay.

use super::parse_id;
use order_channel::{ChannelError, DeadLetter};
use order_core::OrderEngine;
use order_types::APIError;
use serde::Serialize;
use uuid::Uuid;

/// Response of a successful replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
	#[serde(rename = "messageId")]
	pub message_id: Uuid,
}

/// Lists every parked message, oldest first.
pub async fn list_dead_letters(engine: &OrderEngine) -> Result<Vec<DeadLetter>, APIError> {
	let mut letters = engine.channel().dead_letters().await.map_err(map_channel_error)?;
	letters.sort_by_key(|l| l.parked_at);
	Ok(letters)
}

/// Takes one message out of the dead-letter area and delivers it again.
pub async fn replay_dead_letter(id: &str, engine: &OrderEngine) -> Result<ReplayResponse, APIError> {
	let letter_id = parse_id(id, "INVALID_DEAD_LETTER_ID", "Dead letter ID")?;

	engine
		.channel()
		.replay_dead_letter(letter_id)
		.await
		.map(|message_id| ReplayResponse { message_id })
		.map_err(map_channel_error)
}

fn map_channel_error(e: ChannelError) -> APIError {
	match e {
		ChannelError::DeadLetterNotFound(id) => APIError::NotFound {
			error_type: "DEAD_LETTER_NOT_FOUND".to_string(),
			message: format!("Dead letter not found: {}", id),
		},
		ChannelError::Unavailable(message) => APIError::Conflict {
			error_type: "CHANNEL_UNAVAILABLE".to_string(),
			message,
			details: None,
		},
		other => super::internal(other),
	}
}
