//! API endpoint implementations for the order flow service.

pub mod dead_letter;
pub mod order;
pub mod product;

use order_types::APIError;
use uuid::Uuid;

/// Parses a path identifier, mapping a malformed value to a 400 with the
/// given error code.
pub(crate) fn parse_id(raw: &str, error_type: &str, what: &str) -> Result<Uuid, APIError> {
	Uuid::parse_str(raw).map_err(|_| APIError::BadRequest {
		error_type: error_type.to_string(),
		message: format!("{} must be a valid UUID: {}", what, raw),
	})
}

pub(crate) fn internal(e: impl std::fmt::Display) -> APIError {
	APIError::InternalServerError {
		error_type: "INTERNAL_ERROR".to_string(),
		message: e.to_string(),
	}
}
