//! API types for the order flow HTTP surface.

use crate::{Order, OrderItem, OrderStatus, Product};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	/// Owner reference issued by the external identity provider.
	#[serde(rename = "ownerId")]
	pub owner_id: String,
	pub items: Vec<OrderLineRequest>,
}

/// A requested `(product, quantity)` line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderLineRequest {
	#[serde(rename = "productId")]
	pub product_id: Uuid,
	pub quantity: u32,
}

/// Order representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
	pub id: Uuid,
	#[serde(rename = "ownerId")]
	pub owner_id: String,
	pub status: OrderStatus,
	pub total: Decimal,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
	#[serde(rename = "updatedAt")]
	pub updated_at: DateTime<Utc>,
	pub items: Vec<OrderItemResponse>,
}

impl OrderResponse {
	pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
		Self {
			id: order.id,
			owner_id: order.owner_id,
			status: order.status,
			total: order.total,
			created_at: order.created_at,
			updated_at: order.updated_at,
			items: items.into_iter().map(OrderItemResponse::from).collect(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemResponse {
	#[serde(rename = "productId")]
	pub product_id: Uuid,
	pub quantity: u32,
	pub price: Decimal,
}

impl From<OrderItem> for OrderItemResponse {
	fn from(item: OrderItem) -> Self {
		Self {
			product_id: item.product_id,
			quantity: item.quantity,
			price: item.price,
		}
	}
}

/// Product representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
	pub id: Uuid,
	pub name: String,
	pub price: Decimal,
	pub stock: u32,
}

impl From<Product> for ProductResponse {
	fn from(product: Product) -> Self {
		Self {
			id: product.id,
			name: product.name,
			price: product.price,
			stock: product.stock,
		}
	}
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Machine readable error code, e.g. `INSUFFICIENT_STOCK`.
	pub error: String,
	/// Human-readable description.
	pub message: String,
	/// Additional error context.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or semantically invalid request (400)
	BadRequest { error_type: String, message: String },
	/// Referenced resource does not exist (404)
	NotFound { error_type: String, message: String },
	/// Request conflicts with current state, e.g. not enough stock (409)
	Conflict {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
			},
			APIError::Conflict {
				error_type,
				message,
				details,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: details.clone(),
			},
		}
	}
}

impl std::fmt::Display for APIError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_status_mapping() {
		let conflict = APIError::Conflict {
			error_type: "INSUFFICIENT_STOCK".into(),
			message: "not enough".into(),
			details: Some(serde_json::json!({ "available": 100 })),
		};
		assert_eq!(conflict.status_code(), 409);
		let body = serde_json::to_value(conflict.to_error_response()).unwrap();
		assert_eq!(body["error"], "INSUFFICIENT_STOCK");
		assert_eq!(body["details"]["available"], 100);

		let missing = APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".into(),
			message: "gone".into(),
		};
		assert_eq!(missing.status_code(), 404);
		assert!(serde_json::to_value(missing.to_error_response())
			.unwrap()
			.get("details")
			.is_none());
	}
}
