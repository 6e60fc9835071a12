//! Order placement and lookup.
//!
//! Creation is synchronous: stock is reserved and the order committed before
//! the response is returned. Processing happens afterwards, so a freshly
//! created order is always reported as `pending`.

use super::{internal, parse_id};
use order_core::{CreateOrderError, OrderEngine, OrderLine};
use order_types::{truncate_id, APIError, CreateOrderRequest, OrderResponse};
use tracing::{info, warn};

/// Places an order for the requested lines.
pub async fn create_order(
	request: CreateOrderRequest,
	engine: &OrderEngine,
) -> Result<OrderResponse, APIError> {
	let lines: Vec<OrderLine> = request
		.items
		.iter()
		.map(|line| OrderLine {
			product_id: line.product_id,
			quantity: line.quantity,
		})
		.collect();

	let created = engine
		.orders()
		.create_order(&request.owner_id, &lines)
		.await
		.map_err(map_create_error)?;

	if !created.publish.is_delivered() {
		// The order is committed either way; recovery or a dead-letter replay
		// will get it processed.
		warn!(
			order_id = %truncate_id(&created.order.id.to_string()),
			receipt = ?created.publish,
			"Order accepted but creation event was not delivered"
		);
	}
	info!(
		order_id = %truncate_id(&created.order.id.to_string()),
		total = %created.order.total,
		"Order accepted"
	);

	Ok(OrderResponse::new(created.order, created.items))
}

/// Retrieves an order with its items.
pub async fn get_order(id: &str, engine: &OrderEngine) -> Result<OrderResponse, APIError> {
	let order_id = parse_id(id, "INVALID_ORDER_ID", "Order ID")?;

	let order = engine
		.orders()
		.get_order(order_id)
		.await
		.map_err(internal)?
		.ok_or_else(|| APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message: format!("Order not found: {}", order_id),
		})?;
	let items = engine
		.orders()
		.get_order_items(order_id)
		.await
		.map_err(internal)?;

	Ok(OrderResponse::new(order, items))
}

fn map_create_error(e: CreateOrderError) -> APIError {
	let message = e.to_string();
	match e {
		CreateOrderError::EmptyOrder => APIError::BadRequest {
			error_type: "EMPTY_ORDER".to_string(),
			message,
		},
		CreateOrderError::InvalidQuantity { .. } => APIError::BadRequest {
			error_type: "INVALID_QUANTITY".to_string(),
			message,
		},
		CreateOrderError::ProductNotFound(_) => APIError::NotFound {
			error_type: "PRODUCT_NOT_FOUND".to_string(),
			message,
		},
		CreateOrderError::InsufficientStock {
			product_id,
			available,
			requested,
		} => APIError::Conflict {
			error_type: "INSUFFICIENT_STOCK".to_string(),
			message,
			details: Some(serde_json::json!({
				"productId": product_id,
				"available": available,
				"requested": requested,
			})),
		},
		CreateOrderError::Storage(_) => internal(message),
	}
}
