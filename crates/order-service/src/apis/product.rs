//! Product lookup.

use super::{internal, parse_id};
use order_core::OrderEngine;
use order_types::{APIError, ProductResponse};

/// Retrieves a product with its current stock.
pub async fn get_product(id: &str, engine: &OrderEngine) -> Result<ProductResponse, APIError> {
	let product_id = parse_id(id, "INVALID_PRODUCT_ID", "Product ID")?;

	engine
		.orders()
		.get_product(product_id)
		.await
		.map_err(internal)?
		.map(ProductResponse::from)
		.ok_or_else(|| APIError::NotFound {
			error_type: "PRODUCT_NOT_FOUND".to_string(),
			message: format!("Product not found: {}", product_id),
		})
}
