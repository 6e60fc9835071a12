//! HTTP server for the order flow API.
//!
//! A thin surface over the engine: order placement, order and product
//! lookup, and inspection and replay of the dead-letter area.

use crate::apis::dead_letter::ReplayResponse;
use axum::{
	extract::{Path, State},
	http::{HeaderValue, StatusCode},
	response::Json,
	routing::{get, post},
	Router,
};
use order_channel::DeadLetter;
use order_config::{ApiConfig, CorsConfig};
use order_core::OrderEngine;
use order_types::{APIError, CreateOrderRequest, OrderResponse, ProductResponse};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: OrderEngine,
}

/// Builds the router with every API route under `/api`.
pub fn router(engine: OrderEngine, cors: Option<&CorsConfig>) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order))
				.route("/orders/{id}", get(handle_get_order))
				.route("/products/{id}", get(handle_get_product))
				.route("/dead-letters", get(handle_dead_letters))
				.route("/dead-letters/{id}/replay", post(handle_replay_dead_letter)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(cors_layer(cors)),
		)
		.with_state(AppState { engine })
}

/// Allowed origins come from the configuration; without a `[api.cors]`
/// table every origin is allowed.
fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};
	let origins: Vec<HeaderValue> = cors
		.allowed_origins
		.iter()
		.filter_map(|origin| match origin.parse() {
			Ok(value) => Some(value),
			Err(_) => {
				tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
				None
			},
		})
		.collect();
	CorsLayer::new()
		.allow_origin(origins)
		.allow_methods(Any)
		.allow_headers(Any)
}

/// Serves the API until `shutdown` is cancelled.
pub async fn start_server(
	api_config: ApiConfig,
	engine: OrderEngine,
	shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(engine, api_config.cors.as_ref());

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Order flow API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(async move { shutdown.cancelled().await })
		.await?;

	Ok(())
}

/// Waits for the engine to finish recovery before serving. Returns without
/// binding if `shutdown` is cancelled first.
pub async fn start_server_when_ready(
	api_config: ApiConfig,
	engine: OrderEngine,
	shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
	tokio::select! {
		_ = engine.ready() => {},
		_ = shutdown.cancelled() => return Ok(()),
	}
	start_server(api_config, engine, shutdown).await
}

/// Handles POST /api/orders requests.
async fn handle_create_order(
	State(state): State<AppState>,
	Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), APIError> {
	match crate::apis::order::create_order(request, &state.engine).await {
		Ok(response) => Ok((StatusCode::CREATED, Json(response))),
		Err(e) => {
			tracing::warn!("Order creation rejected: {}", e);
			Err(e)
		},
	}
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<OrderResponse>, APIError> {
	crate::apis::order::get_order(&id, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /api/products/{id} requests.
async fn handle_get_product(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<ProductResponse>, APIError> {
	crate::apis::product::get_product(&id, &state.engine)
		.await
		.map(Json)
}

/// Handles GET /api/dead-letters requests.
async fn handle_dead_letters(
	State(state): State<AppState>,
) -> Result<Json<Vec<DeadLetter>>, APIError> {
	crate::apis::dead_letter::list_dead_letters(&state.engine)
		.await
		.map(Json)
}

/// Handles POST /api/dead-letters/{id}/replay requests.
async fn handle_replay_dead_letter(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<(StatusCode, Json<ReplayResponse>), APIError> {
	crate::apis::dead_letter::replay_dead_letter(&id, &state.engine)
		.await
		.map(|response| (StatusCode::ACCEPTED, Json(response)))
}
