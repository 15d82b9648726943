use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::OfferOutcome;
use crate::engine::orders::{
    self, AcceptOrderRequest, CreateOrderRequest, PendingOrdersQuery, SearchOrdersRequest,
};
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::PageResponse;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/order/create", post(create_order))
        .route("/v1/order/get", get(get_order))
        .route(
            "/v1/order/restaurant/get_pending_orders",
            get(get_pending_orders),
        )
        .route("/v1/order/restaurant/accept_order", post(accept_order))
        .route("/v1/order/search/get_orders", post(search_orders))
}

#[derive(Deserialize)]
pub struct IdQuery {
    pub id: Uuid,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = orders::create_order(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(orders::get_order(&state, query.id).await?))
}

async fn get_pending_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingOrdersQuery>,
) -> Result<Json<PageResponse<Order>>, AppError> {
    Ok(Json(orders::pending_restaurant_orders(&state, query).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AcceptOrderRequest>,
) -> Result<Json<OfferOutcome>, AppError> {
    Ok(Json(orders::accept_order(&state, payload).await?))
}

async fn search_orders(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SearchOrdersRequest>,
) -> Result<Json<PageResponse<Order>>, AppError> {
    Ok(Json(orders::search_orders(&state, payload).await?))
}
