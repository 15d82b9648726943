use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;

use crate::api::rest::orders::IdQuery;
use crate::engine::ratings::{self, RatingRequest};
use crate::error::AppError;
use crate::models::rating::Rating;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/rating/create", post(create_rating))
        .route("/v1/rating/get", get(get_rating))
}

async fn create_rating(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RatingRequest>,
) -> Result<(StatusCode, Json<Rating>), AppError> {
    let rating = ratings::create_rating(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

async fn get_rating(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IdQuery>,
) -> Result<Json<Rating>, AppError> {
    Ok(Json(ratings::get_rating(&state, query.id).await?))
}
