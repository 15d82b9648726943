use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::rider::{Rider, RiderStatus};
use crate::models::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/rider/create", post(create_rider))
        .route("/v1/rider/:id", get(get_rider))
        .route("/v1/rider/:id/status", patch(update_rider_status))
        .route("/v1/rider/:id/location", patch(update_rider_location))
}

#[derive(Deserialize)]
pub struct CreateRiderRequest {
    pub name: String,
    pub phone_number: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: RiderStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_rider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRiderRequest>,
) -> Result<(StatusCode, Json<Rider>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let now = Utc::now();
    let rider = Rider {
        id: Uuid::new_v4(),
        name: payload.name,
        phone_number: payload.phone_number,
        location: payload.location,
        status: RiderStatus::Active,
        average_rating: 0.0,
        created_at: now,
        updated_at: now,
    };

    let rider = state.riders.create(rider).await?;
    Ok((StatusCode::CREATED, Json(rider)))
}

async fn get_rider(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Rider>, AppError> {
    Ok(Json(state.riders.get(id).await?))
}

async fn update_rider_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Rider>, AppError> {
    let mut rider = state.riders.get(id).await?;
    if rider.status == payload.status {
        return Ok(Json(rider));
    }

    rider.status = payload.status;
    rider.updated_at = Utc::now();
    state.riders.update(&rider).await?.ensure_single("rider")?;

    Ok(Json(rider))
}

async fn update_rider_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Rider>, AppError> {
    let mut rider = state.riders.get(id).await?;

    rider.location = payload.location;
    rider.updated_at = Utc::now();
    state.riders.update(&rider).await?.ensure_matched("rider")?;

    Ok(Json(rider))
}
