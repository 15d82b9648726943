use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::restaurant::{Restaurant, RestaurantStatus};
use crate::models::user::User;
use crate::models::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/user/create", post(create_user))
        .route("/v1/user/:id", get(get_user))
        .route("/v1/restaurant/create", post(create_restaurant))
        .route("/v1/restaurant/:id", get(get_restaurant))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct CreateRestaurantRequest {
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub status: Option<RestaurantStatus>,
}

fn require_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    Ok(())
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    require_name(&payload.name)?;

    let now = Utc::now();
    let user = state
        .users
        .create(User {
            id: Uuid::new_v4(),
            name: payload.name,
            address: payload.address,
            location: payload.location,
            average_rating: 0.0,
            created_at: now,
            updated_at: now,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get(id).await?))
}

async fn create_restaurant(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<Restaurant>), AppError> {
    require_name(&payload.name)?;

    let now = Utc::now();
    let restaurant = state
        .restaurants
        .create(Restaurant {
            id: Uuid::new_v4(),
            name: payload.name,
            address: payload.address,
            location: payload.location,
            status: payload.status.unwrap_or(RestaurantStatus::Active),
            average_rating: 0.0,
            average_delivery_time: 0.0,
            created_at: now,
            updated_at: now,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(restaurant)))
}

async fn get_restaurant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Restaurant>, AppError> {
    Ok(Json(state.restaurants.get(id).await?))
}
