use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiderStatus {
    Active,
    Inactive,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rider {
    pub id: Uuid,
    pub name: String,
    pub phone_number: String,
    pub location: GeoPoint,
    pub status: RiderStatus,
    pub average_rating: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection returned by the nearest-riders query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiderCandidate {
    pub id: Uuid,
    pub name: String,
    pub distance_km: f64,
}
