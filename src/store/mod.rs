//! Persistence and coordination contracts.
//!
//! The dispatch core only talks to storage through these traits. The crate
//! ships in-memory implementations in [`memory`]; a document store or a
//! networked key-value service plugs in behind the same seams.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::rating::{PartyKind, Rating};
use crate::models::restaurant::Restaurant;
use crate::models::rider::{Rider, RiderCandidate};
use crate::models::user::User;
use crate::models::GeoPoint;

/// Matched/modified document counts reported by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

impl UpdateResult {
    pub fn single() -> Self {
        Self {
            matched: 1,
            modified: 1,
        }
    }

    /// A miss is the caller's problem; a match that changed nothing is ours.
    pub fn ensure_single(self, entity: &str) -> Result<(), AppError> {
        if self.matched != 1 {
            return Err(AppError::NotFound(format!("no matching {entity}")));
        }
        if self.modified != 1 {
            return Err(AppError::Internal(format!("{entity} update failed")));
        }
        Ok(())
    }

    /// For idempotent field writes, where an unchanged value is not a failure.
    pub fn ensure_matched(self, entity: &str) -> Result<(), AppError> {
        if self.matched != 1 {
            return Err(AppError::NotFound(format!("no matching {entity}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOrderQuery {
    pub order_id: Option<Uuid>,
    pub restaurant_id: Option<Uuid>,
    pub rider_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    /// `None` returns every match.
    pub limit: Option<usize>,
    pub skip: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRatingQuery {
    pub giver_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub receiver_kind: Option<PartyKind>,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order, AppError>;
    async fn update(&self, order: &Order) -> Result<UpdateResult, AppError>;
    async fn get(&self, id: Uuid) -> Result<Order, AppError>;
    /// Returns the requested page and the total number of matches.
    async fn search(&self, query: &SearchOrderQuery) -> Result<(Vec<Order>, u64), AppError>;
}

#[async_trait]
pub trait RiderRepository: Send + Sync {
    async fn create(&self, rider: Rider) -> Result<Rider, AppError>;
    async fn get(&self, id: Uuid) -> Result<Rider, AppError>;
    async fn update(&self, rider: &Rider) -> Result<UpdateResult, AppError>;
    /// Active riders within `radius_km` of `point`, nearest first.
    async fn nearest_active(
        &self,
        point: GeoPoint,
        limit: usize,
        radius_km: f64,
    ) -> Result<Vec<RiderCandidate>, AppError>;
    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError>;
}

#[async_trait]
pub trait RestaurantRepository: Send + Sync {
    async fn create(&self, restaurant: Restaurant) -> Result<Restaurant, AppError>;
    async fn get(&self, id: Uuid) -> Result<Restaurant, AppError>;
    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError>;
    async fn update_average_delivery_time(
        &self,
        id: Uuid,
        average: f64,
    ) -> Result<UpdateResult, AppError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, AppError>;
    async fn get(&self, id: Uuid) -> Result<User, AppError>;
    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError>;
}

#[async_trait]
pub trait RatingRepository: Send + Sync {
    async fn create(&self, rating: Rating) -> Result<Rating, AppError>;
    async fn get(&self, id: Uuid) -> Result<Rating, AppError>;
    async fn search(&self, query: &SearchRatingQuery) -> Result<Vec<Rating>, AppError>;
}

/// Shared key-value service used to coordinate dispatch across workers.
///
/// `incr` must be linearizable: of any number of concurrent increments on the
/// same key, exactly one observes each resulting value.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn incr(&self, key: &str) -> Result<i64, AppError>;
    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), AppError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, AppError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError>;

    /// Reclaims keys past their deadline. Backends with native expiry skip this.
    async fn purge_expired(&self) -> Result<(), AppError> {
        Ok(())
    }
}
