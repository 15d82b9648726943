use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::rating::Rating;
use crate::models::restaurant::Restaurant;
use crate::models::rider::{Rider, RiderCandidate, RiderStatus};
use crate::models::user::User;
use crate::models::GeoPoint;
use crate::store::{
    CoordinationStore, OrderRepository, RatingRepository, RestaurantRepository, RiderRepository,
    SearchOrderQuery, SearchRatingQuery, UpdateResult, UserRepository,
};

/// Process-local document store backing every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<Uuid, Order>,
    riders: DashMap<Uuid, Rider>,
    restaurants: DashMap<Uuid, Restaurant>,
    users: DashMap<Uuid, User>,
    ratings: DashMap<Uuid, Rating>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: Uuid) -> AppError {
    AppError::NotFound(format!("{entity} {id} not found"))
}

fn replace<T: PartialEq + Clone>(map: &DashMap<Uuid, T>, id: Uuid, value: &T) -> UpdateResult {
    match map.get_mut(&id) {
        None => UpdateResult {
            matched: 0,
            modified: 0,
        },
        Some(mut existing) => {
            if *existing == *value {
                return UpdateResult {
                    matched: 1,
                    modified: 0,
                };
            }
            *existing = value.clone();
            UpdateResult::single()
        }
    }
}

fn set_field<T>(
    map: &DashMap<Uuid, T>,
    id: Uuid,
    apply: impl FnOnce(&mut T) -> bool,
) -> UpdateResult {
    match map.get_mut(&id) {
        None => UpdateResult {
            matched: 0,
            modified: 0,
        },
        Some(mut existing) => {
            let changed = apply(&mut existing);
            UpdateResult {
                matched: 1,
                modified: u64::from(changed),
            }
        }
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create(&self, mut order: Order) -> Result<Order, AppError> {
        if order.id.is_nil() {
            order.id = Uuid::new_v4();
        }
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> Result<UpdateResult, AppError> {
        Ok(replace(&self.orders, order.id, order))
    }

    async fn get(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("order", id))
    }

    async fn search(&self, query: &SearchOrderQuery) -> Result<(Vec<Order>, u64), AppError> {
        let mut matches: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                query.order_id.is_none_or(|id| order.id == id)
                    && query.restaurant_id.is_none_or(|id| order.restaurant_id == id)
                    && query.rider_id.is_none_or(|id| order.rider_id == Some(id))
                    && query.customer_id.is_none_or(|id| order.customer_id == id)
                    && query.status.is_none_or(|status| order.status == status)
            })
            .map(|entry| entry.value().clone())
            .collect();

        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let total = matches.len() as u64;

        let page = matches
            .into_iter()
            .skip(query.skip)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok((page, total))
    }
}

#[async_trait]
impl RiderRepository for MemoryStore {
    async fn create(&self, mut rider: Rider) -> Result<Rider, AppError> {
        if rider.id.is_nil() {
            rider.id = Uuid::new_v4();
        }
        self.riders.insert(rider.id, rider.clone());
        Ok(rider)
    }

    async fn get(&self, id: Uuid) -> Result<Rider, AppError> {
        self.riders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("rider", id))
    }

    async fn update(&self, rider: &Rider) -> Result<UpdateResult, AppError> {
        Ok(replace(&self.riders, rider.id, rider))
    }

    async fn nearest_active(
        &self,
        point: GeoPoint,
        limit: usize,
        radius_km: f64,
    ) -> Result<Vec<RiderCandidate>, AppError> {
        let mut candidates: Vec<(RiderCandidate, f64)> = self
            .riders
            .iter()
            .filter(|entry| entry.value().status == RiderStatus::Active)
            .filter_map(|entry| {
                let rider = entry.value();
                let distance_km = point.distance_km(&rider.location);
                (distance_km <= radius_km).then(|| {
                    (
                        RiderCandidate {
                            id: rider.id,
                            name: rider.name.clone(),
                            distance_km,
                        },
                        rider.average_rating,
                    )
                })
            })
            .collect();

        // nearest first, better rated first on ties
        candidates.sort_by(|a, b| {
            a.0.distance_km
                .total_cmp(&b.0.distance_km)
                .then(b.1.total_cmp(&a.1))
        });
        candidates.truncate(limit);

        Ok(candidates.into_iter().map(|(candidate, _)| candidate).collect())
    }

    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError> {
        Ok(set_field(&self.riders, id, |rider| {
            let changed = rider.average_rating != rating;
            rider.average_rating = rating;
            rider.updated_at = Utc::now();
            changed
        }))
    }
}

#[async_trait]
impl RestaurantRepository for MemoryStore {
    async fn create(&self, mut restaurant: Restaurant) -> Result<Restaurant, AppError> {
        if restaurant.id.is_nil() {
            restaurant.id = Uuid::new_v4();
        }
        self.restaurants.insert(restaurant.id, restaurant.clone());
        Ok(restaurant)
    }

    async fn get(&self, id: Uuid) -> Result<Restaurant, AppError> {
        self.restaurants
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("restaurant", id))
    }

    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError> {
        Ok(set_field(&self.restaurants, id, |restaurant| {
            let changed = restaurant.average_rating != rating;
            restaurant.average_rating = rating;
            restaurant.updated_at = Utc::now();
            changed
        }))
    }

    async fn update_average_delivery_time(
        &self,
        id: Uuid,
        average: f64,
    ) -> Result<UpdateResult, AppError> {
        Ok(set_field(&self.restaurants, id, |restaurant| {
            let changed = restaurant.average_delivery_time != average;
            restaurant.average_delivery_time = average;
            restaurant.updated_at = Utc::now();
            changed
        }))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, mut user: User) -> Result<User, AppError> {
        if user.id.is_nil() {
            user.id = Uuid::new_v4();
        }
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> Result<User, AppError> {
        self.users
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("user", id))
    }

    async fn update_average_rating(&self, id: Uuid, rating: f64) -> Result<UpdateResult, AppError> {
        Ok(set_field(&self.users, id, |user| {
            let changed = user.average_rating != rating;
            user.average_rating = rating;
            user.updated_at = Utc::now();
            changed
        }))
    }
}

#[async_trait]
impl RatingRepository for MemoryStore {
    async fn create(&self, mut rating: Rating) -> Result<Rating, AppError> {
        if rating.id.is_nil() {
            rating.id = Uuid::new_v4();
        }
        self.ratings.insert(rating.id, rating.clone());
        Ok(rating)
    }

    async fn get(&self, id: Uuid) -> Result<Rating, AppError> {
        self.ratings
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found("rating", id))
    }

    async fn search(&self, query: &SearchRatingQuery) -> Result<Vec<Rating>, AppError> {
        let ratings = self
            .ratings
            .iter()
            .filter(|entry| {
                let rating = entry.value();
                query.giver_id.is_none_or(|id| rating.giver_id == id)
                    && query.receiver_id.is_none_or(|id| rating.receiver_id == id)
                    && query
                        .receiver_kind
                        .is_none_or(|kind| rating.receiver_kind == kind)
            })
            .map(|entry| entry.value().clone())
            .collect();

        Ok(ratings)
    }
}

struct Expiring<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Expiring<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// In-process coordination store. Counters and sets share one key space and
/// expire lazily: a key past its deadline reads as absent.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    counters: DashMap<String, Expiring<i64>>,
    sets: DashMap<String, Expiring<HashSet<String>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_count(&self) -> usize {
        self.counters.len() + self.sets.len()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        let now = Instant::now();
        // the entry guard holds the shard write lock for the whole read-modify-write
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(0));
        if !entry.is_live(now) {
            *entry = Expiring::new(0);
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), AppError> {
        let now = Instant::now();
        let mut entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(|| Expiring::new(HashSet::new()));
        if !entry.is_live(now) {
            *entry = Expiring::new(HashSet::new());
        }
        entry.value.extend(members.iter().cloned());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, AppError> {
        let now = Instant::now();
        self.sets.remove_if(key, |_, entry| !entry.is_live(now));

        Ok(self
            .sets
            .get(key)
            .map(|entry| entry.value.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        let now = Instant::now();
        let deadline = now + ttl;

        if let Some(mut entry) = self.counters.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(deadline);
            }
        }
        if let Some(mut entry) = self.sets.get_mut(key) {
            if entry.is_live(now) {
                entry.expires_at = Some(deadline);
            }
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<(), AppError> {
        let now = Instant::now();
        self.counters.retain(|_, entry| entry.is_live(now));
        self.sets.retain(|_, entry| entry.is_live(now));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{MemoryCoordinationStore, MemoryStore};
    use crate::models::rider::{Rider, RiderStatus};
    use crate::models::GeoPoint;
    use crate::store::{CoordinationStore, RiderRepository};

    fn rider(lat: f64, lng: f64, status: RiderStatus, rating: f64) -> Rider {
        Rider {
            id: Uuid::new_v4(),
            name: "test-rider".to_string(),
            phone_number: "+919999999999".to_string(),
            location: GeoPoint { lat, lng },
            status,
            average_rating: rating,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn nearest_active_orders_by_distance_and_skips_inactive() {
        let store = MemoryStore::new();
        let origin = GeoPoint {
            lat: 12.9716,
            lng: 77.5946,
        };

        let near = store
            .create(rider(12.9720, 77.5950, RiderStatus::Active, 4.0))
            .await
            .unwrap();
        let mid = store
            .create(rider(12.9900, 77.6000, RiderStatus::Active, 4.0))
            .await
            .unwrap();
        store
            .create(rider(12.9717, 77.5947, RiderStatus::Inactive, 5.0))
            .await
            .unwrap();
        // well outside the radius
        store
            .create(rider(13.5, 78.5, RiderStatus::Active, 5.0))
            .await
            .unwrap();

        let candidates = store.nearest_active(origin, 10, 10.0).await.unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![near.id, mid.id]);

        let limited = store.nearest_active(origin, 1, 10.0).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, near.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_yield_a_single_first() {
        let store = Arc::new(MemoryCoordinationStore::new());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.incr("order_status:x").await.unwrap() })
            })
            .collect();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }
        values.sort_unstable();

        assert_eq!(values.iter().filter(|v| **v == 1).count(), 1);
        assert_eq!(values, (1..=32).collect::<Vec<i64>>());
    }

    #[tokio::test(start_paused = true)]
    async fn sets_are_unreachable_after_ttl() {
        let store = MemoryCoordinationStore::new();
        let members = vec!["a".to_string(), "b".to_string()];

        store.set_add("rider_broadcasted:o", &members).await.unwrap();
        store
            .expire("rider_broadcasted:o", Duration::from_secs(30 * 60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert_eq!(store.set_members("rider_broadcasted:o").await.unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.set_members("rider_broadcasted:o").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_counter_starts_over() {
        let store = MemoryCoordinationStore::new();

        assert_eq!(store.incr("order_status:o").await.unwrap(), 1);
        store
            .expire("order_status:o", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.incr("order_status:o").await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        store.purge_expired().await.unwrap();
        assert_eq!(store.key_count(), 0);
        assert_eq!(store.incr("order_status:o").await.unwrap(), 1);
    }
}
