use std::sync::Arc;

use crate::config::Config;
use crate::engine::background::BackgroundTasks;
use crate::engine::registry::ConnectionRegistry;
use crate::observability::metrics::Metrics;
use crate::store::memory::{MemoryCoordinationStore, MemoryStore};
use crate::store::{
    CoordinationStore, OrderRepository, RatingRepository, RestaurantRepository, RiderRepository,
    UserRepository,
};

/// Storage backends the dispatch core runs against.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderRepository>,
    pub riders: Arc<dyn RiderRepository>,
    pub restaurants: Arc<dyn RestaurantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub ratings: Arc<dyn RatingRepository>,
    pub coordination: Arc<dyn CoordinationStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        let documents = Arc::new(MemoryStore::new());
        Self {
            orders: documents.clone(),
            riders: documents.clone(),
            restaurants: documents.clone(),
            users: documents.clone(),
            ratings: documents,
            coordination: Arc::new(MemoryCoordinationStore::new()),
        }
    }
}

pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub riders: Arc<dyn RiderRepository>,
    pub restaurants: Arc<dyn RestaurantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub ratings: Arc<dyn RatingRepository>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub connections: ConnectionRegistry,
    pub background: BackgroundTasks,
    pub metrics: Metrics,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_stores(config, Stores::in_memory())
    }

    pub fn with_stores(config: Config, stores: Stores) -> Self {
        let metrics = Metrics::new();

        Self {
            orders: stores.orders,
            riders: stores.riders,
            restaurants: stores.restaurants,
            users: stores.users,
            ratings: stores.ratings,
            coordination: stores.coordination,
            connections: ConnectionRegistry::new(metrics.clone()),
            background: BackgroundTasks::new(config.background_concurrency, metrics.clone()),
            metrics,
            config,
        }
    }
}
