//! Delivery completion and live location relay for orders a rider is carrying.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::engine::registry::ActorKind;
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::GeoPoint;
use crate::protocol::outbound;
use crate::protocol::{OrderPosition, Position};
use crate::state::AppState;
use crate::store::SearchOrderQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    AlreadyDelivered,
    Rejected,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::AlreadyDelivered => "already_delivered",
            DeliveryOutcome::Rejected => "rejected",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

/// Handles a rider's "delivered" message. The restaurant's delivery metric is
/// recomputed afterwards on the background executor.
pub async fn complete_delivery(
    state: &Arc<AppState>,
    rider_id: Uuid,
    request: OrderPosition,
) -> DeliveryOutcome {
    let mut order = match state.orders.get(request.order_id).await {
        Ok(order) => order,
        Err(err) => {
            error!(order_id = %request.order_id, error = %err, "failed to fetch order for delivery");
            return DeliveryOutcome::Failed;
        }
    };

    if order.status == OrderStatus::Delivered {
        debug!(order_id = %order.id, "order already delivered");
        return DeliveryOutcome::AlreadyDelivered;
    }
    if order.rider_id != Some(rider_id) {
        warn!(order_id = %order.id, rider_id = %rider_id, "delivery reported by a rider not assigned to the order");
        return DeliveryOutcome::Rejected;
    }

    let position = request.position();
    if let Err(err) = lifecycle::mark_delivered(&mut order, position.point(), Utc::now()) {
        warn!(order_id = %order.id, error = %err, "order cannot be marked delivered");
        return DeliveryOutcome::Rejected;
    }

    let persisted = match state.orders.update(&order).await {
        Ok(result) => result.ensure_single("order"),
        Err(err) => Err(err),
    };
    if let Err(err) = persisted {
        error!(order_id = %order.id, error = %err, "failed to persist delivery");
        return DeliveryOutcome::Failed;
    }

    match outbound::location_sync(outbound::RIDER_REACHED, position.latitude, position.longitude) {
        Ok(sync) => {
            state
                .connections
                .send(ActorKind::Customer, order.customer_id, &sync);
        }
        Err(err) => warn!(order_id = %order.id, error = %err, "failed to encode delivery notice"),
    }

    info!(
        order_id = %order.id,
        rider_id = %rider_id,
        delivery_time_seconds = order.delivery_time_seconds.unwrap_or_default(),
        "order delivered"
    );

    state.background.submit(
        "average_delivery_time",
        recompute_average_delivery_time(state.clone(), order),
    );

    DeliveryOutcome::Delivered
}

/// Forwards a rider's position to the customers of every order the rider is
/// currently delivering, and records it as the order's live position.
pub async fn relay_location(state: &Arc<AppState>, rider_id: Uuid, position: Position) -> usize {
    let query = SearchOrderQuery {
        rider_id: Some(rider_id),
        status: Some(OrderStatus::RiderAssigned),
        ..SearchOrderQuery::default()
    };

    let orders = match state.orders.search(&query).await {
        Ok((orders, _)) => orders,
        Err(err) => {
            error!(rider_id = %rider_id, error = %err, "failed to look up rider's active orders");
            return 0;
        }
    };

    let sync = match outbound::location_sync(outbound::IN_BETWEEN, position.latitude, position.longitude) {
        Ok(sync) => sync,
        Err(err) => {
            warn!(rider_id = %rider_id, error = %err, "failed to encode location sync");
            return 0;
        }
    };

    let mut relayed = 0;
    for mut order in orders {
        if lifecycle::update_position(&mut order, position.point(), Utc::now()) {
            match state.orders.update(&order).await {
                Ok(result) if result.matched == 1 => {}
                Ok(_) => warn!(order_id = %order.id, "order vanished while updating live position"),
                Err(err) => warn!(order_id = %order.id, error = %err, "failed to store live position"),
            }
        }
        if state
            .connections
            .send(ActorKind::Customer, order.customer_id, &sync)
        {
            relayed += 1;
        }
    }

    relayed
}

/// Distance covered per second of delivery across the restaurant's history:
/// `Σ distance(current pickup, pickup_i) / (Σ delivery_time_i + 1)`.
/// The `+ 1` keeps an empty history at zero instead of dividing by zero.
pub fn average_delivery_metric(current_pickup: &GeoPoint, history: &[Order]) -> f64 {
    let (total_distance, total_time) =
        history
            .iter()
            .fold((0.0, 0.0), |(distance, time), order| {
                (
                    distance + current_pickup.distance_km(&order.pickup),
                    time + order.delivery_time_seconds.unwrap_or_default(),
                )
            });

    total_distance / (total_time + 1.0)
}

pub async fn recompute_average_delivery_time(
    state: Arc<AppState>,
    order: Order,
) -> Result<(), AppError> {
    let query = SearchOrderQuery {
        restaurant_id: Some(order.restaurant_id),
        status: Some(OrderStatus::Delivered),
        ..SearchOrderQuery::default()
    };
    let (history, _) = state.orders.search(&query).await?;

    let average = average_delivery_metric(&order.pickup, &history);
    state
        .restaurants
        .update_average_delivery_time(order.restaurant_id, average)
        .await?
        .ensure_matched("restaurant")?;

    debug!(restaurant_id = %order.restaurant_id, average, orders = history.len(), "average delivery time updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::average_delivery_metric;
    use crate::geo::haversine_km;
    use crate::models::order::{Order, OrderStatus};
    use crate::models::GeoPoint;

    fn delivered(pickup: GeoPoint, seconds: f64) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            restaurant_id: Uuid::nil(),
            rider_id: Some(Uuid::new_v4()),
            pickup,
            pickup_address: String::new(),
            delivery: pickup,
            delivery_address: String::new(),
            items: Vec::new(),
            total_price: 0.0,
            status: OrderStatus::Delivered,
            latitude: pickup.lat,
            longitude: pickup.lng,
            delivery_time_seconds: Some(seconds),
            created_at: now,
            accepted_at: Some(now),
            delivery_started: Some(now),
            delivered_at: Some(now),
            updated_at: now,
        }
    }

    #[test]
    fn empty_history_is_zero() {
        let here = GeoPoint { lat: 12.97, lng: 77.59 };
        assert_eq!(average_delivery_metric(&here, &[]), 0.0);
    }

    #[test]
    fn sums_distance_over_time_plus_one() {
        let here = GeoPoint { lat: 12.97, lng: 77.59 };
        let a = GeoPoint { lat: 13.00, lng: 77.60 };
        let b = GeoPoint { lat: 12.90, lng: 77.50 };
        let history = vec![delivered(a, 600.0), delivered(b, 899.0), delivered(here, 500.0)];

        let expected = (haversine_km(&here, &a) + haversine_km(&here, &b)) / (600.0 + 899.0 + 500.0 + 1.0);
        assert!((average_delivery_metric(&here, &history) - expected).abs() < 1e-12);
    }
}
