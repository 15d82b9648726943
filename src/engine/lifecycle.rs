//! Forward-only order state machine.
//!
//! `CREATED -> ACCEPTED -> RIDER_ASSIGNED -> DELIVERED`. Asking for a state the
//! order has already reached is a no-op, so retries from flaky connections
//! never roll an order back. Skipping a state is refused.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    AlreadyInState(OrderStatus),
}

impl Transition {
    pub fn applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

fn next(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::Created => Some(OrderStatus::Accepted),
        OrderStatus::Accepted => Some(OrderStatus::RiderAssigned),
        OrderStatus::RiderAssigned => Some(OrderStatus::Delivered),
        OrderStatus::Delivered => None,
    }
}

fn not_before(now: DateTime<Utc>, earlier: Option<DateTime<Utc>>) -> DateTime<Utc> {
    earlier.map_or(now, |earlier| now.max(earlier))
}

fn check(order: &Order, target: OrderStatus) -> Result<Transition, AppError> {
    if target <= order.status {
        return Ok(Transition::AlreadyInState(order.status));
    }
    if next(order.status) != Some(target) {
        return Err(AppError::Conflict(format!(
            "order {} cannot move from {} to {}",
            order.id,
            order.status.as_str(),
            target.as_str()
        )));
    }
    Ok(Transition::Applied)
}

pub fn accept(order: &mut Order, now: DateTime<Utc>) -> Result<Transition, AppError> {
    let transition = check(order, OrderStatus::Accepted)?;
    if transition.applied() {
        let at = not_before(now, Some(order.created_at));
        order.status = OrderStatus::Accepted;
        order.accepted_at = Some(at);
        order.updated_at = at;
    }
    Ok(transition)
}

pub fn assign_rider(
    order: &mut Order,
    rider_id: Uuid,
    position: GeoPoint,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    let transition = check(order, OrderStatus::RiderAssigned)?;
    if transition.applied() {
        let at = not_before(now, order.accepted_at);
        order.status = OrderStatus::RiderAssigned;
        order.rider_id = Some(rider_id);
        order.delivery_started = Some(at);
        order.latitude = position.lat;
        order.longitude = position.lng;
        order.updated_at = at;
    }
    Ok(transition)
}

/// Completes the order and fixes `delivery_time_seconds` as
/// `delivered_at - accepted_at`. Only the first completion sets it.
pub fn mark_delivered(
    order: &mut Order,
    position: GeoPoint,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    let transition = check(order, OrderStatus::Delivered)?;
    if transition.applied() {
        let at = not_before(now, order.delivery_started);
        let accepted_at = order.accepted_at.unwrap_or(at);
        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(at);
        order.delivery_time_seconds =
            Some((at - accepted_at).num_milliseconds() as f64 / 1000.0);
        order.latitude = position.lat;
        order.longitude = position.lng;
        order.updated_at = at;
    }
    Ok(transition)
}

/// Refreshes the live position of an order that is out for delivery.
pub fn update_position(order: &mut Order, position: GeoPoint, now: DateTime<Utc>) -> bool {
    if order.status != OrderStatus::RiderAssigned {
        return false;
    }
    order.latitude = position.lat;
    order.longitude = position.lng;
    order.updated_at = not_before(now, Some(order.updated_at));
    true
}
