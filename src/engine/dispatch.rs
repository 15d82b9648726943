//! Offers accepted orders to nearby riders and picks exactly one of them.
//!
//! The winner is decided by a single atomic increment in the coordination
//! store: the caller that sees `1` owns the order, everybody else lost. Losing
//! is a normal outcome reported over the rider's connection, never an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::engine::registry::ActorKind;
use crate::error::AppError;
use crate::models::order::{Order, OrderStatus};
use crate::models::rider::RiderCandidate;
use crate::protocol::outbound;
use crate::protocol::OrderPosition;
use crate::state::AppState;
use crate::store::CoordinationStore;

pub fn acceptance_token_key(order_id: Uuid) -> String {
    format!("order_status:{order_id}")
}

pub fn candidate_set_key(order_id: Uuid) -> String {
    format!("rider_broadcasted:{order_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Broadcast,
    AlreadyAccepted,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferOutcome {
    pub status: OfferStatus,
    pub order: Order,
    pub candidates: Vec<RiderCandidate>,
    /// Candidates whose connection accepted the offer message.
    pub notified: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted,
    AlreadyAssigned,
    NotOffered,
    Failed,
}

impl AcceptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptOutcome::Accepted => "won",
            AcceptOutcome::AlreadyAssigned => "already_assigned",
            AcceptOutcome::NotOffered => "not_offered",
            AcceptOutcome::Failed => "failed",
        }
    }
}

/// Restaurant-side acceptance: moves the order to `ACCEPTED` and offers it to
/// the nearest active riders.
pub async fn offer_order(
    state: &AppState,
    order_id: Uuid,
    restaurant_id: Uuid,
) -> Result<OfferOutcome, AppError> {
    let mut order = state.orders.get(order_id).await?;
    let restaurant = state.restaurants.get(restaurant_id).await?;

    if order.restaurant_id != restaurant.id {
        return Err(AppError::BadRequest(format!(
            "order {order_id} does not belong to restaurant {restaurant_id}"
        )));
    }

    let candidates = state
        .riders
        .nearest_active(
            restaurant.location,
            state.config.candidate_limit,
            state.config.candidate_radius_km,
        )
        .await?;

    if !lifecycle::accept(&mut order, Utc::now())?.applied() {
        info!(order_id = %order.id, status = order.status.as_str(), "order already accepted; no new offer");
        state
            .metrics
            .offers_total
            .with_label_values(&["already_accepted"])
            .inc();
        return Ok(OfferOutcome {
            status: OfferStatus::AlreadyAccepted,
            order,
            candidates: Vec::new(),
            notified: 0,
        });
    }

    state.orders.update(&order).await?.ensure_single("order")?;

    let rider_ids: Vec<Uuid> = candidates.iter().map(|candidate| candidate.id).collect();
    if rider_ids.is_empty() {
        warn!(order_id = %order.id, restaurant_id = %restaurant.id, "no active riders near restaurant");
    } else {
        // record before offering so an instant acceptance can still find its rivals
        record_candidates(
            state.coordination.as_ref(),
            order.id,
            &rider_ids,
            state.config.offer_ttl,
        )
        .await?;
    }

    let notice = outbound::order_notice(outbound::NEW_ORDER, order.id)?;
    let notified = state
        .connections
        .broadcast(ActorKind::Rider, &notice, &rider_ids);

    state
        .metrics
        .offers_total
        .with_label_values(&["broadcast"])
        .inc();
    info!(
        order_id = %order.id,
        candidates = rider_ids.len(),
        notified,
        "order offered to riders"
    );

    Ok(OfferOutcome {
        status: OfferStatus::Broadcast,
        order,
        candidates,
        notified,
    })
}

async fn record_candidates(
    store: &dyn CoordinationStore,
    order_id: Uuid,
    rider_ids: &[Uuid],
    ttl: Duration,
) -> Result<(), AppError> {
    let key = candidate_set_key(order_id);
    let members: Vec<String> = rider_ids.iter().map(Uuid::to_string).collect();
    store.set_add(&key, &members).await?;
    store.expire(&key, ttl).await
}

/// Claims the order for the caller. Returns `true` for exactly one caller per
/// order, however many race.
pub async fn claim_order(
    store: &dyn CoordinationStore,
    order_id: Uuid,
    ttl: Duration,
) -> Result<bool, AppError> {
    let key = acceptance_token_key(order_id);
    let attempts = store.incr(&key).await?;
    if attempts != 1 {
        return Ok(false);
    }

    if let Err(err) = store.expire(&key, ttl).await {
        warn!(order_id = %order_id, error = %err, "failed to set acceptance token expiry");
    }
    Ok(true)
}

/// Rider-side acceptance. Every outcome is reported to the rider over their
/// connection; the return value is for logging and metrics.
pub async fn accept_offer(
    state: &Arc<AppState>,
    rider_id: Uuid,
    request: OrderPosition,
) -> AcceptOutcome {
    let started = Instant::now();
    let outcome = resolve_acceptance(state, rider_id, request).await;

    state
        .metrics
        .acceptance_latency_seconds
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .acceptances_total
        .with_label_values(&[outcome.as_str()])
        .inc();

    outcome
}

async fn resolve_acceptance(
    state: &Arc<AppState>,
    rider_id: Uuid,
    request: OrderPosition,
) -> AcceptOutcome {
    let reply = |message: &str| {
        state.connections.send(ActorKind::Rider, rider_id, message);
    };

    let order = match state.orders.get(request.order_id).await {
        Ok(order) => order,
        Err(err) => {
            error!(order_id = %request.order_id, rider_id = %rider_id, error = %err, "failed to fetch order for acceptance");
            reply(outbound::ERROR_ASSIGNING);
            return AcceptOutcome::Failed;
        }
    };

    if order.status >= OrderStatus::RiderAssigned {
        debug!(order_id = %order.id, rider_id = %rider_id, "order already assigned");
        reply(outbound::ALREADY_ASSIGNED);
        return AcceptOutcome::AlreadyAssigned;
    }
    if order.status == OrderStatus::Created {
        debug!(order_id = %order.id, rider_id = %rider_id, "order has not been offered yet");
        reply(outbound::NOT_AVAILABLE);
        return AcceptOutcome::NotOffered;
    }

    let won = match claim_order(state.coordination.as_ref(), order.id, state.config.offer_ttl).await
    {
        Ok(won) => won,
        Err(err) => {
            error!(order_id = %order.id, rider_id = %rider_id, error = %err, "acceptance token increment failed");
            reply(outbound::ERROR_ASSIGNING);
            return AcceptOutcome::Failed;
        }
    };

    if !won {
        debug!(order_id = %order.id, rider_id = %rider_id, "lost the acceptance race");
        reply(outbound::ALREADY_ASSIGNED);
        return AcceptOutcome::AlreadyAssigned;
    }

    // losers hear about it concurrently; the winner's acknowledgement does not wait
    let fan_out = tokio::spawn(notify_losers(state.clone(), order.id, rider_id));

    let outcome = assign_winner(state, order, rider_id, request).await;

    if let Err(err) = fan_out.await {
        error!(order_id = %request.order_id, error = %err, "loser notification task failed");
    }

    outcome
}

async fn assign_winner(
    state: &AppState,
    mut order: Order,
    rider_id: Uuid,
    request: OrderPosition,
) -> AcceptOutcome {
    let position = request.position();

    let transition = match lifecycle::assign_rider(&mut order, rider_id, position.point(), Utc::now()) {
        Ok(transition) => transition,
        Err(err) => {
            error!(order_id = %order.id, rider_id = %rider_id, error = %err, "cannot assign rider");
            state
                .connections
                .send(ActorKind::Rider, rider_id, outbound::ERROR_ASSIGNING);
            return AcceptOutcome::Failed;
        }
    };

    if !transition.applied() {
        state
            .connections
            .send(ActorKind::Rider, rider_id, outbound::ALREADY_ASSIGNED);
        return AcceptOutcome::AlreadyAssigned;
    }

    let persisted = match state.orders.update(&order).await {
        Ok(result) => result.ensure_single("order"),
        Err(err) => Err(err),
    };
    if let Err(err) = persisted {
        error!(order_id = %order.id, rider_id = %rider_id, error = %err, "failed to persist rider assignment");
        state
            .connections
            .send(ActorKind::Rider, rider_id, outbound::ERROR_ASSIGNING);
        return AcceptOutcome::Failed;
    }

    state
        .connections
        .send(ActorKind::Rider, rider_id, outbound::ORDER_ACCEPTED);

    match outbound::location_sync(outbound::IN_BETWEEN, position.latitude, position.longitude) {
        Ok(sync) => {
            state
                .connections
                .send(ActorKind::Customer, order.customer_id, &sync);
        }
        Err(err) => warn!(order_id = %order.id, error = %err, "failed to encode location sync"),
    }

    info!(order_id = %order.id, rider_id = %rider_id, "rider assigned");
    AcceptOutcome::Accepted
}

async fn notify_losers(state: Arc<AppState>, order_id: Uuid, winner: Uuid) {
    let members = match state
        .coordination
        .set_members(&candidate_set_key(order_id))
        .await
    {
        Ok(members) => members,
        Err(err) => {
            warn!(order_id = %order_id, error = %err, "failed to read candidate set");
            return;
        }
    };

    let losers: Vec<Uuid> = members
        .iter()
        .filter_map(|member| Uuid::parse_str(member).ok())
        .filter(|rider_id| *rider_id != winner)
        .collect();

    if losers.is_empty() {
        return;
    }

    let notice = match outbound::order_notice(outbound::ALREADY_PICKED, order_id) {
        Ok(notice) => notice,
        Err(err) => {
            warn!(order_id = %order_id, error = %err, "failed to encode loss notice");
            return;
        }
    };

    let notified = state
        .connections
        .broadcast(ActorKind::Rider, &notice, &losers);
    debug!(order_id = %order_id, losers = losers.len(), notified, "losing candidates notified");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::{acceptance_token_key, candidate_set_key, claim_order};
    use crate::store::memory::MemoryCoordinationStore;

    #[test]
    fn keys_are_derived_from_the_order_only() {
        let order_id = Uuid::new_v4();
        assert_eq!(acceptance_token_key(order_id), format!("order_status:{order_id}"));
        assert_eq!(candidate_set_key(order_id), format!("rider_broadcasted:{order_id}"));
    }

    #[tokio::test]
    async fn second_claim_loses() {
        let store = MemoryCoordinationStore::new();
        let order_id = Uuid::new_v4();
        let ttl = Duration::from_secs(60);

        assert!(claim_order(&store, order_id, ttl).await.unwrap());
        assert!(!claim_order(&store, order_id, ttl).await.unwrap());
        assert!(claim_order(&store, Uuid::new_v4(), ttl).await.unwrap());
    }
}
