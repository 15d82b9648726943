use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use food_dispatch::config::Config;
use food_dispatch::engine::delivery::{self, DeliveryOutcome};
use food_dispatch::engine::dispatch::{self, AcceptOutcome, OfferStatus};
use food_dispatch::engine::orders::{self, CreateOrderRequest};
use food_dispatch::engine::registry::ActorKind;
use food_dispatch::models::order::{Item, OrderStatus};
use food_dispatch::models::restaurant::{Restaurant, RestaurantStatus};
use food_dispatch::models::rider::{Rider, RiderStatus};
use food_dispatch::models::user::User;
use food_dispatch::models::GeoPoint;
use food_dispatch::protocol::{self, OrderPosition, Position};
use food_dispatch::state::AppState;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

const KITCHEN: GeoPoint = GeoPoint {
    lat: 12.9716,
    lng: 77.5946,
};
const HOME: GeoPoint = GeoPoint {
    lat: 12.9352,
    lng: 77.6245,
};

struct Harness {
    state: Arc<AppState>,
    restaurant_id: Uuid,
    customer_id: Uuid,
}

async fn harness() -> Harness {
    let state = Arc::new(AppState::new(Config::default()));
    let now = Utc::now();

    let restaurant = state
        .restaurants
        .create(Restaurant {
            id: Uuid::new_v4(),
            name: "Curry House".to_string(),
            address: "1 Market Street".to_string(),
            location: KITCHEN,
            status: RestaurantStatus::Active,
            average_rating: 0.0,
            average_delivery_time: 0.0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let customer = state
        .users
        .create(User {
            id: Uuid::new_v4(),
            name: "Priya".to_string(),
            address: "22 Park Lane".to_string(),
            location: HOME,
            average_rating: 0.0,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    Harness {
        state,
        restaurant_id: restaurant.id,
        customer_id: customer.id,
    }
}

impl Harness {
    async fn rider_near_kitchen(&self, offset: f64) -> Uuid {
        let now = Utc::now();
        self.state
            .riders
            .create(Rider {
                id: Uuid::new_v4(),
                name: format!("rider-{offset}"),
                phone_number: "+15550100".to_string(),
                location: GeoPoint {
                    lat: KITCHEN.lat + offset,
                    lng: KITCHEN.lng,
                },
                status: RiderStatus::Active,
                average_rating: 4.0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
            .id
    }

    fn connect(&self, kind: ActorKind, id: Uuid) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        self.state.connections.register(kind, id, tx);
        rx
    }

    async fn order(&self) -> Uuid {
        let order = orders::create_order(
            &self.state,
            CreateOrderRequest {
                user_id: self.customer_id,
                restaurant_id: self.restaurant_id,
                items: vec![Item {
                    name: "Biryani".to_string(),
                    description: String::new(),
                    price: 11.0,
                    item_type: String::new(),
                }],
            },
        )
        .await
        .unwrap();
        order.id
    }

    async fn offered_order(&self) -> Uuid {
        let order_id = self.order().await;
        let outcome = dispatch::offer_order(&self.state, order_id, self.restaurant_id)
            .await
            .unwrap();
        assert_eq!(outcome.status, OfferStatus::Broadcast);
        order_id
    }

    async fn status(&self, order_id: Uuid) -> OrderStatus {
        self.state.orders.get(order_id).await.unwrap().status
    }
}

fn accept(order_id: Uuid) -> OrderPosition {
    OrderPosition {
        order_id,
        latitude: KITCHEN.lat,
        longitude: KITCHEN.lng,
    }
}

fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
    let mut received = Vec::new();
    while let Ok(message) = rx.try_recv() {
        received.push(message);
    }
    received
}

fn notice_message(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value["message"].as_str().map(str::to_string)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acceptances_produce_exactly_one_winner() {
    let h = harness().await;
    let mut riders = Vec::new();
    for i in 0..8 {
        let id = h.rider_near_kitchen(0.001 * f64::from(i)).await;
        riders.push((id, h.connect(ActorKind::Rider, id)));
    }
    let mut customer = h.connect(ActorKind::Customer, h.customer_id);
    let order_id = h.offered_order().await;

    let handles: Vec<_> = riders
        .iter()
        .map(|(rider_id, _)| {
            let state = h.state.clone();
            let rider_id = *rider_id;
            tokio::spawn(async move {
                let outcome = dispatch::accept_offer(&state, rider_id, accept(order_id)).await;
                (rider_id, outcome)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        let (rider_id, outcome) = handle.await.unwrap();
        match outcome {
            AcceptOutcome::Accepted => winners.push(rider_id),
            other => assert_eq!(other, AcceptOutcome::AlreadyAssigned),
        }
    }
    assert_eq!(winners.len(), 1);
    let winner = winners[0];

    let order = h.state.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::RiderAssigned);
    assert_eq!(order.rider_id, Some(winner));

    let mut accepted_acks = 0;
    for (rider_id, rx) in riders.iter_mut() {
        let messages = drain(rx);
        assert_eq!(
            notice_message(&messages[0]).as_deref(),
            Some("New order for pickup")
        );
        if messages.iter().any(|m| m == "Order accepted") {
            accepted_acks += 1;
            assert_eq!(*rider_id, winner);
            assert!(
                !messages
                    .iter()
                    .any(|m| notice_message(m).as_deref() == Some("Already picked order"))
            );
        } else {
            assert!(messages.iter().any(|m| m == "order already assigned"));
            assert!(
                messages
                    .iter()
                    .any(|m| notice_message(m).as_deref() == Some("Already picked order"))
            );
        }
    }
    assert_eq!(accepted_acks, 1);

    let sync: Value = serde_json::from_str(&customer.recv().await.unwrap()).unwrap();
    assert_eq!(sync["msg"], "in between");
}

#[tokio::test]
async fn two_riders_over_the_wire() {
    let h = harness().await;
    let rider_a = h.rider_near_kitchen(0.001).await;
    let rider_b = h.rider_near_kitchen(0.002).await;
    let mut rx_a = h.connect(ActorKind::Rider, rider_a);
    let mut rx_b = h.connect(ActorKind::Rider, rider_b);
    let order_id = h.offered_order().await;

    let frame = format!(
        r#"{{"type":"accept_order","body":{{"order_id":"{order_id}","latitude":"12.9716","longitude":77.5946}}}}"#
    );
    let a = {
        let state = h.state.clone();
        let frame = frame.clone();
        tokio::spawn(async move { protocol::handle_rider_message(&state, rider_a, &frame).await })
    };
    let b = {
        let state = h.state.clone();
        tokio::spawn(async move { protocol::handle_rider_message(&state, rider_b, &frame).await })
    };
    a.await.unwrap();
    b.await.unwrap();

    let order = h.state.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::RiderAssigned);
    let winner = order.rider_id.unwrap();
    assert!(winner == rider_a || winner == rider_b);

    let (winner_rx, loser_rx) = if winner == rider_a {
        (&mut rx_a, &mut rx_b)
    } else {
        (&mut rx_b, &mut rx_a)
    };
    let winner_messages = drain(winner_rx);
    assert!(winner_messages.iter().any(|m| m == "Order accepted"));
    assert!(
        !winner_messages
            .iter()
            .any(|m| notice_message(m).as_deref() == Some("Already picked order"))
    );
    let loser_messages = drain(loser_rx);
    assert!(loser_messages.iter().any(|m| m == "order already assigned"));
    assert!(
        loser_messages
            .iter()
            .any(|m| notice_message(m).as_deref() == Some("Already picked order"))
    );
}

#[tokio::test]
async fn acceptance_before_offer_is_refused_without_claiming() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let mut rx = h.connect(ActorKind::Rider, rider);
    let order_id = h.order().await;

    let outcome = dispatch::accept_offer(&h.state, rider, accept(order_id)).await;
    assert_eq!(outcome, AcceptOutcome::NotOffered);
    assert_eq!(drain(&mut rx), vec!["order not available".to_string()]);

    dispatch::offer_order(&h.state, order_id, h.restaurant_id)
        .await
        .unwrap();
    let outcome = dispatch::accept_offer(&h.state, rider, accept(order_id)).await;
    assert_eq!(outcome, AcceptOutcome::Accepted);
}

#[tokio::test]
async fn late_acceptance_of_assigned_order() {
    let h = harness().await;
    let first = h.rider_near_kitchen(0.001).await;
    let late = Uuid::new_v4();
    let mut rx = h.connect(ActorKind::Rider, late);
    let order_id = h.offered_order().await;

    assert_eq!(
        dispatch::accept_offer(&h.state, first, accept(order_id)).await,
        AcceptOutcome::Accepted
    );
    assert_eq!(
        dispatch::accept_offer(&h.state, late, accept(order_id)).await,
        AcceptOutcome::AlreadyAssigned
    );
    assert_eq!(drain(&mut rx), vec!["order already assigned".to_string()]);
}

#[tokio::test]
async fn offer_without_connected_riders_still_records_candidates() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let order_id = h.order().await;

    let outcome = dispatch::offer_order(&h.state, order_id, h.restaurant_id)
        .await
        .unwrap();
    assert_eq!(outcome.candidates.len(), 1);
    assert_eq!(outcome.notified, 0);

    let members = h
        .state
        .coordination
        .set_members(&dispatch::candidate_set_key(order_id))
        .await
        .unwrap();
    assert_eq!(members, vec![rider.to_string()]);
}

#[tokio::test]
async fn location_updates_reach_the_customer() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let order_id = h.offered_order().await;
    dispatch::accept_offer(&h.state, rider, accept(order_id)).await;
    let mut customer = h.connect(ActorKind::Customer, h.customer_id);

    let relayed = delivery::relay_location(
        &h.state,
        rider,
        Position {
            latitude: 12.95,
            longitude: 77.61,
        },
    )
    .await;
    assert_eq!(relayed, 1);

    let sync: Value = serde_json::from_str(&customer.recv().await.unwrap()).unwrap();
    assert_eq!(sync["msg"], "in between");
    assert_eq!(sync["latitude"], 12.95);

    let order = h.state.orders.get(order_id).await.unwrap();
    assert_eq!(order.latitude, 12.95);
    assert_eq!(order.longitude, 77.61);
}

#[tokio::test]
async fn delivery_completes_once_and_updates_restaurant_metric() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let order_id = h.offered_order().await;
    dispatch::accept_offer(&h.state, rider, accept(order_id)).await;
    let mut customer = h.connect(ActorKind::Customer, h.customer_id);

    let drop_off = OrderPosition {
        order_id,
        latitude: HOME.lat,
        longitude: HOME.lng,
    };
    assert_eq!(
        delivery::complete_delivery(&h.state, rider, drop_off).await,
        DeliveryOutcome::Delivered
    );

    let order = h.state.orders.get(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert!(order.delivery_time_seconds.unwrap() >= 0.0);
    assert!(order.delivered_at.unwrap() >= order.accepted_at.unwrap());

    let reached: Value = serde_json::from_str(&customer.recv().await.unwrap()).unwrap();
    assert_eq!(reached["msg"], "rider reached location");

    assert_eq!(
        delivery::complete_delivery(&h.state, rider, drop_off).await,
        DeliveryOutcome::AlreadyDelivered
    );
    assert_eq!(
        h.state.orders.get(order_id).await.unwrap().delivered_at,
        order.delivered_at
    );
    assert!(customer.try_recv().is_err());

    let recomputed = || {
        h.state
            .metrics
            .background_tasks_total
            .with_label_values(&["average_delivery_time", "success"])
            .get()
    };
    for _ in 0..50 {
        if recomputed() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(recomputed(), 1);
}

#[tokio::test]
async fn delivery_from_unassigned_rider_is_rejected() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let order_id = h.offered_order().await;
    dispatch::accept_offer(&h.state, rider, accept(order_id)).await;

    let outcome = delivery::complete_delivery(&h.state, Uuid::new_v4(), accept(order_id)).await;
    assert_eq!(outcome, DeliveryOutcome::Rejected);
    assert_eq!(h.status(order_id).await, OrderStatus::RiderAssigned);
}

#[tokio::test]
async fn malformed_frames_are_dropped_silently() {
    let h = harness().await;
    let rider = h.rider_near_kitchen(0.001).await;
    let mut rx = h.connect(ActorKind::Rider, rider);
    let order_id = h.offered_order().await;
    drain(&mut rx);

    for frame in [
        "not json",
        r#"{"type":"teleport","body":{}}"#,
        r#"{"type":"accept_order","body":{"order_id":"nope"}}"#,
        r#"{"type":"send_location","body":{"latitude":"abc","longitude":1}}"#,
    ] {
        protocol::handle_rider_message(&h.state, rider, frame).await;
    }

    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.status(order_id).await, OrderStatus::Accepted);
    assert!(h.state.connections.is_connected(ActorKind::Rider, rider));
}
