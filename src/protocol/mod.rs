//! Inbound connection messages.
//!
//! Every frame is an envelope `{ "type": ..., "body": {...} }`. Frames that
//! do not decode, carry an unknown type, or have a malformed body are dropped
//! without a reply and without closing the connection.

pub mod outbound;

use std::sync::Arc;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{delivery, dispatch};
use crate::models::GeoPoint;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: serde_json::Value,
}

/// Clients send coordinates either as JSON numbers or as numeric strings.
fn coordinate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(value) => value,
        Raw::Text(text) => text.trim().parse::<f64>().map_err(de::Error::custom)?,
    };

    if !value.is_finite() {
        return Err(de::Error::custom("coordinate must be finite"));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Position {
    #[serde(deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(deserialize_with = "coordinate")]
    pub longitude: f64,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct OrderPosition {
    pub order_id: Uuid,
    #[serde(deserialize_with = "coordinate")]
    pub latitude: f64,
    #[serde(deserialize_with = "coordinate")]
    pub longitude: f64,
}

impl OrderPosition {
    pub fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiderMessage {
    AcceptOrder(OrderPosition),
    SendLocation(Position),
    Delivered(OrderPosition),
}

impl RiderMessage {
    pub fn decode(text: &str) -> Option<Self> {
        let envelope: Envelope = serde_json::from_str(text).ok()?;

        let message = match envelope.kind.as_str() {
            "accept_order" => RiderMessage::AcceptOrder(order_position(envelope.body)?),
            "send_location" => {
                let position: Position = serde_json::from_value(envelope.body).ok()?;
                if !position.is_valid() {
                    return None;
                }
                RiderMessage::SendLocation(position)
            }
            "delivered" => RiderMessage::Delivered(order_position(envelope.body)?),
            _ => return None,
        };

        Some(message)
    }
}

fn order_position(body: serde_json::Value) -> Option<OrderPosition> {
    let request: OrderPosition = serde_json::from_value(body).ok()?;
    (request.position().is_valid() && !request.order_id.is_nil()).then_some(request)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CustomerMessage {
    TrackOrder { order_id: Uuid },
}

impl CustomerMessage {
    pub fn decode(text: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct TrackOrder {
            order_id: Uuid,
        }

        let envelope: Envelope = serde_json::from_str(text).ok()?;
        match envelope.kind.as_str() {
            "track_order" => {
                let body: TrackOrder = serde_json::from_value(envelope.body).ok()?;
                Some(CustomerMessage::TrackOrder {
                    order_id: body.order_id,
                })
            }
            _ => None,
        }
    }
}

pub async fn handle_rider_message(state: &Arc<AppState>, rider_id: Uuid, text: &str) {
    let Some(message) = RiderMessage::decode(text) else {
        debug!(rider_id = %rider_id, "dropping undecodable rider message");
        return;
    };

    match message {
        RiderMessage::AcceptOrder(request) => {
            let outcome = dispatch::accept_offer(state, rider_id, request).await;
            info!(rider_id = %rider_id, order_id = %request.order_id, outcome = outcome.as_str(), "accept_order handled");
        }
        RiderMessage::SendLocation(position) => {
            let relayed = delivery::relay_location(state, rider_id, position).await;
            debug!(rider_id = %rider_id, relayed, "send_location handled");
        }
        RiderMessage::Delivered(request) => {
            let outcome = delivery::complete_delivery(state, rider_id, request).await;
            info!(rider_id = %rider_id, order_id = %request.order_id, outcome = outcome.as_str(), "delivered handled");
        }
    }
}

pub async fn handle_customer_message(_state: &Arc<AppState>, customer_id: Uuid, text: &str) {
    match CustomerMessage::decode(text) {
        // customers already receive every position update; tracking needs no reply
        Some(CustomerMessage::TrackOrder { order_id }) => {
            debug!(customer_id = %customer_id, order_id = %order_id, "track_order received");
        }
        None => {
            debug!(customer_id = %customer_id, "dropping undecodable customer message");
        }
    }
}
