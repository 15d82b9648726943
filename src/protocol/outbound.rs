use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

pub const ORDER_ACCEPTED: &str = "Order accepted";
pub const ALREADY_ASSIGNED: &str = "order already assigned";
pub const ERROR_ASSIGNING: &str = "error assigning";
pub const NOT_AVAILABLE: &str = "order not available";

pub const NEW_ORDER: &str = "New order for pickup";
pub const ALREADY_PICKED: &str = "Already picked order";

pub const IN_BETWEEN: &str = "in between";
pub const RIDER_REACHED: &str = "rider reached location";

/// Offer and loss notices sent to riders.
#[derive(Debug, Clone, Serialize)]
pub struct OrderNotice<'a> {
    pub message: &'a str,
    pub order_id: Uuid,
}

/// Position updates sent to customers.
#[derive(Debug, Clone, Serialize)]
pub struct LocationSync<'a> {
    pub msg: &'a str,
    pub latitude: f64,
    pub longitude: f64,
}

pub fn order_notice(message: &str, order_id: Uuid) -> Result<String, AppError> {
    encode(&OrderNotice { message, order_id })
}

pub fn location_sync(msg: &str, latitude: f64, longitude: f64) -> Result<String, AppError> {
    encode(&LocationSync {
        msg,
        latitude,
        longitude,
    })
}

fn encode<T: Serialize>(payload: &T) -> Result<String, AppError> {
    serde_json::to_string(payload)
        .map_err(|err| AppError::Internal(format!("failed to encode outbound message: {err}")))
}
