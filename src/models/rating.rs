use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::restaurant::Restaurant;
use crate::models::rider::Rider;
use crate::models::user::User;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Rider,
    User,
    Restaurant,
}

impl fmt::Display for PartyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartyKind::Rider => "rider",
            PartyKind::User => "user",
            PartyKind::Restaurant => "restaurant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub id: Uuid,
    pub giver_id: Uuid,
    pub giver_kind: PartyKind,
    pub receiver_id: Uuid,
    pub receiver_kind: PartyKind,
    pub order_id: Uuid,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A resolved rating receiver. Each case owns the record whose average it updates.
#[derive(Debug, Clone)]
pub enum RatingTarget {
    Rider(Rider),
    User(User),
    Restaurant(Restaurant),
}

impl RatingTarget {
    pub fn id(&self) -> Uuid {
        match self {
            RatingTarget::Rider(rider) => rider.id,
            RatingTarget::User(user) => user.id,
            RatingTarget::Restaurant(restaurant) => restaurant.id,
        }
    }

    pub fn kind(&self) -> PartyKind {
        match self {
            RatingTarget::Rider(_) => PartyKind::Rider,
            RatingTarget::User(_) => PartyKind::User,
            RatingTarget::Restaurant(_) => PartyKind::Restaurant,
        }
    }
}
