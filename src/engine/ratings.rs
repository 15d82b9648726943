use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::rating::{PartyKind, Rating, RatingTarget};
use crate::state::AppState;
use crate::store::SearchRatingQuery;

const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct RatingRequest {
    pub giver_id: Uuid,
    pub giver_kind: PartyKind,
    pub receiver_id: Uuid,
    pub receiver_kind: PartyKind,
    pub order_id: Uuid,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

/// Records a rating and schedules the receiver's average to be recomputed.
/// The response does not wait for, or depend on, the recomputation.
pub async fn create_rating(state: &Arc<AppState>, request: RatingRequest) -> Result<Rating, AppError> {
    if request.rating > MAX_RATING {
        return Err(AppError::BadRequest(format!(
            "rating must be between 0 and {MAX_RATING}"
        )));
    }

    ensure_exists(state, request.giver_kind, request.giver_id).await?;
    let target = resolve_target(state, request.receiver_kind, request.receiver_id).await?;

    let now = Utc::now();
    let rating = state
        .ratings
        .create(Rating {
            id: Uuid::new_v4(),
            giver_id: request.giver_id,
            giver_kind: request.giver_kind,
            receiver_id: target.id(),
            receiver_kind: target.kind(),
            order_id: request.order_id,
            rating: request.rating,
            comment: request.comment,
            created_at: now,
            updated_at: now,
        })
        .await?;

    state.background.submit(
        "average_rating",
        recompute_average_rating(state.clone(), rating.giver_id, target),
    );

    Ok(rating)
}

pub async fn get_rating(state: &AppState, id: Uuid) -> Result<Rating, AppError> {
    state.ratings.get(id).await
}

async fn ensure_exists(state: &AppState, kind: PartyKind, id: Uuid) -> Result<(), AppError> {
    resolve_target(state, kind, id).await.map(|_| ())
}

pub async fn resolve_target(
    state: &AppState,
    kind: PartyKind,
    id: Uuid,
) -> Result<RatingTarget, AppError> {
    let target = match kind {
        PartyKind::Rider => RatingTarget::Rider(state.riders.get(id).await?),
        PartyKind::User => RatingTarget::User(state.users.get(id).await?),
        PartyKind::Restaurant => RatingTarget::Restaurant(state.restaurants.get(id).await?),
    };
    Ok(target)
}

/// Arithmetic mean of the ratings; zero when there are none.
pub fn average_rating(ratings: &[Rating]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let total: u64 = ratings.iter().map(|rating| u64::from(rating.rating)).sum();
    total as f64 / ratings.len() as f64
}

/// Averages every rating `giver_id` has given to receivers of the target's
/// kind and stores it on the target.
pub async fn recompute_average_rating(
    state: Arc<AppState>,
    giver_id: Uuid,
    target: RatingTarget,
) -> Result<(), AppError> {
    let query = SearchRatingQuery {
        giver_id: Some(giver_id),
        receiver_kind: Some(target.kind()),
        ..SearchRatingQuery::default()
    };
    let ratings = state.ratings.search(&query).await?;
    let average = average_rating(&ratings);

    let result = match &target {
        RatingTarget::Rider(rider) => state.riders.update_average_rating(rider.id, average).await?,
        RatingTarget::User(user) => state.users.update_average_rating(user.id, average).await?,
        RatingTarget::Restaurant(restaurant) => {
            state
                .restaurants
                .update_average_rating(restaurant.id, average)
                .await?
        }
    };
    result.ensure_matched(&target.kind().to_string())?;

    debug!(receiver_id = %target.id(), kind = %target.kind(), average, "average rating updated");
    Ok(())
}
