use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch::{self, OfferOutcome};
use crate::error::AppError;
use crate::models::order::{Item, Order, OrderStatus};
use crate::models::rating::PartyKind;
use crate::models::restaurant::RestaurantStatus;
use crate::models::PageResponse;
use crate::state::AppState;
use crate::store::SearchOrderQuery;

const PENDING_PAGE_MIN: usize = 10;
const PENDING_PAGE_MAX: usize = 20;
const SEARCH_PAGE_MAX: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub restaurant_id: Uuid,
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingOrdersQuery {
    pub id: Uuid,
    pub limit: Option<usize>,
    pub page_num: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptOrderRequest {
    pub id: Uuid,
    pub restaurant_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchOrdersRequest {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub party: PartyKind,
    pub limit: Option<usize>,
    pub page_num: Option<usize>,
    pub status: Option<OrderStatus>,
}

fn require_id(id: Uuid, field: &str) -> Result<(), AppError> {
    if id.is_nil() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

fn page_skip(page_num: usize, limit: usize) -> Result<usize, AppError> {
    if page_num == 0 {
        return Err(AppError::BadRequest("page_num must be >= 1".to_string()));
    }
    page_num
        .checked_sub(1)
        .and_then(|page| page.checked_mul(limit))
        .ok_or_else(|| AppError::BadRequest(format!("page_num {page_num} is out of range")))
}

pub async fn create_order(state: &AppState, request: CreateOrderRequest) -> Result<Order, AppError> {
    require_id(request.user_id, "user_id")?;
    require_id(request.restaurant_id, "restaurant_id")?;
    if request.items.is_empty() {
        return Err(AppError::BadRequest("order needs at least one item".to_string()));
    }
    if request.items.iter().any(|item| !item.price.is_finite() || item.price < 0.0) {
        return Err(AppError::BadRequest("item prices must be non-negative".to_string()));
    }

    let user = state.users.get(request.user_id).await?;
    let restaurant = state.restaurants.get(request.restaurant_id).await?;

    if restaurant.status != RestaurantStatus::Active {
        return Err(AppError::BadRequest("restaurant not serving".to_string()));
    }

    let now = Utc::now();
    let total_price = request.items.iter().map(|item| item.price).sum();

    let order = Order {
        id: Uuid::new_v4(),
        customer_id: user.id,
        restaurant_id: restaurant.id,
        rider_id: None,
        pickup: restaurant.location,
        pickup_address: restaurant.address,
        delivery: user.location,
        delivery_address: user.address,
        items: request.items,
        total_price,
        status: OrderStatus::Created,
        latitude: restaurant.location.lat,
        longitude: restaurant.location.lng,
        delivery_time_seconds: None,
        created_at: now,
        accepted_at: None,
        delivery_started: None,
        delivered_at: None,
        updated_at: now,
    };

    state.orders.create(order).await
}

pub async fn get_order(state: &AppState, id: Uuid) -> Result<Order, AppError> {
    require_id(id, "id")?;
    state.orders.get(id).await
}

/// Orders waiting for the restaurant to accept them.
pub async fn pending_restaurant_orders(
    state: &AppState,
    query: PendingOrdersQuery,
) -> Result<PageResponse<Order>, AppError> {
    require_id(query.id, "id")?;
    let limit = query.limit.unwrap_or(PENDING_PAGE_MIN);
    if !(PENDING_PAGE_MIN..=PENDING_PAGE_MAX).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between {PENDING_PAGE_MIN} and {PENDING_PAGE_MAX}"
        )));
    }
    let page = query.page_num.unwrap_or(1);

    let search = SearchOrderQuery {
        restaurant_id: Some(query.id),
        status: Some(OrderStatus::Created),
        limit: Some(limit),
        skip: page_skip(page, limit)?,
        ..SearchOrderQuery::default()
    };
    let (orders, total) = state.orders.search(&search).await?;

    Ok(PageResponse::new(orders, total, page, limit))
}

pub async fn search_orders(
    state: &AppState,
    request: SearchOrdersRequest,
) -> Result<PageResponse<Order>, AppError> {
    require_id(request.id, "id")?;
    let limit = request.limit.unwrap_or(10);
    if limit == 0 || limit > SEARCH_PAGE_MAX {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {SEARCH_PAGE_MAX}"
        )));
    }
    let page = request.page_num.unwrap_or(1);

    let mut search = SearchOrderQuery {
        status: request.status,
        limit: Some(limit),
        skip: page_skip(page, limit)?,
        ..SearchOrderQuery::default()
    };
    match request.party {
        PartyKind::User => search.customer_id = Some(request.id),
        PartyKind::Restaurant => search.restaurant_id = Some(request.id),
        PartyKind::Rider => search.rider_id = Some(request.id),
    }

    let (orders, total) = state.orders.search(&search).await?;
    Ok(PageResponse::new(orders, total, page, limit))
}

pub async fn accept_order(
    state: &AppState,
    request: AcceptOrderRequest,
) -> Result<OfferOutcome, AppError> {
    require_id(request.id, "id")?;
    require_id(request.restaurant_id, "restaurant_id")?;
    dispatch::offer_order(state, request.id, request.restaurant_id).await
}

#[cfg(test)]
mod tests {
    use super::page_skip;
    use crate::error::AppError;

    #[test]
    fn skip_counts_whole_pages() {
        assert_eq!(page_skip(1, 10).unwrap(), 0);
        assert_eq!(page_skip(3, 20).unwrap(), 40);
    }

    #[test]
    fn page_zero_and_overflowing_pages_are_rejected() {
        assert!(matches!(page_skip(0, 10), Err(AppError::BadRequest(_))));
        assert!(matches!(page_skip(usize::MAX, 10), Err(AppError::BadRequest(_))));
    }
}
