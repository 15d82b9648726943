pub mod order;
pub mod rating;
pub mod restaurant;
pub mod rider;
pub mod user;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: usize,
    pub page_size: usize,
}

impl<T> PageResponse<T> {
    pub fn new(items: Vec<T>, total_count: u64, page: usize, page_size: usize) -> Self {
        Self {
            items,
            total_count,
            page,
            page_size,
        }
    }
}
