mod api_types;
mod client;
mod types;

pub use client::{error_from_response, HttpRestaurantApi, RestaurantApi};
pub use types::*;
