//! The restaurant list: queries, mutations and the state derived from them.

mod keys;
pub mod map;
mod mutations;
mod service;
pub mod view;

pub use keys::RestaurantKey;
pub use mutations::{AddRestaurant, DeleteRestaurant, EditRestaurant, MarkAsBeenTo, MarkAsWantToGo};
pub use service::Restaurants;
pub use view::{clamp_index, FilterCounts, RestaurantListView};
