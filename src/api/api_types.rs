//! Serde-deserializable types matching backend responses.
//!
//! These types are separate from domain types so that payloads which break a
//! model invariant are rejected at the boundary instead of leaking into the
//! cache.

use serde::Deserialize;

use super::types::{
  Coordinates, EntityId, ListStatus, PlacePrediction, Restaurant, Review, UserRestaurant, Visit,
};
use crate::error::ApiError;

// ============================================================================
// Restaurant payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRestaurant {
  pub id: EntityId,
  pub google_place_id: Option<String>,
  pub name: String,
  #[serde(default)]
  pub address: String,
  pub cuisine_type: Option<String>,
  pub phone_number: Option<String>,
  pub website: Option<String>,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub created_at: Option<String>,
}

impl From<ApiRestaurant> for Restaurant {
  fn from(api: ApiRestaurant) -> Self {
    let coordinates = match (api.latitude, api.longitude) {
      (Some(latitude), Some(longitude)) => Some(Coordinates {
        latitude,
        longitude,
      }),
      _ => None,
    };

    Restaurant {
      id: api.id,
      google_place_id: api.google_place_id,
      name: api.name,
      address: api.address,
      cuisine_type: api.cuisine_type,
      phone_number: api.phone_number,
      website: api.website,
      coordinates,
      created_at: api.created_at,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiReview {
  pub id: Option<EntityId>,
  pub rating: u8,
  pub price_range: u8,
  pub notes: Option<String>,
  pub created_at: Option<String>,
}

impl From<ApiReview> for Review {
  fn from(api: ApiReview) -> Self {
    Review {
      id: api.id,
      rating: api.rating,
      price_range: api.price_range,
      notes: api.notes,
      created_at: api.created_at,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUserRestaurant {
  pub id: EntityId,
  pub restaurant: ApiRestaurant,
  pub status: ListStatus,
  pub notes: Option<String>,
  pub review: Option<ApiReview>,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
}

impl TryFrom<ApiUserRestaurant> for UserRestaurant {
  type Error = ApiError;

  fn try_from(api: ApiUserRestaurant) -> Result<Self, Self::Error> {
    let visit = match (api.status, api.review) {
      (ListStatus::WantToGo, None) => Visit::WantToGo,
      (ListStatus::BeenTo, Some(review)) => Visit::BeenTo(review.into()),
      (ListStatus::WantToGo, Some(_)) => {
        return Err(ApiError::InvalidResponse(format!(
          "restaurant {} is WantToGo but carries a review",
          api.id
        )));
      }
      (ListStatus::BeenTo, None) => {
        return Err(ApiError::InvalidResponse(format!(
          "restaurant {} is BeenTo without a review",
          api.id
        )));
      }
    };

    Ok(UserRestaurant {
      id: api.id,
      restaurant: api.restaurant.into(),
      visit,
      notes: api.notes,
      created_at: api.created_at,
      updated_at: api.updated_at,
    })
  }
}

/// Convert a list payload, rejecting it as a whole if any item is invalid.
pub fn into_user_restaurants(
  items: Vec<ApiUserRestaurant>,
) -> Result<Vec<UserRestaurant>, ApiError> {
  items.into_iter().map(UserRestaurant::try_from).collect()
}

// ============================================================================
// Search and errors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPlacesSearchResult {
  #[serde(default)]
  pub predictions: Vec<PlacePrediction>,
}

/// Error body some endpoints return
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub message: Option<String>,
  pub title: Option<String>,
}
