//! Domain types for the restaurant list.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ApiError;

/// Backend identifier. The API sends ids as strings or integers; both are
/// normalized to their string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct EntityId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Text(String),
  Number(i64),
}

impl From<RawId> for EntityId {
  fn from(raw: RawId) -> Self {
    match raw {
      RawId::Text(s) => Self(s),
      RawId::Number(n) => Self(n.to_string()),
    }
  }
}

impl From<EntityId> for String {
  fn from(id: EntityId) -> Self {
    id.0
  }
}

impl EntityId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// List status of a saved restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListStatus {
  WantToGo,
  BeenTo,
}

impl ListStatus {
  pub fn label(&self) -> &'static str {
    match self {
      ListStatus::WantToGo => "Want to Go",
      ListStatus::BeenTo => "Been To",
    }
  }
}

/// Filter for the "my list" endpoint and the list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListFilter {
  #[default]
  All,
  WantToGo,
  BeenTo,
}

impl ListFilter {
  /// Value of the `status` query parameter.
  pub fn as_str(&self) -> &'static str {
    match self {
      ListFilter::All => "all",
      ListFilter::WantToGo => "want-to-go",
      ListFilter::BeenTo => "been-to",
    }
  }

  pub fn matches(&self, status: ListStatus) -> bool {
    match self {
      ListFilter::All => true,
      ListFilter::WantToGo => status == ListStatus::WantToGo,
      ListFilter::BeenTo => status == ListStatus::BeenTo,
    }
  }

  pub fn all_variants() -> &'static [Self] {
    &[ListFilter::All, ListFilter::WantToGo, ListFilter::BeenTo]
  }
}

impl std::str::FromStr for ListFilter {
  type Err = ApiError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "all" => Ok(ListFilter::All),
      "want-to-go" => Ok(ListFilter::WantToGo),
      "been-to" => Ok(ListFilter::BeenTo),
      other => Err(ApiError::validation(format!(
        "unknown filter '{}', expected all, want-to-go or been-to",
        other
      ))),
    }
  }
}

/// Map position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
  pub latitude: f64,
  pub longitude: f64,
}

/// Restaurant details
#[derive(Debug, Clone, PartialEq)]
pub struct Restaurant {
  pub id: EntityId,
  pub google_place_id: Option<String>,
  pub name: String,
  pub address: String,
  pub cuisine_type: Option<String>,
  pub phone_number: Option<String>,
  pub website: Option<String>,
  pub coordinates: Option<Coordinates>,
  pub created_at: Option<String>,
}

/// Review left when a restaurant is marked as visited
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
  pub id: Option<EntityId>,
  /// 1-5
  pub rating: u8,
  /// 1-4
  pub price_range: u8,
  pub notes: Option<String>,
  pub created_at: Option<String>,
}

/// Where a saved restaurant sits in the user's list. A review exists exactly
/// when the restaurant has been visited.
#[derive(Debug, Clone, PartialEq)]
pub enum Visit {
  WantToGo,
  BeenTo(Review),
}

/// A restaurant saved to the user's list
#[derive(Debug, Clone, PartialEq)]
pub struct UserRestaurant {
  pub id: EntityId,
  pub restaurant: Restaurant,
  pub visit: Visit,
  pub notes: Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

impl UserRestaurant {
  pub fn status(&self) -> ListStatus {
    match self.visit {
      Visit::WantToGo => ListStatus::WantToGo,
      Visit::BeenTo(_) => ListStatus::BeenTo,
    }
  }

  pub fn review(&self) -> Option<&Review> {
    match &self.visit {
      Visit::WantToGo => None,
      Visit::BeenTo(review) => Some(review),
    }
  }
}

/// Backend user profile
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: EntityId,
  pub clerk_user_id: String,
  pub email: String,
  pub username: String,
  pub created_at: String,
  pub location: Option<String>,
  pub description: Option<String>,
}

/// Place search hit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacePrediction {
  pub place_id: String,
  pub name: String,
  pub address: String,
}

// ============================================================================
// Request bodies
// ============================================================================

/// Body of `POST /restaurants/manual`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRestaurantManually {
  pub name: String,
  pub address: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cuisine_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

impl AddRestaurantManually {
  pub fn validate(&self) -> Result<(), ApiError> {
    if self.name.trim().is_empty() {
      return Err(ApiError::validation("restaurant name is required"));
    }
    if self.address.trim().is_empty() {
      return Err(ApiError::validation("restaurant address is required"));
    }
    Ok(())
  }
}

/// Body of `POST /restaurants/{id}/mark-as-been-to`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
  pub rating: u8,
  pub price_range: u8,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

impl NewReview {
  pub fn validate(&self) -> Result<(), ApiError> {
    if !(1..=5).contains(&self.rating) {
      return Err(ApiError::validation(format!(
        "rating must be between 1 and 5, got {}",
        self.rating
      )));
    }
    if !(1..=4).contains(&self.price_range) {
      return Err(ApiError::validation(format!(
        "price range must be between 1 and 4, got {}",
        self.price_range
      )));
    }
    Ok(())
  }
}

/// Body of `PATCH /restaurants/{id}`. Only provided fields change.
///
/// There is no status field: status only moves through reviews.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRestaurant {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub address: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cuisine_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

impl UpdateRestaurant {
  pub fn is_empty(&self) -> bool {
    self.name.is_none()
      && self.address.is_none()
      && self.cuisine_type.is_none()
      && self.notes.is_none()
  }

  pub fn validate(&self) -> Result<(), ApiError> {
    if self.is_empty() {
      return Err(ApiError::validation("nothing to update"));
    }
    if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
      return Err(ApiError::validation("restaurant name cannot be empty"));
    }
    if self.address.as_deref().is_some_and(|a| a.trim().is_empty()) {
      return Err(ApiError::validation("restaurant address cannot be empty"));
    }
    Ok(())
  }
}
