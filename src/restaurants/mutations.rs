use async_trait::async_trait;

use super::keys::RestaurantKey;
use crate::api::{
  AddRestaurantManually, EntityId, ListStatus, NewReview, RestaurantApi, UpdateRestaurant,
  UserRestaurant,
};
use crate::cache::KeyFilter;
use crate::error::ApiError;
use crate::mutation::Mutation;

/// Save a restaurant typed in by hand. It lands in "want to go".
#[derive(Debug, Clone)]
pub struct AddRestaurant(pub AddRestaurantManually);

#[async_trait]
impl Mutation for AddRestaurant {
  type Context = dyn RestaurantApi;
  type Output = UserRestaurant;

  fn name(&self) -> &'static str {
    "add-restaurant"
  }

  fn validate(&self) -> Result<(), ApiError> {
    self.0.validate()
  }

  async fn execute(&self, api: &Self::Context) -> Result<UserRestaurant, ApiError> {
    api.add_manually(&self.0).await
  }

  fn invalidates(&self, _output: &UserRestaurant) -> Vec<KeyFilter> {
    vec![RestaurantKey::all_restaurants()]
  }

  fn invalidates_on_error(&self, err: &ApiError) -> Vec<KeyFilter> {
    written_anyway(err)
  }
}

/// Record a visit with its review.
#[derive(Debug, Clone)]
pub struct MarkAsBeenTo {
  pub id: EntityId,
  pub review: NewReview,
}

#[async_trait]
impl Mutation for MarkAsBeenTo {
  type Context = dyn RestaurantApi;
  type Output = UserRestaurant;

  fn name(&self) -> &'static str {
    "mark-as-been-to"
  }

  fn validate(&self) -> Result<(), ApiError> {
    self.review.validate()
  }

  async fn execute(&self, api: &Self::Context) -> Result<UserRestaurant, ApiError> {
    let updated = api.mark_as_been_to(&self.id, &self.review).await?;
    expect_status(updated, ListStatus::BeenTo)
  }

  fn invalidates(&self, _output: &UserRestaurant) -> Vec<KeyFilter> {
    vec![RestaurantKey::all_restaurants()]
  }

  fn invalidates_on_error(&self, err: &ApiError) -> Vec<KeyFilter> {
    written_anyway(err)
  }
}

/// Delete the review, moving the restaurant back to "want to go".
#[derive(Debug, Clone)]
pub struct MarkAsWantToGo {
  pub id: EntityId,
}

#[async_trait]
impl Mutation for MarkAsWantToGo {
  type Context = dyn RestaurantApi;
  type Output = UserRestaurant;

  fn name(&self) -> &'static str {
    "mark-as-want-to-go"
  }

  async fn execute(&self, api: &Self::Context) -> Result<UserRestaurant, ApiError> {
    let updated = api.mark_as_want_to_go(&self.id).await?;
    expect_status(updated, ListStatus::WantToGo)
  }

  fn invalidates(&self, _output: &UserRestaurant) -> Vec<KeyFilter> {
    vec![RestaurantKey::all_restaurants()]
  }

  fn invalidates_on_error(&self, err: &ApiError) -> Vec<KeyFilter> {
    written_anyway(err)
  }
}

/// Edit restaurant details. Status is never changed here.
#[derive(Debug, Clone)]
pub struct EditRestaurant {
  pub id: EntityId,
  pub changes: UpdateRestaurant,
}

#[async_trait]
impl Mutation for EditRestaurant {
  type Context = dyn RestaurantApi;
  type Output = UserRestaurant;

  fn name(&self) -> &'static str {
    "update-restaurant"
  }

  fn validate(&self) -> Result<(), ApiError> {
    self.changes.validate()
  }

  async fn execute(&self, api: &Self::Context) -> Result<UserRestaurant, ApiError> {
    api.update(&self.id, &self.changes).await
  }

  fn invalidates(&self, _output: &UserRestaurant) -> Vec<KeyFilter> {
    vec![RestaurantKey::all_restaurants()]
  }

  fn invalidates_on_error(&self, err: &ApiError) -> Vec<KeyFilter> {
    written_anyway(err)
  }
}

#[derive(Debug, Clone)]
pub struct DeleteRestaurant {
  pub id: EntityId,
}

#[async_trait]
impl Mutation for DeleteRestaurant {
  type Context = dyn RestaurantApi;
  type Output = ();

  fn name(&self) -> &'static str {
    "delete-restaurant"
  }

  async fn execute(&self, api: &Self::Context) -> Result<(), ApiError> {
    api.delete(&self.id).await
  }

  fn invalidates(&self, _output: &()) -> Vec<KeyFilter> {
    vec![RestaurantKey::all_restaurants()]
  }
}

/// A write answered with a 2xx the client could not accept may still have
/// changed the list.
fn written_anyway(err: &ApiError) -> Vec<KeyFilter> {
  match err {
    ApiError::InvalidResponse(_) => vec![RestaurantKey::all_restaurants()],
    _ => Vec::new(),
  }
}

/// Reject a transition the server did not actually perform.
fn expect_status(item: UserRestaurant, expected: ListStatus) -> Result<UserRestaurant, ApiError> {
  if item.status() == expected {
    Ok(item)
  } else {
    Err(ApiError::InvalidResponse(format!(
      "expected {} to be {} after the update, got {}",
      item.id,
      expected.label(),
      item.status().label()
    )))
  }
}
