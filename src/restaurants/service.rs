use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use super::keys::RestaurantKey;
use super::mutations::{
  AddRestaurant, DeleteRestaurant, EditRestaurant, MarkAsBeenTo, MarkAsWantToGo,
};
use super::view::RestaurantListView;
use crate::api::{
  AddRestaurantManually, EntityId, ListFilter, NewReview, PlacePrediction, RestaurantApi,
  UpdateRestaurant, User, UserRestaurant,
};
use crate::auth::TokenProvider;
use crate::config::{CacheConfig, Config, SearchConfig};
use crate::error::ApiError;
use crate::query::{QueryClient, QueryObserver, QueryOptions, QueryResult};

type ListFuture = BoxFuture<'static, Result<Vec<UserRestaurant>, ApiError>>;

/// Restaurant queries and mutations over one shared cache.
///
/// Queries are disabled while there is no session token: they return an
/// idle result without touching the network.
#[derive(Clone)]
pub struct Restaurants {
  api: Arc<dyn RestaurantApi>,
  tokens: Arc<dyn TokenProvider>,
  client: QueryClient,
  cache: CacheConfig,
  search: SearchConfig,
}

impl Restaurants {
  pub fn new(
    api: Arc<dyn RestaurantApi>,
    tokens: Arc<dyn TokenProvider>,
    client: QueryClient,
    config: &Config,
  ) -> Self {
    Self {
      api,
      tokens,
      client,
      cache: config.cache.clone(),
      search: config.search.clone(),
    }
  }

  pub fn client(&self) -> &QueryClient {
    &self.client
  }

  async fn signed_in(&self) -> bool {
    self.tokens.token().await.is_some()
  }

  fn list_options(&self, enabled: bool) -> QueryOptions {
    QueryOptions::default()
      .with_stale_time(self.cache.list_stale_time())
      .enabled(enabled)
  }

  fn list_fetcher(&self, filter: ListFilter) -> impl Fn() -> ListFuture + Send + Sync + 'static {
    let api = self.api.clone();
    move || {
      let api = api.clone();
      async move { api.my_restaurants(filter).await }.boxed()
    }
  }

  /// The user's saved restaurants for `filter`.
  pub async fn my_restaurants(&self, filter: ListFilter) -> QueryResult<Vec<UserRestaurant>> {
    let options = self.list_options(self.signed_in().await);
    self
      .client
      .query(
        RestaurantKey::MyList(filter).into(),
        self.list_fetcher(filter),
        options,
      )
      .await
  }

  /// List and counts for `filter`, derived from the `all` collection so only
  /// one list is ever fetched.
  pub async fn list_view(&self, filter: ListFilter) -> QueryResult<RestaurantListView> {
    self
      .my_restaurants(ListFilter::All)
      .await
      .map(|items| RestaurantListView::derive(items, filter))
  }

  /// Keep the list for `filter` fresh across invalidations.
  pub async fn observe_list(&self, filter: ListFilter) -> QueryObserver<Vec<UserRestaurant>> {
    let options = self.list_options(self.signed_in().await);
    self.client.observe(
      RestaurantKey::MyList(filter).into(),
      self.list_fetcher(filter),
      options,
    )
  }

  /// Place search. Queries shorter than the configured minimum (after
  /// trimming) are disabled.
  pub async fn search(&self, query: &str) -> QueryResult<Vec<PlacePrediction>> {
    let query = query.trim().to_string();
    let long_enough = query.chars().count() >= self.search.min_query_len;
    if !long_enough {
      debug!(len = query.len(), "search query too short");
    }

    let options = QueryOptions::default()
      .with_stale_time(self.cache.search_stale_time())
      .enabled(long_enough && self.signed_in().await);

    let api = self.api.clone();
    let term = query.clone();
    self
      .client
      .query(
        RestaurantKey::Search(query).into(),
        move || {
          let api = api.clone();
          let term = term.clone();
          async move { api.search(&term).await }
        },
        options,
      )
      .await
  }

  /// Backend profile of the signed-in user.
  pub async fn current_user(&self) -> QueryResult<User> {
    let options = QueryOptions::default()
      .with_stale_time(self.cache.user_stale_time())
      .with_retry(1, Duration::from_secs(1))
      .enabled(self.signed_in().await);

    let api = self.api.clone();
    self
      .client
      .query(
        RestaurantKey::CurrentUser.into(),
        move || {
          let api = api.clone();
          async move { api.current_user().await }
        },
        options,
      )
      .await
  }

  pub async fn add(&self, dto: AddRestaurantManually) -> Result<UserRestaurant, ApiError> {
    self.client.mutate(&AddRestaurant(dto), &*self.api).await
  }

  pub async fn mark_as_been_to(
    &self,
    id: EntityId,
    review: NewReview,
  ) -> Result<UserRestaurant, ApiError> {
    self
      .client
      .mutate(&MarkAsBeenTo { id, review }, &*self.api)
      .await
  }

  pub async fn mark_as_want_to_go(&self, id: EntityId) -> Result<UserRestaurant, ApiError> {
    self.client.mutate(&MarkAsWantToGo { id }, &*self.api).await
  }

  pub async fn update(
    &self,
    id: EntityId,
    changes: UpdateRestaurant,
  ) -> Result<UserRestaurant, ApiError> {
    self
      .client
      .mutate(&EditRestaurant { id, changes }, &*self.api)
      .await
  }

  pub async fn delete(&self, id: EntityId) -> Result<(), ApiError> {
    self.client.mutate(&DeleteRestaurant { id }, &*self.api).await
  }

  /// Forget everything cached for the previous session.
  pub fn sign_out(&self) {
    let evicted = self.client.store().len();
    self.client.store().clear();
    info!(evicted, "cache cleared on sign-out");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{Review, Visit};
  use crate::auth::StaticToken;
  use crate::cache::FetchStatus;
  use crate::restaurants::view::tests::{been_to, want_to_go};
  use crate::restaurants::FilterCounts;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
  use std::sync::Mutex;

  /// In-memory backend
  #[derive(Default)]
  struct FakeApi {
    items: Mutex<Vec<UserRestaurant>>,
    list_calls: AtomicU32,
    search_calls: AtomicU32,
    fail_writes: AtomicBool,
  }

  impl FakeApi {
    fn with(items: Vec<UserRestaurant>) -> Arc<Self> {
      Arc::new(Self {
        items: Mutex::new(items),
        ..Default::default()
      })
    }

    fn check_write(&self) -> Result<(), ApiError> {
      if self.fail_writes.load(Ordering::SeqCst) {
        return Err(ApiError::Server {
          status: 500,
          message: "database unavailable".to_string(),
        });
      }
      Ok(())
    }

    fn modify(
      &self,
      id: &EntityId,
      f: impl FnOnce(&mut UserRestaurant),
    ) -> Result<UserRestaurant, ApiError> {
      self.check_write()?;
      let mut items = self.items.lock().expect("lock");
      let item = items
        .iter_mut()
        .find(|item| &item.id == id)
        .ok_or_else(|| ApiError::Server {
          status: 404,
          message: format!("{} not found", id),
        })?;
      f(item);
      Ok(item.clone())
    }
  }

  #[async_trait]
  impl RestaurantApi for FakeApi {
    async fn my_restaurants(&self, filter: ListFilter) -> Result<Vec<UserRestaurant>, ApiError> {
      self.list_calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(10)).await;
      let items = self.items.lock().expect("lock");
      Ok(
        items
          .iter()
          .filter(|item| filter.matches(item.status()))
          .cloned()
          .collect(),
      )
    }

    async fn search(&self, query: &str) -> Result<Vec<PlacePrediction>, ApiError> {
      self.search_calls.fetch_add(1, Ordering::SeqCst);
      Ok(vec![PlacePrediction {
        place_id: format!("place-{}", query),
        name: query.to_string(),
        address: "Somewhere 1".to_string(),
      }])
    }

    async fn add_manually(&self, dto: &AddRestaurantManually) -> Result<UserRestaurant, ApiError> {
      self.check_write()?;
      let mut items = self.items.lock().expect("lock");
      let id = format!("{}", items.len() + 100);
      let mut item = want_to_go(&id, &dto.name);
      item.restaurant.address = dto.address.clone();
      item.notes = dto.notes.clone();
      items.push(item.clone());
      Ok(item)
    }

    async fn mark_as_been_to(
      &self,
      id: &EntityId,
      review: &NewReview,
    ) -> Result<UserRestaurant, ApiError> {
      let review = Review {
        id: None,
        rating: review.rating,
        price_range: review.price_range,
        notes: review.notes.clone(),
        created_at: None,
      };
      self.modify(id, |item| item.visit = Visit::BeenTo(review))
    }

    async fn mark_as_want_to_go(&self, id: &EntityId) -> Result<UserRestaurant, ApiError> {
      self.modify(id, |item| item.visit = Visit::WantToGo)
    }

    async fn update(
      &self,
      id: &EntityId,
      dto: &UpdateRestaurant,
    ) -> Result<UserRestaurant, ApiError> {
      self.modify(id, |item| {
        if let Some(name) = &dto.name {
          item.restaurant.name = name.clone();
        }
        if let Some(address) = &dto.address {
          item.restaurant.address = address.clone();
        }
        if let Some(cuisine) = &dto.cuisine_type {
          item.restaurant.cuisine_type = Some(cuisine.clone());
        }
        if let Some(notes) = &dto.notes {
          item.notes = Some(notes.clone());
        }
      })
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
      self.check_write()?;
      self.items.lock().expect("lock").retain(|item| &item.id != id);
      Ok(())
    }

    async fn current_user(&self) -> Result<User, ApiError> {
      Ok(User {
        id: EntityId::new("u-1"),
        clerk_user_id: "user_abc".to_string(),
        email: "ada@example.com".to_string(),
        username: "ada".to_string(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
        location: None,
        description: None,
      })
    }
  }

  /// Backend that reports a review transition it did not perform
  struct LyingApi(Arc<FakeApi>);

  #[async_trait]
  impl RestaurantApi for LyingApi {
    async fn my_restaurants(&self, filter: ListFilter) -> Result<Vec<UserRestaurant>, ApiError> {
      self.0.my_restaurants(filter).await
    }
    async fn search(&self, query: &str) -> Result<Vec<PlacePrediction>, ApiError> {
      self.0.search(query).await
    }
    async fn add_manually(&self, dto: &AddRestaurantManually) -> Result<UserRestaurant, ApiError> {
      self.0.add_manually(dto).await
    }
    async fn mark_as_been_to(
      &self,
      id: &EntityId,
      _review: &NewReview,
    ) -> Result<UserRestaurant, ApiError> {
      self.0.mark_as_want_to_go(id).await
    }
    async fn mark_as_want_to_go(&self, id: &EntityId) -> Result<UserRestaurant, ApiError> {
      self.0.mark_as_want_to_go(id).await
    }
    async fn update(
      &self,
      id: &EntityId,
      dto: &UpdateRestaurant,
    ) -> Result<UserRestaurant, ApiError> {
      self.0.update(id, dto).await
    }
    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
      self.0.delete(id).await
    }
    async fn current_user(&self) -> Result<User, ApiError> {
      self.0.current_user().await
    }
  }

  fn service(api: Arc<dyn RestaurantApi>, tokens: StaticToken) -> Restaurants {
    Restaurants::new(
      api,
      Arc::new(tokens),
      QueryClient::default(),
      &Config::default(),
    )
  }

  fn seeded() -> Vec<UserRestaurant> {
    vec![
      want_to_go("1", "Oaxen"),
      want_to_go("2", "Ekstedt"),
      been_to("3", "Frantzén", 5),
    ]
  }

  #[tokio::test]
  async fn test_counts_come_from_one_collection() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));

    let all = restaurants.list_view(ListFilter::All).await;
    let been_to = restaurants.list_view(ListFilter::BeenTo).await;

    let view = all.data().expect("view");
    assert_eq!(
      view.counts,
      FilterCounts {
        all: 3,
        want_to_go: 2,
        been_to: 1
      }
    );
    assert_eq!(been_to.data().expect("view").len(), 1);
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_list_queries_issue_one_request() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));

    let (a, b, c) = tokio::join!(
      restaurants.my_restaurants(ListFilter::All),
      restaurants.list_view(ListFilter::WantToGo),
      restaurants.list_view(ListFilter::BeenTo),
    );

    assert!(a.is_success() && b.is_success() && c.is_success());
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_review_round_trip_moves_between_lists() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));
    assert!(restaurants.list_view(ListFilter::All).await.is_success());

    let reviewed = restaurants
      .mark_as_been_to(
        EntityId::new("1"),
        NewReview {
          rating: 4,
          price_range: 3,
          notes: Some("lovely".to_string()),
        },
      )
      .await
      .expect("mark as been to");
    assert_eq!(reviewed.review().map(|r| r.rating), Some(4));

    let view = restaurants.list_view(ListFilter::BeenTo).await;
    let view = view.data().expect("view");
    let item = view.get(&EntityId::new("1")).expect("moved to been-to");
    assert_eq!(item.review().map(|r| r.rating), Some(4));
    assert_eq!(view.counts.want_to_go, 1);
    assert_eq!(view.counts.been_to, 2);

    let back = restaurants
      .mark_as_want_to_go(EntityId::new("1"))
      .await
      .expect("delete review");
    assert!(back.review().is_none());

    let view = restaurants.list_view(ListFilter::WantToGo).await;
    let view = view.data().expect("view");
    assert!(view.get(&EntityId::new("1")).is_some_and(|i| i.review().is_none()));
    assert_eq!(view.counts.been_to, 1);
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_signed_out_queries_are_idle() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::signed_out());

    let list = restaurants.list_view(ListFilter::All).await;
    assert_eq!(list.status, FetchStatus::Idle);
    assert!(!list.is_loading());
    assert!(list.data.is_none());
    assert!(list.error.is_none());

    assert_eq!(restaurants.current_user().await.status, FetchStatus::Idle);
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_failed_mutation_leaves_cache_untouched() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));
    restaurants.list_view(ListFilter::All).await;
    let key = RestaurantKey::MyList(ListFilter::All).into();
    let before = restaurants
      .client()
      .store()
      .get::<Vec<UserRestaurant>>(&key)
      .expect("cached");

    api.fail_writes.store(true, Ordering::SeqCst);
    let result = restaurants.delete(EntityId::new("2")).await;

    assert_eq!(result.unwrap_err().status(), Some(500));
    let after = restaurants
      .client()
      .store()
      .get::<Vec<UserRestaurant>>(&key)
      .expect("cached");
    assert_eq!(after, before);
    assert!(!after.invalidated);
  }

  #[tokio::test]
  async fn test_invalid_review_is_never_sent() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));

    let result = restaurants
      .mark_as_been_to(
        EntityId::new("1"),
        NewReview {
          rating: 0,
          price_range: 2,
          notes: None,
        },
      )
      .await;

    assert!(matches!(result, Err(ApiError::Validation(_))));
    let items = api.items.lock().expect("lock");
    assert!(items.iter().all(|i| i.id.as_str() != "1" || i.review().is_none()));
  }

  #[tokio::test]
  async fn test_unexpected_transition_result_is_rejected() {
    let inner = FakeApi::with(seeded());
    let restaurants = service(Arc::new(LyingApi(inner)), StaticToken::new("token"));
    restaurants.list_view(ListFilter::All).await;

    let result = restaurants
      .mark_as_been_to(
        EntityId::new("1"),
        NewReview {
          rating: 4,
          price_range: 2,
          notes: None,
        },
      )
      .await;

    assert!(matches!(result, Err(ApiError::InvalidResponse(_))));
    // The server still answered 2xx, so the list is refetched on next read
    let snapshot = restaurants
      .client()
      .snapshot::<Vec<UserRestaurant>>(&RestaurantKey::MyList(ListFilter::All).into());
    assert!(snapshot.is_stale);
    assert_eq!(snapshot.data().map(Vec::len), Some(3));
  }

  #[tokio::test]
  async fn test_add_and_delete_refresh_the_list() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));

    let added = restaurants
      .add(AddRestaurantManually {
        name: "Rolfs Kök".to_string(),
        address: "Tegnérgatan 41".to_string(),
        ..Default::default()
      })
      .await
      .expect("add");
    let view = restaurants.list_view(ListFilter::WantToGo).await;
    assert_eq!(view.data().expect("view").counts.want_to_go, 3);

    restaurants.delete(added.id.clone()).await.expect("delete");
    let view = restaurants.list_view(ListFilter::All).await;
    assert!(!view.data().expect("view").contains(&added.id));
  }

  #[tokio::test]
  async fn test_search_needs_min_length() {
    let api = FakeApi::with(vec![]);
    let restaurants = service(api.clone(), StaticToken::new("token"));

    let short = restaurants.search(" s ").await;
    assert_eq!(short.status, FetchStatus::Idle);
    assert_eq!(api.search_calls.load(Ordering::SeqCst), 0);

    let hits = restaurants.search("sushi").await;
    assert_eq!(hits.data().expect("hits")[0].name, "sushi");
    restaurants.search("sushi ").await;
    assert_eq!(api.search_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_observed_list_refreshes_after_mutation() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));
    let observer = restaurants.observe_list(ListFilter::BeenTo).await;
    assert_eq!(observer.fetch().await.data().map(Vec::len), Some(1));

    restaurants
      .mark_as_been_to(
        EntityId::new("2"),
        NewReview {
          rating: 3,
          price_range: 1,
          notes: None,
        },
      )
      .await
      .expect("mark as been to");

    for _ in 0..50 {
      let refetched = api.list_calls.load(Ordering::SeqCst) == 2;
      if refetched && !restaurants.client().store().is_fetching(observer.key()) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(observer.state().data().map(Vec::len), Some(2));
  }

  #[tokio::test]
  async fn test_sign_out_clears_cache() {
    let api = FakeApi::with(seeded());
    let restaurants = service(api.clone(), StaticToken::new("token"));
    restaurants.list_view(ListFilter::All).await;
    restaurants.current_user().await;
    assert_eq!(restaurants.client().store().len(), 2);

    restaurants.sign_out();

    assert!(restaurants.client().store().is_empty());
  }
}
