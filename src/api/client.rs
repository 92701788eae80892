use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::api::api_types::{
  into_user_restaurants, ApiErrorBody, ApiPlacesSearchResult, ApiUserRestaurant,
};
use crate::api::types::{
  AddRestaurantManually, EntityId, ListFilter, NewReview, PlacePrediction, UpdateRestaurant, User,
  UserRestaurant,
};
use crate::auth::{fingerprint, TokenProvider};
use crate::config::ApiConfig;
use crate::error::ApiError;

/// Typed operations of the backend REST API.
///
/// Implemented over HTTP by [`HttpRestaurantApi`]; tests use in-memory fakes.
#[async_trait]
pub trait RestaurantApi: Send + Sync {
  /// `GET /api/restaurants/my-list?status=`
  async fn my_restaurants(&self, filter: ListFilter) -> Result<Vec<UserRestaurant>, ApiError>;

  /// `GET /api/restaurants/search?query=`
  async fn search(&self, query: &str) -> Result<Vec<PlacePrediction>, ApiError>;

  /// `POST /api/restaurants/manual`
  async fn add_manually(&self, dto: &AddRestaurantManually) -> Result<UserRestaurant, ApiError>;

  /// `POST /api/restaurants/{id}/mark-as-been-to`
  async fn mark_as_been_to(
    &self,
    id: &EntityId,
    review: &NewReview,
  ) -> Result<UserRestaurant, ApiError>;

  /// `DELETE /api/restaurants/{id}/review`
  async fn mark_as_want_to_go(&self, id: &EntityId) -> Result<UserRestaurant, ApiError>;

  /// `PATCH /api/restaurants/{id}`
  async fn update(
    &self,
    id: &EntityId,
    dto: &UpdateRestaurant,
  ) -> Result<UserRestaurant, ApiError>;

  /// `DELETE /api/restaurants/{id}`
  async fn delete(&self, id: &EntityId) -> Result<(), ApiError>;

  /// `GET /api/users/me`
  async fn current_user(&self) -> Result<User, ApiError>;
}

/// Backend client over reqwest
#[derive(Clone)]
pub struct HttpRestaurantApi {
  http: reqwest::Client,
  base_url: Url,
  tokens: Arc<dyn TokenProvider>,
}

impl HttpRestaurantApi {
  pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ApiError> {
    let base_url = Url::parse(&config.url)
      .map_err(|e| ApiError::validation(format!("invalid API url '{}': {}", config.url, e)))?;
    if base_url.cannot_be_a_base() {
      return Err(ApiError::validation(format!(
        "API url '{}' cannot be used as a base",
        config.url
      )));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;

    Ok(Self {
      http,
      base_url,
      tokens,
    })
  }

  /// Build `<base>/api/<segments..>`. Segments are percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().push("api").extend(segments);
    }
    url
  }

  /// Start a request with the bearer token attached.
  ///
  /// Fails with `Unauthenticated` before anything is sent when there is no
  /// token.
  async fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder, ApiError> {
    let token = self.tokens.token().await.ok_or(ApiError::Unauthenticated)?;
    debug!(
      "{} {} (token {})",
      method,
      url.path(),
      fingerprint(&token)
    );
    Ok(self.http.request(method, url).bearer_auth(token))
  }

  async fn parse_response<T: DeserializeOwned>(&self, response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
      Ok(response.json::<T>().await?)
    } else {
      let text = response.text().await.unwrap_or_default();
      let err = error_from_response(status, &text);
      warn!("Request failed: {}", err);
      Err(err)
    }
  }

  async fn parse_user_restaurant(&self, response: Response) -> Result<UserRestaurant, ApiError> {
    let api: ApiUserRestaurant = self.parse_response(response).await?;
    UserRestaurant::try_from(api)
  }
}

#[async_trait]
impl RestaurantApi for HttpRestaurantApi {
  async fn my_restaurants(&self, filter: ListFilter) -> Result<Vec<UserRestaurant>, ApiError> {
    let mut url = self.endpoint(&["restaurants", "my-list"]);
    url.query_pairs_mut().append_pair("status", filter.as_str());

    let response = self.authorized(Method::GET, url).await?.send().await?;
    let items: Vec<ApiUserRestaurant> = self.parse_response(response).await?;
    into_user_restaurants(items)
  }

  async fn search(&self, query: &str) -> Result<Vec<PlacePrediction>, ApiError> {
    let mut url = self.endpoint(&["restaurants", "search"]);
    url.query_pairs_mut().append_pair("query", query);

    let response = self.authorized(Method::GET, url).await?.send().await?;
    let result: ApiPlacesSearchResult = self.parse_response(response).await?;
    Ok(result.predictions)
  }

  async fn add_manually(&self, dto: &AddRestaurantManually) -> Result<UserRestaurant, ApiError> {
    let url = self.endpoint(&["restaurants", "manual"]);
    let response = self
      .authorized(Method::POST, url)
      .await?
      .json(dto)
      .send()
      .await?;
    self.parse_user_restaurant(response).await
  }

  async fn mark_as_been_to(
    &self,
    id: &EntityId,
    review: &NewReview,
  ) -> Result<UserRestaurant, ApiError> {
    let url = self.endpoint(&["restaurants", id.as_str(), "mark-as-been-to"]);
    let response = self
      .authorized(Method::POST, url)
      .await?
      .json(review)
      .send()
      .await?;
    self.parse_user_restaurant(response).await
  }

  async fn mark_as_want_to_go(&self, id: &EntityId) -> Result<UserRestaurant, ApiError> {
    let url = self.endpoint(&["restaurants", id.as_str(), "review"]);
    let response = self.authorized(Method::DELETE, url).await?.send().await?;
    self.parse_user_restaurant(response).await
  }

  async fn update(
    &self,
    id: &EntityId,
    dto: &UpdateRestaurant,
  ) -> Result<UserRestaurant, ApiError> {
    let url = self.endpoint(&["restaurants", id.as_str()]);
    let response = self
      .authorized(Method::PATCH, url)
      .await?
      .json(dto)
      .send()
      .await?;
    self.parse_user_restaurant(response).await
  }

  async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
    let url = self.endpoint(&["restaurants", id.as_str()]);
    let response = self.authorized(Method::DELETE, url).await?.send().await?;

    let status = response.status();
    if status.is_success() {
      return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    let err = error_from_response(status, &text);
    warn!("Delete of {} failed: {}", id, err);
    Err(err)
  }

  async fn current_user(&self) -> Result<User, ApiError> {
    let url = self.endpoint(&["users", "me"]);
    let response = self.authorized(Method::GET, url).await?.send().await?;
    self.parse_response(response).await
  }
}

/// Turn a non-2xx response into a `Server` error.
///
/// The message is the `message` (or `title`) field of a JSON error body, the
/// raw text otherwise, and the canonical reason phrase for an empty body.
pub fn error_from_response(status: StatusCode, body: &str) -> ApiError {
  let from_json = serde_json::from_str::<ApiErrorBody>(body)
    .ok()
    .and_then(|b| b.message.or(b.title))
    .filter(|m| !m.trim().is_empty());

  let message = match from_json {
    Some(message) => message,
    None if !body.trim().is_empty() => body.trim().to_string(),
    None => status
      .canonical_reason()
      .unwrap_or("unknown error")
      .to_string(),
  };

  ApiError::Server {
    status: status.as_u16(),
    message,
  }
}
