use crate::api::ListFilter;
use crate::cache::{CacheKey, KeyFilter};
use crate::cache_key;

/// Root shared by every restaurant query; mutations invalidate this prefix.
pub const RESTAURANTS: &str = "restaurants";

/// Cache keys of the restaurant queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestaurantKey {
  /// `["restaurants", <filter>]`
  MyList(ListFilter),
  /// `["restaurants", "search", <query>]`
  Search(String),
  /// `["user", "me"]`
  CurrentUser,
}

impl RestaurantKey {
  /// Everything under `["restaurants"]`
  pub fn all_restaurants() -> KeyFilter {
    KeyFilter::Prefix(cache_key![RESTAURANTS])
  }
}

impl From<RestaurantKey> for CacheKey {
  fn from(key: RestaurantKey) -> Self {
    match key {
      RestaurantKey::MyList(filter) => cache_key![RESTAURANTS, filter.as_str()],
      RestaurantKey::Search(query) => cache_key![RESTAURANTS, "search", query],
      RestaurantKey::CurrentUser => cache_key!["user", "me"],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_restaurant_keys_share_the_invalidation_prefix() {
    let prefix = RestaurantKey::all_restaurants();
    assert!(prefix.matches(&RestaurantKey::MyList(ListFilter::BeenTo).into()));
    assert!(prefix.matches(&RestaurantKey::Search("sushi".to_string()).into()));
    assert!(!prefix.matches(&RestaurantKey::CurrentUser.into()));
  }

  #[test]
  fn test_list_keys_differ_per_filter() {
    let all: CacheKey = RestaurantKey::MyList(ListFilter::All).into();
    let been_to: CacheKey = RestaurantKey::MyList(ListFilter::BeenTo).into();
    assert_ne!(all, been_to);
    assert_eq!(all, cache_key!["restaurants", "all"]);
  }
}
