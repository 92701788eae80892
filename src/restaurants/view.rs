//! List state derived from the single `all` collection.
//!
//! Per-filter lists and counts are partitions of one cached collection, so
//! the counts always add up and never disagree with the list on screen.

use crate::api::{EntityId, ListFilter, ListStatus, UserRestaurant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCounts {
  pub all: usize,
  pub want_to_go: usize,
  pub been_to: usize,
}

impl FilterCounts {
  pub fn from_items(items: &[UserRestaurant]) -> Self {
    items.iter().fold(Self::default(), |mut counts, item| {
      counts.all += 1;
      match item.status() {
        ListStatus::WantToGo => counts.want_to_go += 1,
        ListStatus::BeenTo => counts.been_to += 1,
      }
      counts
    })
  }

  pub fn get(&self, filter: ListFilter) -> usize {
    match filter {
      ListFilter::All => self.all,
      ListFilter::WantToGo => self.want_to_go,
      ListFilter::BeenTo => self.been_to,
    }
  }
}

/// The list for one filter plus counts for every filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestaurantListView {
  pub filter: ListFilter,
  pub items: Vec<UserRestaurant>,
  pub counts: FilterCounts,
}

impl RestaurantListView {
  pub fn derive(all: &[UserRestaurant], filter: ListFilter) -> Self {
    let items = all
      .iter()
      .filter(|item| filter.matches(item.status()))
      .cloned()
      .collect();

    Self {
      filter,
      items,
      counts: FilterCounts::from_items(all),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn get(&self, id: &EntityId) -> Option<&UserRestaurant> {
    self.items.iter().find(|item| &item.id == id)
  }

  pub fn contains(&self, id: &EntityId) -> bool {
    self.get(id).is_some()
  }

  /// Drop a selection that is no longer visible under the current filter.
  pub fn ensure_valid_selection(&self, selected: Option<EntityId>) -> Option<EntityId> {
    selected.filter(|id| self.contains(id))
  }
}

/// Keep a cursor inside a list of `len` items. `None` for an empty list.
pub fn clamp_index(index: usize, len: usize) -> Option<usize> {
  if len == 0 {
    None
  } else {
    Some(index.min(len - 1))
  }
}
