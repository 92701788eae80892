//! Map markers and viewport, independent of any mapping SDK.

use std::fmt::Write as _;

use crate::api::{Coordinates, EntityId, ListStatus, UserRestaurant};

/// Zoom used when a single marker is shown
pub const SINGLE_MARKER_ZOOM: u8 = 14;

/// Initial view before anything is placed: central Stockholm
pub const INITIAL_CENTER: Coordinates = Coordinates {
  latitude: 59.3293,
  longitude: 18.0686,
};
pub const INITIAL_ZOOM: u8 = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
  pub id: EntityId,
  pub name: String,
  pub address: String,
  pub coordinates: Coordinates,
  pub status: ListStatus,
  pub rating: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Viewport {
  Center { center: Coordinates, zoom: u8 },
  Bounds { south_west: Coordinates, north_east: Coordinates },
}

impl Viewport {
  pub fn initial() -> Self {
    Viewport::Center {
      center: INITIAL_CENTER,
      zoom: INITIAL_ZOOM,
    }
  }
}

/// Markers for every entry that has coordinates, in list order.
pub fn markers(items: &[UserRestaurant]) -> Vec<MapMarker> {
  items
    .iter()
    .filter_map(|item| {
      let coordinates = item.restaurant.coordinates?;
      Some(MapMarker {
        id: item.id.clone(),
        name: item.restaurant.name.clone(),
        address: item.restaurant.address.clone(),
        coordinates,
        status: item.status(),
        rating: item.review().map(|r| r.rating),
      })
    })
    .collect()
}

/// View that shows all markers: centered on a single one, the bounding box
/// of several, nothing for none.
pub fn viewport(markers: &[MapMarker]) -> Option<Viewport> {
  match markers {
    [] => None,
    [only] => Some(Viewport::Center {
      center: only.coordinates,
      zoom: SINGLE_MARKER_ZOOM,
    }),
    [first, rest @ ..] => {
      let mut south_west = first.coordinates;
      let mut north_east = first.coordinates;
      for marker in rest {
        let c = marker.coordinates;
        south_west.latitude = south_west.latitude.min(c.latitude);
        south_west.longitude = south_west.longitude.min(c.longitude);
        north_east.latitude = north_east.latitude.max(c.latitude);
        north_east.longitude = north_east.longitude.max(c.longitude);
      }
      Some(Viewport::Bounds {
        south_west,
        north_east,
      })
    }
  }
}

pub type MarkerClickHandler = Box<dyn FnMut(&EntityId) + Send>;

/// What a map widget has to offer. Rendering itself is the widget's business.
pub trait MapRenderer {
  fn set_markers(&mut self, markers: &[MapMarker], viewport: Option<Viewport>);
  fn on_marker_click(&mut self, handler: MarkerClickHandler);
}

/// Push the entries' markers and matching viewport to `renderer`.
pub fn show_on_map<R: MapRenderer + ?Sized>(renderer: &mut R, items: &[UserRestaurant]) -> usize {
  let markers = markers(items);
  let view = viewport(&markers);
  renderer.set_markers(&markers, view);
  markers.len()
}

/// Renders markers as plain text, one line each.
#[derive(Default)]
pub struct TextMap {
  output: String,
  on_click: Option<MarkerClickHandler>,
}

impl TextMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn output(&self) -> &str {
    &self.output
  }

  /// Simulate a click on the marker for `id`.
  pub fn click(&mut self, id: &EntityId) {
    if let Some(handler) = self.on_click.as_mut() {
      handler(id);
    }
  }
}

impl MapRenderer for TextMap {
  fn set_markers(&mut self, markers: &[MapMarker], viewport: Option<Viewport>) {
    self.output.clear();
    let view = viewport.unwrap_or_else(Viewport::initial);
    let _ = match view {
      Viewport::Center { center, zoom } => writeln!(
        self.output,
        "view: center {:.4},{:.4} zoom {}",
        center.latitude, center.longitude, zoom
      ),
      Viewport::Bounds {
        south_west,
        north_east,
      } => writeln!(
        self.output,
        "view: bounds {:.4},{:.4} .. {:.4},{:.4}",
        south_west.latitude, south_west.longitude, north_east.latitude, north_east.longitude
      ),
    };
    for marker in markers {
      let rating = marker
        .rating
        .map(|r| format!(" {}/5", r))
        .unwrap_or_default();
      let _ = writeln!(
        self.output,
        "{} {:.4},{:.4} {} [{}]{}",
        marker.id,
        marker.coordinates.latitude,
        marker.coordinates.longitude,
        marker.name,
        marker.status.label(),
        rating
      );
    }
  }

  fn on_marker_click(&mut self, handler: MarkerClickHandler) {
    self.on_click = Some(handler);
  }
}
