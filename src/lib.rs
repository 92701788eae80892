//! Client data layer for a restaurant list backend: a typed REST client, a
//! keyed query cache with invalidation, and the list/map state derived from
//! it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod mutation;
pub mod query;
pub mod restaurants;

pub use error::ApiError;
