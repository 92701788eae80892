//! Bearer token sources.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Environment variable holding the session token
pub const TOKEN_ENV_VAR: &str = "PLATEMATES_TOKEN";

/// Source of the current session token.
///
/// Returns `None` when the user is signed out. Queries are disabled and
/// requests fail with `Unauthenticated` in that state.
#[async_trait]
pub trait TokenProvider: Send + Sync {
  async fn token(&self) -> Option<String>;
}

/// A fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
  pub fn new(token: impl Into<String>) -> Self {
    Self(Some(token.into()))
  }

  pub fn signed_out() -> Self {
    Self(None)
  }
}

#[async_trait]
impl TokenProvider for StaticToken {
  async fn token(&self) -> Option<String> {
    non_empty(self.0.clone())
  }
}

/// Reads [`TOKEN_ENV_VAR`] on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvToken;

#[async_trait]
impl TokenProvider for EnvToken {
  async fn token(&self) -> Option<String> {
    non_empty(std::env::var(TOKEN_ENV_VAR).ok())
  }
}

fn non_empty(token: Option<String>) -> Option<String> {
  token
    .map(|t| t.trim().to_string())
    .filter(|t| !t.is_empty())
}

/// Short stable identifier for a token, safe to log.
pub fn fingerprint(token: &str) -> String {
  let digest = Sha256::digest(token.as_bytes());
  hex::encode(&digest[..6])
}
