//! Write operations and the invalidation that follows them.
//!
//! A [`Mutation`] validates its payload, performs one backend call and names
//! the cache entries its success makes stale. [`QueryClient::mutate`] runs
//! that protocol: nothing is sent when validation fails, and a failed call
//! only touches the entries the mutation names for that error.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::KeyFilter;
use crate::error::ApiError;
use crate::query::QueryClient;

#[async_trait]
pub trait Mutation: Send + Sync {
  /// What the mutation runs against, typically the API client.
  type Context: ?Sized + Send + Sync;
  type Output: Send;

  /// Short name for logs
  fn name(&self) -> &'static str;

  /// Client-side checks. A failure blocks the request.
  fn validate(&self) -> Result<(), ApiError> {
    Ok(())
  }

  async fn execute(&self, ctx: &Self::Context) -> Result<Self::Output, ApiError>;

  /// Entries made stale by a successful run.
  fn invalidates(&self, output: &Self::Output) -> Vec<KeyFilter>;

  /// Entries made stale by a failed run. Empty unless the error can follow
  /// a write the server did perform.
  fn invalidates_on_error(&self, _err: &ApiError) -> Vec<KeyFilter> {
    Vec::new()
  }
}

impl QueryClient {
  /// Validate and execute `mutation`, then invalidate what it names.
  ///
  /// Observed queries among the invalidated entries refetch in the
  /// background; this returns without waiting for them.
  pub async fn mutate<M: Mutation>(
    &self,
    mutation: &M,
    ctx: &M::Context,
  ) -> Result<M::Output, ApiError> {
    let name = mutation.name();

    if let Err(err) = mutation.validate() {
      debug!(mutation = name, error = %err, "mutation rejected");
      return Err(err);
    }

    match mutation.execute(ctx).await {
      Ok(output) => {
        for filter in mutation.invalidates(&output) {
          self.invalidate_queries(&filter);
        }
        debug!(mutation = name, "mutation succeeded");
        Ok(output)
      }
      Err(err) => {
        warn!(mutation = name, error = %err, "mutation failed");
        for filter in mutation.invalidates_on_error(&err) {
          self.invalidate_queries(&filter);
        }
        Err(err)
      }
    }
  }
}
