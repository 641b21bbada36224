//! Error type shared by the resolver, the cache and the client.

use thiserror::Error;

use crate::schema::Classification;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
  /// A schema node definition carries a key its classification does not allow.
  #[error("invalid {classification} definition for '{identifier}': {reason}")]
  InvalidDefinition {
    classification: Classification,
    identifier: String,
    reason: String,
  },

  /// Required URI parameters could not be filled.
  #[error("unresolved parameters [{}] for path {path} (params: {params})", missing.join(", "))]
  Unresolved {
    path: String,
    missing: Vec<String>,
    params: String,
  },

  /// A stack element the resolver cannot dispatch on, or a navigation to a missing leaf.
  #[error("invalid stack: {0}")]
  InvalidStack(String),

  /// The fragment and query indexes disagree, or data has the wrong shape.
  #[error("cache consistency violated: {0}")]
  Consistency(String),

  #[error("store for type '{0}' is already registered")]
  DuplicateStore(String),

  /// Transport or upstream failure reported by an adapter.
  #[error("adapter error: {0}")]
  Adapter(String),

  #[error("lock poisoned: {0}")]
  LockPoisoned(String),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

impl Error {
  /// True for failures caused by missing URI parameters.
  pub fn is_unresolved(&self) -> bool {
    matches!(self, Error::Unresolved { .. })
  }
}
