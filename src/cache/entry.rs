//! Entry and result types for the fragment cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Lifecycle status of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  /// Data came back whole from the adapter
  Complete,
  /// Data was assembled from fallback partials
  Partial,
  /// Data (if any) must be refetched before it is trusted
  Stale,
  /// A request is in flight
  Loading,
}

/// When an entry was last filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timestamp {
  /// No successful fetch has completed.
  Stale,
  /// A fetch is in flight.
  Loading,
  /// Filled at this time.
  At(DateTime<Utc>),
}

impl Timestamp {
  pub fn now() -> Self {
    Timestamp::At(Utc::now())
  }

  pub fn is_fresh(&self) -> bool {
    matches!(self, Timestamp::At(_))
  }
}

/// Cached data for one entity under one partial.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentEntry {
  pub status: Status,
  pub timestamp: Timestamp,
  pub data: Option<Value>,
}

/// What a query key points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryData {
  /// Ordered ids of a collection listing.
  Ids(Vec<String>),
  /// The entity an item path resolved to.
  Id(String),
  /// Body of a non-entity resource.
  Raw(Value),
}

/// Cached result set for one canonical base path.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEntry {
  pub status: Status,
  pub timestamp: Timestamp,
  pub data: Option<QueryData>,
}

/// Status/timestamp patch applied by `touch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Patch {
  pub status: Option<Status>,
  pub timestamp: Option<Timestamp>,
}

impl Patch {
  /// Mark a request as in flight.
  pub fn loading() -> Self {
    Self {
      status: Some(Status::Loading),
      timestamp: Some(Timestamp::Loading),
    }
  }

  /// Return an entry to the terminal stale state.
  pub fn stale() -> Self {
    Self {
      status: Some(Status::Stale),
      timestamp: Some(Timestamp::Stale),
    }
  }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentResult {
  /// None when nothing was cached at all
  pub status: Option<Status>,
  pub timestamp: Timestamp,
  pub data: Value,
  /// Partials that contributed to `data`
  pub fragments: Vec<String>,
}

impl FragmentResult {
  pub(crate) fn empty(data: Value) -> Self {
    Self {
      status: None,
      timestamp: Timestamp::Stale,
      data,
      fragments: Vec::new(),
    }
  }

  /// Cached data that was filled by a completed fetch and not invalidated since.
  pub fn is_fresh(&self) -> bool {
    self.timestamp.is_fresh() && matches!(self.status, Some(Status::Complete | Status::Partial))
  }
}

/// Keys a mutation affected. Callers emit one change event per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Touched {
  pub ids: BTreeSet<String>,
  pub queries: BTreeSet<String>,
}

impl Touched {
  pub fn is_empty(&self) -> bool {
    self.ids.is_empty() && self.queries.is_empty()
  }

  pub fn extend(&mut self, other: Touched) {
    self.ids.extend(other.ids);
    self.queries.extend(other.queries);
  }
}

/// True for data worth caching (anything but an absent value or null).
pub(crate) fn has_data(data: Option<&Value>) -> bool {
  !matches!(data, None | Some(Value::Null))
}

/// True for data that cannot satisfy a read: absent, null or an empty object.
pub(crate) fn is_empty_data(data: Option<&Value>) -> bool {
  match data {
    None | Some(Value::Null) => true,
    Some(Value::Object(map)) => map.is_empty(),
    _ => false,
  }
}

/// Shallow merge of `patch` onto `base`. Non-object values replace.
pub(crate) fn shallow_merge(base: Option<&Value>, patch: &Value) -> Value {
  match (base, patch) {
    (Some(Value::Object(base)), Value::Object(patch)) => {
      let mut merged = base.clone();
      merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
      Value::Object(merged)
    }
    _ => patch.clone(),
  }
}
