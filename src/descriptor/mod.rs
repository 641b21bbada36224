//! Resolved request descriptors.
//!
//! A [`Descriptor`] is the canonical description of one cache operation. It is
//! produced by folding a stack of schema nodes and modifiers (see [`resolve`])
//! and is the only thing the fragment cache ever sees.

mod resolve;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::{Classification, NodeId, Strategy};
use crate::store::Store;

pub use resolve::resolve;

/// Name of the partial used when none is declared.
pub const DEFAULT_PARTIAL: &str = "default";

/// Event key used when a descriptor has neither id nor path.
pub const DEFAULT_EVENT: &str = "change";

pub type Params = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  #[default]
  Read,
  Create,
  Update,
  Delete,
  Inspect,
}

impl Action {
  /// Read-like actions carry the query string in their canonical paths.
  pub fn is_read(self) -> bool {
    matches!(self, Action::Read | Action::Inspect)
  }
}

/// One element of a resolution stack.
#[derive(Debug, Clone)]
pub enum StackElement {
  Node(NodeId),
  /// Path parameters (a JSON object).
  Params(Value),
  /// Query parameters (a JSON object).
  Query(Value),
  /// Literal segment that is part of the canonical resource path.
  Segment(String),
  /// Literal segment appended to `path` only.
  Modifier(String),
  /// Request body fragment (a JSON object).
  Payload(Value),
}

#[derive(Debug, Clone, Serialize)]
pub struct Descriptor {
  pub action: Action,
  pub classify: Classification,
  #[serde(skip)]
  pub store: Option<Arc<Store>>,
  #[serde(rename = "type")]
  pub type_name: Option<String>,
  pub id: Option<String>,
  /// Param key the id was read from.
  pub id_param: String,
  pub host: String,
  pub base_path: String,
  pub path: String,
  pub collection_path: Option<String>,
  pub params: Params,
  pub query_params: Params,
  pub path_params: BTreeMap<String, String>,
  pub payload: Map<String, Value>,
  pub partial: String,
  /// Fallback partials consulted when `partial` has no data.
  pub fragments: Vec<String>,
  pub cache_strategy: Strategy,
  pub collection_strategy: Strategy,
  pub nav_path: String,
  pub event: String,
  pub valid: bool,
  /// Unresolved parameter names.
  pub errors: Vec<String>,
}

impl Descriptor {
  /// A blank descriptor; mostly useful for driving a cache directly.
  pub fn new(classify: Classification) -> Self {
    Self {
      action: Action::Read,
      classify,
      store: None,
      type_name: None,
      id: None,
      id_param: "id".to_string(),
      host: String::new(),
      base_path: String::new(),
      path: String::new(),
      collection_path: None,
      params: Params::new(),
      query_params: Params::new(),
      path_params: BTreeMap::new(),
      payload: Map::new(),
      partial: DEFAULT_PARTIAL.to_string(),
      fragments: Vec::new(),
      cache_strategy: Strategy::Merge,
      collection_strategy: Strategy::Merge,
      nav_path: String::new(),
      event: DEFAULT_EVENT.to_string(),
      valid: true,
      errors: Vec::new(),
    }
  }

  pub fn with_id(mut self, id: impl Into<String>) -> Self {
    let id = id.into();
    self.event = id.clone();
    self.id = Some(id);
    self
  }

  pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
    self.base_path = base_path.into();
    self.path = self.base_path.clone();
    if self.id.is_none() {
      self.event = self.base_path.clone();
    }
    self
  }

  pub fn with_partial(mut self, partial: impl Into<String>) -> Self {
    self.partial = partial.into();
    self
  }

  pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.fragments = fragments.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_cache_strategy(mut self, strategy: Strategy) -> Self {
    self.cache_strategy = strategy;
    self
  }

  pub fn with_collection_strategy(mut self, strategy: Strategy) -> Self {
    self.collection_strategy = strategy;
    self
  }

  pub fn with_action(mut self, action: Action) -> Self {
    self.action = action;
    self
  }

  /// The base path if one was resolved.
  pub fn base_path(&self) -> Option<&str> {
    if self.base_path.is_empty() {
      None
    } else {
      Some(&self.base_path)
    }
  }
}
