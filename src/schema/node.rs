//! Schema node types and definition validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::Store;

/// Position of a node inside a [`super::SchemaTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
  Schema,
  Namespace,
  Collection,
  Item,
  Resource,
}

impl fmt::Display for Classification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Classification::Schema => "schema",
      Classification::Namespace => "namespace",
      Classification::Collection => "collection",
      Classification::Item => "item",
      Classification::Resource => "resource",
    };
    f.write_str(name)
  }
}

/// How new data combines with cached data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
  #[default]
  Merge,
  Replace,
}

/// Reference to the store a node's entities live in.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "String")]
pub enum StoreRef {
  /// Looked up (and lazily created) in the registry in scope.
  Named(String),
  Direct(Arc<Store>),
}

impl From<String> for StoreRef {
  fn from(name: String) -> Self {
    StoreRef::Named(name)
  }
}

impl From<&str> for StoreRef {
  fn from(name: &str) -> Self {
    StoreRef::Named(name.to_string())
  }
}

impl From<Arc<Store>> for StoreRef {
  fn from(store: Arc<Store>) -> Self {
    StoreRef::Direct(store)
  }
}

/// Definition keys of a schema node. Which keys are accepted depends on the classification.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Definition {
  pub path: Option<String>,
  pub param_id: Option<String>,
  #[serde(default)]
  pub param_map: BTreeMap<String, String>,
  pub store: Option<StoreRef>,
  pub partial: Option<String>,
  #[serde(default)]
  pub fragments: Vec<String>,
  pub cache_strategy: Option<Strategy>,
  pub collection_strategy: Option<Strategy>,
}

impl Definition {
  pub fn with_path(mut self, path: impl Into<String>) -> Self {
    self.path = Some(path.into());
    self
  }

  pub fn with_param_id(mut self, param_id: impl Into<String>) -> Self {
    self.param_id = Some(param_id.into());
    self
  }

  pub fn with_param_map(mut self, token: impl Into<String>, key: impl Into<String>) -> Self {
    self.param_map.insert(token.into(), key.into());
    self
  }

  pub fn with_store(mut self, store: impl Into<StoreRef>) -> Self {
    self.store = Some(store.into());
    self
  }

  pub fn with_partial(mut self, partial: impl Into<String>) -> Self {
    self.partial = Some(partial.into());
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
    self.cache_strategy = Some(strategy);
    self
  }

  pub fn with_collection_strategy(mut self, strategy: Strategy) -> Self {
    self.collection_strategy = Some(strategy);
    self
  }

  /// Names of the keys that are set.
  fn keys(&self) -> Vec<&'static str> {
    let mut keys = Vec::new();
    if self.path.is_some() {
      keys.push("path");
    }
    if self.param_id.is_some() {
      keys.push("param_id");
    }
    if !self.param_map.is_empty() {
      keys.push("param_map");
    }
    if self.store.is_some() {
      keys.push("store");
    }
    if self.partial.is_some() {
      keys.push("partial");
    }
    if !self.fragments.is_empty() {
      keys.push("fragments");
    }
    if self.cache_strategy.is_some() {
      keys.push("cache_strategy");
    }
    if self.collection_strategy.is_some() {
      keys.push("collection_strategy");
    }
    keys
  }

  /// Reject keys the classification does not accept.
  pub fn validate(&self, classification: Classification, identifier: &str) -> Result<()> {
    let allowed = allowed_keys(classification);
    if let Some(key) = self.keys().into_iter().find(|k| !allowed.contains(k)) {
      return Err(Error::InvalidDefinition {
        classification,
        identifier: identifier.to_string(),
        reason: format!("key '{}' is not allowed", key),
      });
    }
    if let Some(param_id) = &self.param_id {
      if param_id.is_empty() {
        return Err(Error::InvalidDefinition {
          classification,
          identifier: identifier.to_string(),
          reason: "param_id must not be empty".to_string(),
        });
      }
    }
    Ok(())
  }
}

fn allowed_keys(classification: Classification) -> &'static [&'static str] {
  match classification {
    Classification::Schema => &["path"],
    Classification::Namespace | Classification::Collection => &[
      "path",
      "param_map",
      "store",
      "partial",
      "fragments",
      "cache_strategy",
      "collection_strategy",
    ],
    Classification::Item => &[
      "path",
      "param_id",
      "param_map",
      "store",
      "partial",
      "fragments",
      "cache_strategy",
    ],
    Classification::Resource => &[
      "path",
      "param_map",
      "store",
      "partial",
      "fragments",
      "cache_strategy",
    ],
  }
}

/// A child link. `required` restricts visibility to traversals whose node
/// stack ends with exactly that sequence.
#[derive(Debug, Clone)]
pub struct Leaf {
  pub node: NodeId,
  pub required: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct SchemaNode {
  pub classification: Classification,
  pub identifier: Option<String>,
  pub definition: Definition,
  pub(crate) leafs: Vec<Leaf>,
}

impl SchemaNode {
  pub fn leafs(&self) -> &[Leaf] {
    &self.leafs
  }

  /// Id param name for an item node: declared, else `<identifier>Id`.
  pub fn param_id(&self) -> Option<String> {
    if let Some(param_id) = &self.definition.param_id {
      return Some(param_id.clone());
    }
    match (self.classification, &self.identifier) {
      (Classification::Item, Some(identifier)) => Some(format!("{}Id", identifier)),
      _ => None,
    }
  }

  /// The URI template this node contributes. The schema root contributes none.
  pub fn template(&self) -> Option<String> {
    if let Some(path) = &self.definition.path {
      return Some(path.clone());
    }
    match self.classification {
      Classification::Schema => None,
      Classification::Item => self.param_id().map(|p| format!(":{}", p)),
      _ => self.identifier.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_item_accepts_param_id() {
    let def = Definition::default().with_param_id("projectId");
    assert!(def.validate(Classification::Item, "project").is_ok());
  }

  #[test]
  fn test_collection_rejects_param_id() {
    let def = Definition::default().with_param_id("projectId");
    let err = def
      .validate(Classification::Collection, "projects")
      .unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition { .. }));
    assert!(err.to_string().contains("param_id"));
  }

  #[test]
  fn test_schema_only_accepts_path() {
    let def = Definition::default().with_store("project");
    assert!(def.validate(Classification::Schema, "root").is_err());
    let def = Definition::default().with_path("https://api.example.com");
    assert!(def.validate(Classification::Schema, "root").is_ok());
  }

  #[test]
  fn test_unknown_yaml_key_is_rejected() {
    let result: std::result::Result<Definition, _> = serde_yaml::from_str("pth: projects");
    assert!(result.is_err());
  }

  #[test]
  fn test_store_ref_from_yaml_string() {
    let def: Definition = serde_yaml::from_str("store: project").unwrap();
    assert!(matches!(def.store, Some(StoreRef::Named(ref n)) if n == "project"));
  }

  #[test]
  fn test_item_template_defaults_from_identifier() {
    let node = SchemaNode {
      classification: Classification::Item,
      identifier: Some("project".to_string()),
      definition: Definition::default(),
      leafs: Vec::new(),
    };
    assert_eq!(node.param_id().as_deref(), Some("projectId"));
    assert_eq!(node.template().as_deref(), Some(":projectId"));
  }
}
