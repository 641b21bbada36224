//! A position in the schema tree plus the modifiers applied along the way.

use serde_json::Value;
use std::sync::Arc;

use crate::descriptor::{self, Action, Descriptor, StackElement};
use crate::error::{Error, Result};
use crate::store::StoreRegistry;

use super::node::{Classification, NodeId, SchemaNode};
use super::tree::SchemaTree;

/// Builds the stack handed to the descriptor resolver.
///
/// Cursors are cheap to clone and are meant to be built fresh per operation.
#[derive(Debug, Clone)]
pub struct Cursor {
  tree: Arc<SchemaTree>,
  stack: Vec<StackElement>,
}

impl Cursor {
  /// A cursor at the root of `tree`.
  pub fn new(tree: Arc<SchemaTree>) -> Self {
    let root = tree.root();
    Self {
      tree,
      stack: vec![StackElement::Node(root)],
    }
  }

  pub fn tree(&self) -> &Arc<SchemaTree> {
    &self.tree
  }

  pub fn stack(&self) -> &[StackElement] {
    &self.stack
  }

  /// Only the schema nodes of the stack, in order.
  pub fn node_stack(&self) -> Vec<NodeId> {
    self
      .stack
      .iter()
      .filter_map(|element| match element {
        StackElement::Node(id) => Some(*id),
        _ => None,
      })
      .collect()
  }

  /// The node this cursor points at.
  pub fn node(&self) -> Option<&SchemaNode> {
    self.node_stack().last().and_then(|id| self.tree.node(*id))
  }

  pub fn classification(&self) -> Option<Classification> {
    self.node().map(|n| n.classification)
  }

  /// Dotted identifiers from the root to this position.
  pub fn nav_path(&self) -> String {
    self
      .node_stack()
      .iter()
      .filter_map(|id| self.tree.node(*id))
      .filter_map(|n| n.identifier.as_deref())
      .collect::<Vec<_>>()
      .join(".")
  }

  /// Step into a visible child.
  pub fn leaf(&self, name: &str) -> Result<Cursor> {
    let node_stack = self.node_stack();
    let child = self.tree.find_leaf(&node_stack, name).ok_or_else(|| {
      Error::InvalidStack(format!(
        "no leaf '{}' under '{}'",
        name,
        self.nav_path()
      ))
    })?;
    Ok(self.clone().push(StackElement::Node(child)))
  }

  /// Step through a dotted identifier path.
  pub fn navigate(&self, nav_path: &str) -> Result<Cursor> {
    nav_path
      .split('.')
      .filter(|s| !s.is_empty())
      .try_fold(self.clone(), |cursor, name| cursor.leaf(name))
  }

  /// Cursors for every child visible from this position.
  pub fn leafs(&self) -> Vec<Cursor> {
    self
      .tree
      .visible_leafs(&self.node_stack())
      .into_iter()
      .map(|id| self.clone().push(StackElement::Node(id)))
      .collect()
  }

  pub fn push(mut self, element: StackElement) -> Self {
    self.stack.push(element);
    self
  }

  /// Apply path parameters; `params` must be a JSON object.
  pub fn params(self, params: Value) -> Self {
    self.push(StackElement::Params(params))
  }

  /// Apply query parameters; `query` must be a JSON object.
  pub fn query(self, query: Value) -> Self {
    self.push(StackElement::Query(query))
  }

  /// Append a literal segment that is part of the resource identity.
  pub fn segment(self, segment: impl Into<String>) -> Self {
    self.push(StackElement::Segment(segment.into()))
  }

  /// Append a literal segment that only shows up in `path`.
  pub fn modifier(self, segment: impl Into<String>) -> Self {
    self.push(StackElement::Modifier(segment.into()))
  }

  /// Merge an object into the outgoing request body.
  pub fn payload(self, payload: Value) -> Self {
    self.push(StackElement::Payload(payload))
  }

  /// Resolve this stack, failing on unresolved parameters.
  pub fn resolve(&self, action: Action, registry: &Arc<StoreRegistry>) -> Result<Descriptor> {
    descriptor::resolve(&self.tree, registry, action, &self.stack, false)
  }

  /// Resolve this stack, reporting unresolved parameters through `valid`.
  pub fn resolve_lenient(
    &self,
    action: Action,
    registry: &Arc<StoreRegistry>,
  ) -> Result<Descriptor> {
    descriptor::resolve(&self.tree, registry, action, &self.stack, true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::Definition;
  use serde_json::json;

  fn tree() -> Arc<SchemaTree> {
    let mut builder = SchemaTree::builder(Definition::default()).unwrap();
    let root = builder.root();
    let projects = builder
      .add(root, Classification::Collection, "projects", Definition::default())
      .unwrap();
    builder
      .add(projects, Classification::Item, "project", Definition::default())
      .unwrap();
    builder.build()
  }

  #[test]
  fn test_navigate_and_nav_path() {
    let cursor = Cursor::new(tree()).navigate("projects.project").unwrap();
    assert_eq!(cursor.nav_path(), "projects.project");
    assert_eq!(cursor.classification(), Some(Classification::Item));
  }

  #[test]
  fn test_missing_leaf_is_an_error() {
    let err = Cursor::new(tree()).navigate("projects.nope").unwrap_err();
    assert!(matches!(err, Error::InvalidStack(_)));
    assert!(err.to_string().contains("nope"));
  }

  #[test]
  fn test_modifiers_do_not_change_node_stack() {
    let cursor = Cursor::new(tree())
      .navigate("projects")
      .unwrap()
      .params(json!({ "a": 1 }))
      .modifier("export");
    assert_eq!(cursor.node_stack().len(), 2);
    assert_eq!(cursor.stack().len(), 4);
    assert_eq!(cursor.leafs().len(), 1);
  }
}
