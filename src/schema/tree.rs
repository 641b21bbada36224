//! Arena-backed schema tree.

use std::fmt;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::error::{Error, Result};
use crate::store::StoreRegistry;

use super::node::{Classification, Definition, Leaf, NodeId, SchemaNode};

/// An immutable tree of schema nodes.
///
/// Nodes live in an arena and reference each other by [`NodeId`], so reusing a
/// node at several positions (including under one of its own descendants)
/// never creates an owning cycle.
pub struct SchemaTree {
  nodes: Vec<SchemaNode>,
  registry: Option<Arc<StoreRegistry>>,
  adapter: Option<Arc<dyn Adapter>>,
}

impl SchemaTree {
  pub fn builder(root: Definition) -> Result<SchemaTreeBuilder> {
    SchemaTreeBuilder::new(root)
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn node(&self, id: NodeId) -> Option<&SchemaNode> {
    self.nodes.get(id.0)
  }

  /// Store registry scoped to this tree, if any.
  pub fn registry(&self) -> Option<&Arc<StoreRegistry>> {
    self.registry.as_ref()
  }

  /// Adapter scoped to this tree, if any.
  pub fn adapter(&self) -> Option<&Arc<dyn Adapter>> {
    self.adapter.as_ref()
  }

  /// Children of the last node of `node_stack` that are visible from that stack.
  pub fn visible_leafs(&self, node_stack: &[NodeId]) -> Vec<NodeId> {
    let Some(current) = node_stack.last().and_then(|id| self.node(*id)) else {
      return Vec::new();
    };
    current
      .leafs
      .iter()
      .filter(|leaf| match &leaf.required {
        Some(required) => node_stack.ends_with(required),
        None => true,
      })
      .map(|leaf| leaf.node)
      .collect()
  }

  /// Find a visible child by identifier.
  pub fn find_leaf(&self, node_stack: &[NodeId], name: &str) -> Option<NodeId> {
    self.visible_leafs(node_stack).into_iter().find(|id| {
      self
        .node(*id)
        .and_then(|n| n.identifier.as_deref())
        .is_some_and(|identifier| identifier == name)
    })
  }
}

impl fmt::Debug for SchemaTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchemaTree")
      .field("nodes", &self.nodes)
      .field("registry", &self.registry.is_some())
      .field("adapter", &self.adapter.is_some())
      .finish()
  }
}

/// Mutable construction phase of a [`SchemaTree`].
pub struct SchemaTreeBuilder {
  nodes: Vec<SchemaNode>,
  registry: Option<Arc<StoreRegistry>>,
  adapter: Option<Arc<dyn Adapter>>,
}

impl SchemaTreeBuilder {
  /// Start a tree whose root is a `schema` node. The root `path` is the host prefix.
  pub fn new(root: Definition) -> Result<Self> {
    root.validate(Classification::Schema, "schema")?;
    Ok(Self {
      nodes: vec![SchemaNode {
        classification: Classification::Schema,
        identifier: None,
        definition: root,
        leafs: Vec::new(),
      }],
      registry: None,
      adapter: None,
    })
  }

  pub fn root(&self) -> NodeId {
    NodeId(0)
  }

  pub fn with_registry(mut self, registry: Arc<StoreRegistry>) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
    self.adapter = Some(adapter);
    self
  }

  /// Create a node and attach it under `parent`.
  pub fn add(
    &mut self,
    parent: NodeId,
    classification: Classification,
    identifier: &str,
    definition: Definition,
  ) -> Result<NodeId> {
    if classification == Classification::Schema {
      return Err(Error::InvalidDefinition {
        classification,
        identifier: identifier.to_string(),
        reason: "only the root may be a schema node".to_string(),
      });
    }
    if identifier.is_empty() || identifier.contains('.') {
      return Err(Error::InvalidDefinition {
        classification,
        identifier: identifier.to_string(),
        reason: "identifier must be non-empty and must not contain '.'".to_string(),
      });
    }
    definition.validate(classification, identifier)?;
    self.check_parent(parent)?;

    let duplicate = self.nodes[parent.0].leafs.iter().any(|leaf| {
      leaf.required.is_none() && self.nodes[leaf.node.0].identifier.as_deref() == Some(identifier)
    });
    if duplicate {
      return Err(Error::InvalidDefinition {
        classification,
        identifier: identifier.to_string(),
        reason: "a leaf with this identifier already exists under the parent".to_string(),
      });
    }

    let id = NodeId(self.nodes.len());
    self.nodes.push(SchemaNode {
      classification,
      identifier: Some(identifier.to_string()),
      definition,
      leafs: Vec::new(),
    });
    self.nodes[parent.0].leafs.push(Leaf {
      node: id,
      required: None,
    });
    Ok(id)
  }

  /// Attach an existing node under another parent.
  ///
  /// With `required` set, the link is only visible when the traversal's node
  /// stack ends with that sequence.
  pub fn attach(
    &mut self,
    parent: NodeId,
    child: NodeId,
    required: Option<Vec<NodeId>>,
  ) -> Result<()> {
    self.check_parent(parent)?;
    if child.0 == 0 || child.0 >= self.nodes.len() {
      return Err(Error::InvalidStack(format!(
        "node {:?} cannot be attached",
        child
      )));
    }
    if let Some(required) = &required {
      if let Some(missing) = required.iter().find(|id| id.0 >= self.nodes.len()) {
        return Err(Error::InvalidStack(format!(
          "required stack references unknown node {:?}",
          missing
        )));
      }
    }
    self.nodes[parent.0].leafs.push(Leaf {
      node: child,
      required,
    });
    Ok(())
  }

  /// Look up a node by its dotted identifier path from the root.
  pub fn find(&self, nav_path: &str) -> Option<NodeId> {
    let mut current = self.root();
    for name in nav_path.split('.').filter(|s| !s.is_empty()) {
      current = self.nodes[current.0]
        .leafs
        .iter()
        .filter(|leaf| leaf.required.is_none())
        .map(|leaf| leaf.node)
        .find(|id| self.nodes[id.0].identifier.as_deref() == Some(name))?;
    }
    Some(current)
  }

  pub fn build(self) -> Arc<SchemaTree> {
    Arc::new(SchemaTree {
      nodes: self.nodes,
      registry: self.registry,
      adapter: self.adapter,
    })
  }

  fn check_parent(&self, parent: NodeId) -> Result<()> {
    if parent.0 >= self.nodes.len() {
      return Err(Error::InvalidStack(format!(
        "parent node {:?} does not exist",
        parent
      )));
    }
    Ok(())
  }
}
