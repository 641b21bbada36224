use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::schema::{
  Classification, Definition, NodeId, SchemaTree, SchemaTreeBuilder, StoreRef, Strategy,
};
use crate::store::{StoreDefinition, StoreRegistry};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  /// URI prefix every resolved path starts with (e.g. "https://api.example.com/v1")
  #[serde(default)]
  pub host: String,
  /// Key response bodies are wrapped in, if any (e.g. "data")
  pub envelope: Option<String>,
  #[serde(default)]
  pub stores: Vec<StoreDefinition>,
  /// Leafs of the schema root
  #[serde(default)]
  pub schema: Vec<LeafConfig>,
}

/// A schema leaf: either a new node or a link to one declared elsewhere.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LeafConfig {
  Link(LinkConfig),
  Node(NodeConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
  /// Dotted identifier path of the linked node, from the root
  pub link: String,
  /// Only show the link along the node stack it is declared under
  #[serde(default)]
  pub detached: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
  pub name: String,
  pub kind: Classification,
  pub path: Option<String>,
  pub param_id: Option<String>,
  #[serde(default)]
  pub param_map: BTreeMap<String, String>,
  pub store: Option<String>,
  pub partial: Option<String>,
  #[serde(default)]
  pub fragments: Vec<String>,
  pub cache_strategy: Option<Strategy>,
  pub collection_strategy: Option<Strategy>,
  #[serde(default)]
  pub leafs: Vec<LeafConfig>,
}

impl NodeConfig {
  fn definition(&self) -> Definition {
    Definition {
      path: self.path.clone(),
      param_id: self.param_id.clone(),
      param_map: self.param_map.clone(),
      store: self.store.clone().map(StoreRef::Named),
      partial: self.partial.clone(),
      fragments: self.fragments.clone(),
      cache_strategy: self.cache_strategy,
      collection_strategy: self.collection_strategy,
    }
  }
}

/// A link waiting for every node to exist.
struct PendingLink {
  parent: NodeId,
  node_stack: Vec<NodeId>,
  link: LinkConfig,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./restcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/restcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/restcache/config.yaml\n\
                 See config.example.yaml for the host, stores and schema format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("restcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("restcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Bearer token for the HTTP adapter, read from RESTCACHE_TOKEN.
  pub fn get_token() -> Option<String> {
    std::env::var("RESTCACHE_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }

  /// Build the schema tree and the store registry this configuration describes.
  pub fn build_tree(&self) -> Result<(Arc<SchemaTree>, Arc<StoreRegistry>)> {
    let registry = Arc::new(StoreRegistry::from_definitions(self.stores.iter().cloned())?);

    let root = if self.host.is_empty() {
      Definition::default()
    } else {
      Definition::default().with_path(self.host.clone())
    };
    let mut builder = SchemaTree::builder(root)?;
    let root = builder.root();

    let mut links = Vec::new();
    add_leafs(&mut builder, &[root], &self.schema, &mut links)?;

    for pending in links {
      let child = builder
        .find(&pending.link.link)
        .ok_or_else(|| eyre!("Schema link target not found: {}", pending.link.link))?;
      let required = pending.link.detached.then_some(pending.node_stack);
      builder.attach(pending.parent, child, required)?;
    }

    Ok((builder.build(), registry))
  }
}

fn add_leafs(
  builder: &mut SchemaTreeBuilder,
  node_stack: &[NodeId],
  leafs: &[LeafConfig],
  links: &mut Vec<PendingLink>,
) -> Result<()> {
  let Some(&parent) = node_stack.last() else {
    return Ok(());
  };
  for leaf in leafs {
    match leaf {
      LeafConfig::Link(link) => links.push(PendingLink {
        parent,
        node_stack: node_stack.to_vec(),
        link: link.clone(),
      }),
      LeafConfig::Node(node) => {
        let id = builder.add(parent, node.kind, &node.name, node.definition())?;
        let mut child_stack = node_stack.to_vec();
        child_stack.push(id);
        add_leafs(builder, &child_stack, &node.leafs, links)?;
      }
    }
  }
  Ok(())
}
