//! Folding a stack into a [`Descriptor`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::path::{self, param_to_string};
use crate::schema::{Classification, SchemaNode, SchemaTree, StoreRef, Strategy};
use crate::store::StoreRegistry;

use super::{Action, Descriptor, Params, StackElement, DEFAULT_EVENT, DEFAULT_PARTIAL};

/// Nesting depth kept when params are dumped into an error message.
const PARAMS_DUMP_DEPTH: usize = 3;

/// State that a non-item node resets when it opens a new scope.
#[derive(Debug, Clone)]
struct Scope {
  classify: Classification,
  partial: Option<String>,
  fragments: Vec<String>,
  cache_strategy: Option<Strategy>,
  collection_strategy: Option<Strategy>,
  store: Option<StoreRef>,
  param_id: Option<String>,
}

impl Scope {
  fn new(classify: Classification) -> Self {
    Self {
      classify,
      partial: None,
      fragments: Vec::new(),
      cache_strategy: None,
      collection_strategy: None,
      store: None,
      param_id: None,
    }
  }
}

/// A path segment waiting for the final params.
#[derive(Debug, Clone)]
enum Segment {
  Template {
    template: String,
    rename: BTreeMap<String, String>,
  },
  Literal(String),
}

#[derive(Debug)]
struct Resolution {
  scope: Scope,
  registry: Arc<StoreRegistry>,
  host: String,
  params: Params,
  query: Params,
  payload: Map<String, Value>,
  param_map: BTreeMap<String, String>,
  segments: Vec<Segment>,
  modifiers: Vec<String>,
  collection_len: Option<usize>,
  nav: Vec<String>,
}

impl Resolution {
  fn apply_node(&mut self, tree: &SchemaTree, node: &SchemaNode) {
    let def = &node.definition;

    if node.classification == Classification::Schema {
      if let Some(registry) = tree.registry() {
        self.registry = Arc::clone(registry);
      }
      if let Some(host) = &def.path {
        self.host = host.trim_end_matches('/').to_string();
      }
    }

    // An item refines the collection it sits under; everything else opens a new scope.
    if node.classification == Classification::Item {
      self.scope.classify = Classification::Item;
    } else {
      self.scope = Scope::new(node.classification);
    }

    if let Some(identifier) = &node.identifier {
      self.nav.push(identifier.clone());
    }

    self
      .param_map
      .extend(def.param_map.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(partial) = &def.partial {
      self.scope.partial = Some(partial.clone());
    }
    self.scope.fragments.extend(def.fragments.iter().cloned());
    if let Some(strategy) = def.cache_strategy {
      self.scope.cache_strategy = Some(strategy);
    }
    if let Some(strategy) = def.collection_strategy {
      self.scope.collection_strategy = Some(strategy);
    }
    if let Some(store) = &def.store {
      self.scope.store = Some(store.clone());
    }
    if let Some(param_id) = node.param_id() {
      self.scope.param_id = Some(param_id);
    }

    if node.classification != Classification::Schema {
      if let Some(template) = node.template() {
        self.segments.push(Segment::Template {
          template,
          rename: self.param_map.clone(),
        });
      }
    }

    if node.classification == Classification::Collection {
      self.collection_len = Some(self.segments.len());
    }
  }
}

/// Fold `stack` into a descriptor.
///
/// `registry` is used for named stores unless a schema node in the stack
/// carries its own. Unresolved parameters make the descriptor invalid; that
/// is an error unless `allow_invalid` is set or the action is `inspect`.
pub fn resolve(
  tree: &SchemaTree,
  registry: &Arc<StoreRegistry>,
  action: Action,
  stack: &[StackElement],
  allow_invalid: bool,
) -> Result<Descriptor> {
  let mut state = Resolution {
    scope: Scope::new(Classification::Schema),
    registry: Arc::clone(registry),
    host: String::new(),
    params: Params::new(),
    query: Params::new(),
    payload: Map::new(),
    param_map: BTreeMap::new(),
    segments: Vec::new(),
    modifiers: Vec::new(),
    collection_len: None,
    nav: Vec::new(),
  };

  for element in stack {
    match element {
      StackElement::Node(id) => {
        let node = tree.node(*id).ok_or_else(|| {
          Error::InvalidStack(format!("node {:?} is not part of this schema", id))
        })?;
        state.apply_node(tree, node);
      }
      StackElement::Params(value) => merge_object(&mut state.params, value, "params")?,
      StackElement::Query(value) => merge_object(&mut state.query, value, "query params")?,
      StackElement::Segment(segment) => state.segments.push(Segment::Literal(segment.clone())),
      StackElement::Modifier(segment) => state.modifiers.push(segment.clone()),
      StackElement::Payload(value) => {
        let Value::Object(map) = value else {
          return Err(Error::InvalidStack(format!(
            "payload must be an object, got {}",
            value
          )));
        };
        state
          .payload
          .extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
      }
    }
  }

  let store = match &state.scope.store {
    Some(StoreRef::Named(name)) => Some(state.registry.get_or_create(name)?),
    Some(StoreRef::Direct(store)) => Some(Arc::clone(store)),
    None => None,
  };
  let type_name = store.as_ref().map(|s| s.type_name().to_string());

  let mut rendered = Vec::with_capacity(state.segments.len());
  let mut path_params = BTreeMap::new();
  let mut errors = Vec::new();
  let mut last_param = None;
  for segment in &state.segments {
    match segment {
      Segment::Template { template, rename } => {
        let filled = path::fill(template, &state.params, rename);
        rendered.push(filled.uri);
        path_params.extend(filled.params_used);
        errors.extend(filled.errors);
        if filled.last_param.is_some() {
          last_param = filled.last_param;
        }
      }
      Segment::Literal(literal) => rendered.push(literal.clone()),
    }
  }

  let query_string = if action.is_read() {
    encode_query(&state.query)
  } else {
    String::new()
  };
  let base = join_path(&state.host, &rendered);
  let base_path = format!("{}{}", base, query_string);
  let path = if state.modifiers.is_empty() {
    base_path.clone()
  } else {
    let mut full = rendered.clone();
    full.extend(state.modifiers.iter().cloned());
    format!("{}{}", join_path(&state.host, &full), query_string)
  };
  let collection_path = state.collection_len.map(|len| {
    let collection: Vec<String> = rendered.iter().take(len).cloned().collect();
    join_path(&state.host, &collection)
  });

  let id_name = state
    .scope
    .param_id
    .clone()
    .or(last_param)
    .unwrap_or_else(|| "id".to_string());
  let id_param = state.param_map.get(&id_name).cloned().unwrap_or(id_name);
  let id = if state.scope.classify == Classification::Item {
    state.params.get(&id_param).and_then(param_to_string)
  } else {
    None
  };

  let event = match &id {
    Some(id) => id.clone(),
    None if !base_path.is_empty() => base_path.clone(),
    None => DEFAULT_EVENT.to_string(),
  };

  let mut fragments = state.scope.fragments;
  fragments.reverse();

  let valid = errors.is_empty();
  if !valid && !allow_invalid && action != Action::Inspect {
    return Err(Error::Unresolved {
      path,
      missing: errors,
      params: dump_params(&state.params),
    });
  }

  let descriptor = Descriptor {
    action,
    classify: state.scope.classify,
    store,
    type_name,
    id,
    id_param,
    host: state.host,
    base_path,
    path,
    collection_path,
    params: state.params,
    query_params: state.query,
    path_params,
    payload: state.payload,
    partial: state
      .scope
      .partial
      .unwrap_or_else(|| DEFAULT_PARTIAL.to_string()),
    fragments,
    cache_strategy: state.scope.cache_strategy.unwrap_or_default(),
    collection_strategy: state.scope.collection_strategy.unwrap_or_default(),
    nav_path: state.nav.join("."),
    event,
    valid,
    errors,
  };

  trace!(
    path = %descriptor.path,
    classify = %descriptor.classify,
    valid = descriptor.valid,
    "resolved descriptor"
  );

  Ok(descriptor)
}

fn merge_object(target: &mut Params, value: &Value, what: &str) -> Result<()> {
  let Value::Object(map) = value else {
    return Err(Error::InvalidStack(format!(
      "{} must be an object, got {}",
      what, value
    )));
  };
  target.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
  Ok(())
}

fn join_path(host: &str, segments: &[String]) -> String {
  let joined = segments
    .iter()
    .map(|s| s.trim_matches('/'))
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join("/");
  format!("{}/{}", host, joined)
}

/// Canonical query string: sorted keys, arrays as repeated `key[]=value`.
fn encode_query(query: &Params) -> String {
  fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
  }

  let mut pairs = Vec::new();
  for (key, value) in query {
    match value {
      Value::Array(values) => {
        for v in values.iter().filter_map(param_to_string) {
          pairs.push(format!("{}[]={}", encode(key), encode(&v)));
        }
      }
      other => {
        if let Some(v) = param_to_string(other) {
          pairs.push(format!("{}={}", encode(key), encode(&v)));
        }
      }
    }
  }

  if pairs.is_empty() {
    String::new()
  } else {
    format!("?{}", pairs.join("&"))
  }
}

/// Serialize params for diagnostics, cutting nesting below a fixed depth.
fn dump_params(params: &Params) -> String {
  fn limit(value: &Value, depth: usize) -> Value {
    match value {
      Value::Object(_) | Value::Array(_) if depth == 0 => Value::String("[...]".to_string()),
      Value::Object(map) => Value::Object(
        map
          .iter()
          .map(|(k, v)| (k.clone(), limit(v, depth - 1)))
          .collect(),
      ),
      Value::Array(values) => Value::Array(values.iter().map(|v| limit(v, depth - 1)).collect()),
      other => other.clone(),
    }
  }

  let value = Value::Object(
    params
      .iter()
      .map(|(k, v)| (k.clone(), limit(v, PARAMS_DUMP_DEPTH)))
      .collect(),
  );
  value.to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::{Cursor, Definition, SchemaTree};
  use crate::store::{Store, StoreDefinition};
  use serde_json::json;

  fn registry() -> Arc<StoreRegistry> {
    Arc::new(StoreRegistry::default())
  }

  fn projects_tree() -> Arc<SchemaTree> {
    let mut builder = SchemaTree::builder(Definition::default()).unwrap();
    let root = builder.root();
    let projects = builder
      .add(
        root,
        Classification::Collection,
        "projects",
        Definition::default().with_store("project"),
      )
      .unwrap();
    let project = builder
      .add(projects, Classification::Item, "project", Definition::default())
      .unwrap();
    builder
      .add(
        project,
        Classification::Collection,
        "users",
        Definition::default().with_store("user"),
      )
      .unwrap();
    builder.build()
  }

  #[test]
  fn test_item_path_round_trip() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects.project")
      .unwrap()
      .params(json!({ "projectId": 123 }))
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.base_path, "/projects/123");
    assert_eq!(d.path, "/projects/123");
    assert_eq!(d.collection_path.as_deref(), Some("/projects"));
    assert_eq!(d.id.as_deref(), Some("123"));
    assert_eq!(d.id_param, "projectId");
    assert_eq!(d.event, "123");
    assert_eq!(d.classify, Classification::Item);
    assert_eq!(d.type_name.as_deref(), Some("project"));
    assert_eq!(d.nav_path, "projects.project");
    assert_eq!(d.path_params.get("projectId").map(String::as_str), Some("123"));
    assert!(d.valid);
  }

  #[test]
  fn test_missing_item_param_is_invalid() {
    let registry = registry();
    let cursor = Cursor::new(projects_tree()).navigate("projects.project").unwrap();

    let d = cursor.resolve_lenient(Action::Read, &registry).unwrap();
    assert!(!d.valid);
    assert_eq!(d.errors, vec!["projectId".to_string()]);
    assert_eq!(d.id, None);

    let err = cursor.resolve(Action::Read, &registry).unwrap_err();
    match err {
      Error::Unresolved { path, missing, .. } => {
        assert_eq!(path, "/projects/:projectId");
        assert_eq!(missing, vec!["projectId".to_string()]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn test_inspect_tolerates_invalid() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects.project")
      .unwrap()
      .resolve(Action::Inspect, &registry)
      .unwrap();
    assert!(!d.valid);
  }

  #[test]
  fn test_collection_has_no_id() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects")
      .unwrap()
      .params(json!({ "id": 5 }))
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.id, None);
    assert_eq!(d.event, "/projects");
  }

  #[test]
  fn test_nested_collection_resets_store() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects.project.users")
      .unwrap()
      .params(json!({ "projectId": 1 }))
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.base_path, "/projects/1/users");
    assert_eq!(d.collection_path.as_deref(), Some("/projects/1/users"));
    assert_eq!(d.type_name.as_deref(), Some("user"));
    assert_eq!(d.id, None);
    assert!(registry.get("user").is_some());
  }

  #[test]
  fn test_query_string_for_read_only() {
    let registry = registry();
    let cursor = Cursor::new(projects_tree())
      .navigate("projects")
      .unwrap()
      .query(json!({ "tags": ["a", "b c"], "page": 2 }));

    let read = cursor.resolve(Action::Read, &registry).unwrap();
    assert_eq!(read.base_path, "/projects?page=2&tags[]=a&tags[]=b+c");
    assert_eq!(read.path, read.base_path);
    assert_eq!(read.collection_path.as_deref(), Some("/projects"));

    let create = cursor.resolve(Action::Create, &registry).unwrap();
    assert_eq!(create.base_path, "/projects");
  }

  #[test]
  fn test_modifier_only_in_path() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects.project")
      .unwrap()
      .params(json!({ "projectId": 4 }))
      .modifier("archive")
      .resolve(Action::Update, &registry)
      .unwrap();
    assert_eq!(d.base_path, "/projects/4");
    assert_eq!(d.path, "/projects/4/archive");
  }

  #[test]
  fn test_literal_segment_joins_base_path() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects")
      .unwrap()
      .segment("archived")
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.base_path, "/projects/archived");
  }

  #[test]
  fn test_host_prefix_and_param_map() {
    let mut builder =
      SchemaTree::builder(Definition::default().with_path("https://api.example.com/")).unwrap();
    let root = builder.root();
    let things = builder
      .add(root, Classification::Collection, "things", Definition::default())
      .unwrap();
    builder
      .add(
        things,
        Classification::Item,
        "thing",
        Definition::default()
          .with_path(":slug")
          .with_param_id("slug")
          .with_param_map("slug", "name"),
      )
      .unwrap();
    let registry = registry();
    let d = Cursor::new(builder.build())
      .navigate("things.thing")
      .unwrap()
      .params(json!({ "name": "widget" }))
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.base_path, "https://api.example.com/things/widget");
    assert_eq!(d.id.as_deref(), Some("widget"));
    assert_eq!(d.id_param, "name");
  }

  #[test]
  fn test_fragments_reversed_and_partial_scoped() {
    let mut builder = SchemaTree::builder(Definition::default()).unwrap();
    let root = builder.root();
    let api = builder
      .add(
        root,
        Classification::Namespace,
        "api",
        Definition::default().with_fragments(["outer"]).with_partial("ns"),
      )
      .unwrap();
    let posts = builder
      .add(
        api,
        Classification::Collection,
        "posts",
        Definition::default()
          .with_fragments(["listing"])
          .with_cache_strategy(Strategy::Replace),
      )
      .unwrap();
    builder
      .add(
        posts,
        Classification::Item,
        "post",
        Definition::default()
          .with_partial("minimal")
          .with_fragments(["summary", "card"]),
      )
      .unwrap();
    let registry = registry();
    let d = Cursor::new(builder.build())
      .navigate("api.posts.post")
      .unwrap()
      .params(json!({ "postId": 1 }))
      .resolve(Action::Read, &registry)
      .unwrap();
    // the namespace scope was reset by the collection; item fragments come first
    assert_eq!(d.fragments, vec!["card", "summary", "listing"]);
    assert_eq!(d.partial, "minimal");
    assert_eq!(d.cache_strategy, Strategy::Replace);
    assert_eq!(d.base_path, "/api/posts/1");
  }

  #[test]
  fn test_last_store_wins_and_direct_reference() {
    let direct = Arc::new(Store::new(StoreDefinition::new("direct")));
    let mut builder = SchemaTree::builder(Definition::default()).unwrap();
    let root = builder.root();
    let posts = builder
      .add(
        root,
        Classification::Collection,
        "posts",
        Definition::default().with_store("post"),
      )
      .unwrap();
    builder
      .add(
        posts,
        Classification::Item,
        "post",
        Definition::default().with_store(Arc::clone(&direct)),
      )
      .unwrap();
    let registry = registry();
    let d = Cursor::new(builder.build())
      .navigate("posts.post")
      .unwrap()
      .params(json!({ "postId": "x" }))
      .resolve(Action::Read, &registry)
      .unwrap();
    assert_eq!(d.type_name.as_deref(), Some("direct"));
    assert!(Arc::ptr_eq(d.store.as_ref().unwrap(), &direct));
  }

  #[test]
  fn test_tree_registry_overrides_default() {
    let scoped = Arc::new(StoreRegistry::default());
    let mut builder = SchemaTree::builder(Definition::default())
      .unwrap()
      .with_registry(Arc::clone(&scoped));
    let root = builder.root();
    builder
      .add(
        root,
        Classification::Collection,
        "posts",
        Definition::default().with_store("post"),
      )
      .unwrap();
    let default = registry();
    Cursor::new(builder.build())
      .navigate("posts")
      .unwrap()
      .resolve(Action::Read, &default)
      .unwrap();
    assert!(scoped.get("post").is_some());
    assert!(default.get("post").is_none());
  }

  #[test]
  fn test_non_object_params_fail() {
    let registry = registry();
    let err = Cursor::new(projects_tree())
      .params(json!(5))
      .resolve(Action::Read, &registry)
      .unwrap_err();
    assert!(matches!(err, Error::InvalidStack(_)));
  }

  #[test]
  fn test_payload_is_merged() {
    let registry = registry();
    let d = Cursor::new(projects_tree())
      .navigate("projects")
      .unwrap()
      .payload(json!({ "title": "A" }))
      .payload(json!({ "body": "B" }))
      .resolve(Action::Create, &registry)
      .unwrap();
    assert_eq!(Value::Object(d.payload), json!({ "title": "A", "body": "B" }));
    assert!(d.params.is_empty());
  }

  #[test]
  fn test_dump_params_limits_depth() {
    let params: Params =
      serde_json::from_value(json!({ "a": { "b": { "c": { "d": { "e": 1 } } } } })).unwrap();
    assert_eq!(dump_params(&params), r#"{"a":{"b":{"c":{"d":"[...]"}}}}"#);
  }
}
