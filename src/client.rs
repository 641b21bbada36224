//! Client that routes cursor operations through the adapter and the stores.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapter::{Adapter, JsonParser, Parser, Response};
use crate::cache::{FragmentResult, InvalidateOptions, Patch, Touched};
use crate::descriptor::{Action, Descriptor};
use crate::error::{Error, Result};
use crate::schema::{Classification, Cursor, SchemaTree, Strategy};
use crate::store::{Store, StoreRegistry};

/// Deepest level a cascading invalidation or an inspection walks to.
const MAX_DEPTH: usize = 8;

/// Where a response ended up after parsing.
struct Applied {
  store: Arc<Store>,
  descriptor: Descriptor,
  touched: Touched,
}

impl Applied {
  /// True when the parser sent the data to another store or partial.
  fn redirected(&self, store: &Arc<Store>, descriptor: &Descriptor) -> bool {
    !Arc::ptr_eq(&self.store, store) || self.descriptor.partial != descriptor.partial
  }
}

/// Schema-driven client with transparent caching.
///
/// Reads go through the adapter and land in the store the descriptor
/// resolves to; [`Client::cached`] answers from the stores alone.
#[derive(Clone)]
pub struct Client {
  tree: Arc<SchemaTree>,
  registry: Arc<StoreRegistry>,
  adapter: Arc<dyn Adapter>,
  parser: Arc<dyn Parser>,
}

impl Client {
  pub fn new(
    tree: Arc<SchemaTree>,
    registry: Arc<StoreRegistry>,
    adapter: Arc<dyn Adapter>,
  ) -> Self {
    Self {
      tree,
      registry,
      adapter,
      parser: Arc::new(JsonParser::default()),
    }
  }

  pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
    self.parser = parser;
    self
  }

  pub fn tree(&self) -> &Arc<SchemaTree> {
    &self.tree
  }

  pub fn registry(&self) -> &Arc<StoreRegistry> {
    &self.registry
  }

  /// A cursor at the schema root.
  pub fn cursor(&self) -> Cursor {
    Cursor::new(Arc::clone(&self.tree))
  }

  pub fn resolve(&self, cursor: &Cursor, action: Action) -> Result<Descriptor> {
    cursor.resolve(action, &self.registry)
  }

  /// What the stores currently hold for `cursor`, without any I/O.
  pub fn cached(&self, cursor: &Cursor) -> Result<FragmentResult> {
    let descriptor = self.resolve(cursor, Action::Read)?;
    store_for(&descriptor)?.fetch(&descriptor)
  }

  /// Fetch `cursor` through the adapter and return the refreshed cache view.
  ///
  /// The entry is marked loading while the call is in flight. A failed call
  /// resets it to stale before the error is returned. When the parser moves
  /// the data to another store or partial, the view of that target is
  /// returned and the requested entry is reset to stale.
  pub async fn read(&self, cursor: &Cursor) -> Result<FragmentResult> {
    let descriptor = self.resolve(cursor, Action::Read)?;
    let store = store_for(&descriptor)?;
    store.touch(&descriptor, Patch::loading())?;

    let outcome = self
      .adapter()
      .invoke(&descriptor)
      .await
      .and_then(|response| self.apply(&descriptor, &store, response));

    let applied = match outcome {
      Ok(applied) => applied,
      Err(e) => {
        warn!(path = %descriptor.path, error = %e, "read failed");
        store.touch(&descriptor, Patch::stale())?;
        return Err(e);
      }
    };
    if applied.redirected(&store, &descriptor) {
      // the requested key got no data and must not stay loading
      store.touch(&descriptor, Patch::stale())?;
    }
    applied.store.fetch(&applied.descriptor)
  }

  /// Send a create, update or delete and fold the result into the cache.
  pub async fn write(&self, cursor: &Cursor, action: Action) -> Result<Touched> {
    if action.is_read() {
      return Err(Error::InvalidStack(format!(
        "{:?} is not a write action",
        action
      )));
    }
    let mut descriptor = self.resolve(cursor, action)?;
    let store = store_for(&descriptor)?;
    let mut response = self.adapter().invoke(&descriptor).await?;

    match action {
      Action::Delete => store.destroy(&descriptor),
      Action::Create => {
        // new items are appended to the collection they were posted to
        descriptor = descriptor.with_collection_strategy(Strategy::Merge);
        Ok(self.apply(&descriptor, &store, response)?.touched)
      }
      _ => {
        // bodiless answers fall back to what was sent
        if response.data.is_none() && !descriptor.payload.is_empty() {
          response.data = Some(Value::Object(descriptor.payload.clone()));
        }
        Ok(self.apply(&descriptor, &store, response)?.touched)
      }
    }
  }

  /// Invalidate what `cursor` resolves to, or every store when it is `None`.
  ///
  /// With `cascade` set, leafs below the cursor are invalidated as well.
  /// Item leafs are expanded over the ids the parent collection currently
  /// holds. Results are grouped by store type.
  pub fn invalidate(
    &self,
    cursor: Option<&Cursor>,
    options: InvalidateOptions,
  ) -> Result<BTreeMap<String, Touched>> {
    let Some(cursor) = cursor else {
      return self.registry.invalidate_all(options);
    };
    let mut touched = BTreeMap::new();
    self.invalidate_at(cursor, options, 0, &mut touched)?;
    Ok(touched)
  }

  /// Descriptors for `cursor` and every leaf below it, down to `depth` levels.
  pub fn inspect(&self, cursor: &Cursor, depth: usize) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    self.inspect_at(cursor, depth.min(MAX_DEPTH), &mut descriptors)?;
    Ok(descriptors)
  }

  fn adapter(&self) -> &Arc<dyn Adapter> {
    self.tree.adapter().unwrap_or(&self.adapter)
  }

  fn apply(&self, descriptor: &Descriptor, store: &Arc<Store>, response: Response) -> Result<Applied> {
    let parsed = self.parser.parse(descriptor, response.data)?;
    let mut target = descriptor.clone();
    let target_store = match &parsed.type_name {
      Some(type_name) if type_name != store.type_name() => {
        let other = self.registry.get_or_create(type_name)?;
        target.store = Some(Arc::clone(&other));
        target.type_name = Some(type_name.clone());
        other
      }
      _ => Arc::clone(store),
    };
    if let Some(partial) = parsed.partial {
      target = target.with_partial(partial);
    }

    let touched = target_store.update(&target, parsed.items, None)?;
    debug!(
      path = %descriptor.path,
      store = target_store.type_name(),
      partial = %target.partial,
      status = response.status,
      ids = touched.ids.len(),
      "applied response"
    );
    Ok(Applied {
      store: target_store,
      descriptor: target,
      touched,
    })
  }

  fn invalidate_at(
    &self,
    cursor: &Cursor,
    options: InvalidateOptions,
    depth: usize,
    touched: &mut BTreeMap<String, Touched>,
  ) -> Result<()> {
    let descriptor = cursor.resolve_lenient(Action::Read, &self.registry)?;
    if !descriptor.valid {
      return Ok(());
    }
    if let Some(store) = &descriptor.store {
      let result = store.invalidate(Some(&descriptor), options)?;
      touched
        .entry(store.type_name().to_string())
        .or_default()
        .extend(result);
    }
    if !options.cascade || depth >= MAX_DEPTH {
      return Ok(());
    }

    for child in cursor.leafs() {
      if child.classification() != Some(Classification::Item) {
        self.invalidate_at(&child, options, depth + 1, touched)?;
        continue;
      }
      let Some(store) = &descriptor.store else {
        continue;
      };
      let id_param = child
        .resolve_lenient(Action::Read, &self.registry)?
        .id_param;
      for id in store.query_ids(&descriptor.base_path)? {
        let mut params = Map::new();
        params.insert(id_param.clone(), Value::String(id));
        let item = child.clone().params(Value::Object(params));
        self.invalidate_at(&item, options, depth + 1, touched)?;
      }
    }
    Ok(())
  }

  fn inspect_at(&self, cursor: &Cursor, depth: usize, out: &mut Vec<Descriptor>) -> Result<()> {
    out.push(cursor.resolve(Action::Inspect, &self.registry)?);
    if depth == 0 {
      return Ok(());
    }
    let node_stack = cursor.node_stack();
    for child in cursor.leafs() {
      let repeats = child
        .node_stack()
        .last()
        .is_some_and(|id| node_stack.contains(id));
      if !repeats {
        self.inspect_at(&child, depth - 1, out)?;
      }
    }
    Ok(())
  }
}

fn store_for(descriptor: &Descriptor) -> Result<Arc<Store>> {
  descriptor.store.clone().ok_or_else(|| {
    Error::InvalidStack(format!(
      "'{}' does not resolve to a store",
      descriptor.nav_path
    ))
  })
}
