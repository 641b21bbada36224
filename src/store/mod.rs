//! Stores pair a fragment cache with change notification.
//!
//! Every mutating call locks the store's cache, applies the change and then
//! emits one [`ChangeEvent`] per touched fragment id and per touched query.

mod emitter;
mod registry;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::{FragmentCache, FragmentResult, InvalidateOptions, Patch, Status, Touched};
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

pub use emitter::Emitter;
pub use registry::StoreRegistry;

fn default_id_attribute() -> String {
  "id".to_string()
}

/// Static description of a store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreDefinition {
  /// Entity type name, also the registry key
  #[serde(rename = "type")]
  pub type_name: String,
  /// Field entity ids are read from
  #[serde(default = "default_id_attribute")]
  pub id_attribute: String,
}

impl StoreDefinition {
  pub fn new(type_name: impl Into<String>) -> Self {
    Self {
      type_name: type_name.into(),
      id_attribute: default_id_attribute(),
    }
  }

  pub fn with_id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
    self.id_attribute = id_attribute.into();
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutation {
  Touch,
  Update,
  Invalidate,
  Destroy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKey {
  Fragment(String),
  Query(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
  pub kind: Mutation,
  pub key: ChangeKey,
  #[serde(rename = "type")]
  pub type_name: String,
}

#[derive(Debug)]
pub struct Store {
  definition: StoreDefinition,
  cache: Mutex<FragmentCache>,
  events: Emitter<ChangeEvent>,
}

impl Store {
  pub fn new(definition: StoreDefinition) -> Self {
    let cache = FragmentCache::new(definition.id_attribute.clone());
    Self {
      definition,
      cache: Mutex::new(cache),
      events: Emitter::default(),
    }
  }

  pub fn definition(&self) -> &StoreDefinition {
    &self.definition
  }

  pub fn type_name(&self) -> &str {
    &self.definition.type_name
  }

  /// Receive change events for this store.
  pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
    self.events.subscribe()
  }

  pub fn fetch(&self, descriptor: &Descriptor) -> Result<FragmentResult> {
    self.lock()?.fetch(descriptor)
  }

  pub fn query_ids(&self, base_path: &str) -> Result<Vec<String>> {
    Ok(self.lock()?.query_ids(base_path))
  }

  pub fn touch(&self, descriptor: &Descriptor, patch: Patch) -> Result<Touched> {
    let touched = self.lock()?.touch(descriptor, patch);
    self.notify(Mutation::Touch, descriptor, &touched)?;
    Ok(touched)
  }

  pub fn update(
    &self,
    descriptor: &Descriptor,
    data: Option<Value>,
    status: Option<Status>,
  ) -> Result<Touched> {
    let touched = self.lock()?.update(descriptor, data, status)?;
    self.notify(Mutation::Update, descriptor, &touched)?;
    Ok(touched)
  }

  /// Invalidate entries matching `descriptor`, or everything when it is `None`.
  pub fn invalidate(
    &self,
    descriptor: Option<&Descriptor>,
    options: InvalidateOptions,
  ) -> Result<Touched> {
    let touched = self.lock()?.invalidate(descriptor, options);
    let type_name = descriptor
      .and_then(|d| d.type_name.clone())
      .unwrap_or_else(|| self.type_name().to_string());
    self.emit(Mutation::Invalidate, &type_name, &touched)?;
    debug!(
      store = self.type_name(),
      key = descriptor.map(|d| d.base_path.as_str()).unwrap_or("*"),
      ids = touched.ids.len(),
      queries = touched.queries.len(),
      "invalidate"
    );
    Ok(touched)
  }

  pub fn destroy(&self, descriptor: &Descriptor) -> Result<Touched> {
    let touched = self.lock()?.destroy(descriptor);
    self.notify(Mutation::Destroy, descriptor, &touched)?;
    Ok(touched)
  }

  fn lock(&self) -> Result<MutexGuard<'_, FragmentCache>> {
    self
      .cache
      .lock()
      .map_err(|e| Error::LockPoisoned(e.to_string()))
  }

  fn notify(&self, kind: Mutation, descriptor: &Descriptor, touched: &Touched) -> Result<()> {
    let type_name = descriptor
      .type_name
      .clone()
      .unwrap_or_else(|| self.type_name().to_string());
    self.emit(kind, &type_name, touched)?;
    debug!(
      store = self.type_name(),
      key = %descriptor.base_path,
      ?kind,
      ids = touched.ids.len(),
      queries = touched.queries.len(),
      "cache mutation"
    );
    Ok(())
  }

  fn emit(&self, kind: Mutation, type_name: &str, touched: &Touched) -> Result<()> {
    let keys = touched
      .ids
      .iter()
      .cloned()
      .map(ChangeKey::Fragment)
      .chain(touched.queries.iter().cloned().map(ChangeKey::Query));
    for key in keys {
      self.events.emit(ChangeEvent {
        kind,
        key,
        type_name: type_name.to_string(),
      })?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::Classification;
  use serde_json::json;

  fn drain(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
      events.push(event);
    }
    events
  }

  #[test]
  fn test_update_emits_per_key() {
    let store = Store::new(StoreDefinition::new("project"));
    let mut rx = store.subscribe().unwrap();
    let d = Descriptor::new(Classification::Collection).with_base_path("/projects");

    store
      .update(&d, Some(json!([{ "id": 1 }, { "id": 2 }])), None)
      .unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.kind == Mutation::Update));
    assert!(events.iter().all(|e| e.type_name == "project"));
    assert!(events.contains(&ChangeEvent {
      kind: Mutation::Update,
      key: ChangeKey::Query("/projects".to_string()),
      type_name: "project".to_string(),
    }));

    // identical data: only the query is reported
    store
      .update(&d, Some(json!([{ "id": 1 }, { "id": 2 }])), None)
      .unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, ChangeKey::Query("/projects".to_string()));
  }

  #[test]
  fn test_destroy_and_invalidate_events() {
    let store = Store::new(StoreDefinition::new("project"));
    let collection = Descriptor::new(Classification::Collection).with_base_path("/projects");
    store
      .update(&collection, Some(json!([{ "id": 1 }])), None)
      .unwrap();

    let mut rx = store.subscribe().unwrap();
    store.invalidate(None, InvalidateOptions::default()).unwrap();
    let events = drain(&mut rx);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.kind == Mutation::Invalidate));

    let item = Descriptor::new(Classification::Item)
      .with_base_path("/projects/1")
      .with_id("1");
    store.destroy(&item).unwrap();
    let events = drain(&mut rx);
    assert!(events.contains(&ChangeEvent {
      kind: Mutation::Destroy,
      key: ChangeKey::Fragment("1".to_string()),
      type_name: "project".to_string(),
    }));
    assert!(store.query_ids("/projects").unwrap().is_empty());
  }

  #[test]
  fn test_definition_from_yaml() {
    let def: StoreDefinition = serde_yaml::from_str("type: issue\nid_attribute: key").unwrap();
    assert_eq!(def, StoreDefinition::new("issue").with_id_attribute("key"));
    let def: StoreDefinition = serde_yaml::from_str("type: board").unwrap();
    assert_eq!(def.id_attribute, "id");
  }
}
