use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cache::{InvalidateOptions, Touched};
use crate::error::{Error, Result};

use super::{Store, StoreDefinition};

/// Flat mapping from entity type name to store.
///
/// There is no global instance: callers pass the registry they want used,
/// and a schema tree may carry its own to override it.
#[derive(Debug, Default)]
pub struct StoreRegistry {
  stores: Mutex<BTreeMap<String, Arc<Store>>>,
}

impl StoreRegistry {
  /// Build a registry from store definitions.
  pub fn from_definitions<I>(definitions: I) -> Result<Self>
  where
    I: IntoIterator<Item = StoreDefinition>,
  {
    let registry = Self::default();
    for definition in definitions {
      registry.add(Store::new(definition))?;
    }
    Ok(registry)
  }

  pub fn get(&self, type_name: &str) -> Option<Arc<Store>> {
    self.lock().ok()?.get(type_name).cloned()
  }

  /// The store for `type_name`, created with default settings if missing.
  pub fn get_or_create(&self, type_name: &str) -> Result<Arc<Store>> {
    let mut stores = self.lock()?;
    let store = stores
      .entry(type_name.to_string())
      .or_insert_with(|| Arc::new(Store::new(StoreDefinition::new(type_name))));
    Ok(Arc::clone(store))
  }

  /// Register a store. Fails if its type is already mapped.
  pub fn add(&self, store: impl Into<Arc<Store>>) -> Result<Arc<Store>> {
    let store = store.into();
    let mut stores = self.lock()?;
    let type_name = store.type_name().to_string();
    if stores.contains_key(&type_name) {
      return Err(Error::DuplicateStore(type_name));
    }
    stores.insert(type_name, Arc::clone(&store));
    Ok(store)
  }

  pub fn types(&self) -> Vec<String> {
    self
      .lock()
      .map(|stores| stores.keys().cloned().collect())
      .unwrap_or_default()
  }

  pub fn stores(&self) -> Vec<Arc<Store>> {
    self
      .lock()
      .map(|stores| stores.values().cloned().collect())
      .unwrap_or_default()
  }

  /// Invalidate every entry of every store.
  pub fn invalidate_all(&self, options: InvalidateOptions) -> Result<BTreeMap<String, Touched>> {
    let mut touched = BTreeMap::new();
    for store in self.stores() {
      touched.insert(store.type_name().to_string(), store.invalidate(None, options)?);
    }
    Ok(touched)
  }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Arc<Store>>>> {
    self
      .stores
      .lock()
      .map_err(|e| Error::LockPoisoned(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Status;
  use crate::descriptor::Descriptor;
  use crate::schema::Classification;
  use serde_json::json;

  #[test]
  fn test_get_or_create_is_stable() {
    let registry = StoreRegistry::default();
    let a = registry.get_or_create("project").unwrap();
    let b = registry.get_or_create("project").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.types(), vec!["project".to_string()]);
  }

  #[test]
  fn test_add_rejects_duplicates() {
    let registry = StoreRegistry::default();
    registry.add(Store::new(StoreDefinition::new("user"))).unwrap();
    let err = registry
      .add(Store::new(StoreDefinition::new("user")))
      .unwrap_err();
    assert!(matches!(err, Error::DuplicateStore(ref t) if t == "user"));
  }

  #[test]
  fn test_from_definitions_keeps_id_attribute() {
    let registry = StoreRegistry::from_definitions([
      StoreDefinition::new("issue").with_id_attribute("key"),
      StoreDefinition::new("board"),
    ])
    .unwrap();
    assert_eq!(
      registry.get("issue").unwrap().definition().id_attribute,
      "key"
    );
    assert!(registry.get("sprint").is_none());
  }

  #[test]
  fn test_invalidate_all() {
    let registry = StoreRegistry::default();
    let store = registry.get_or_create("project").unwrap();
    let d = Descriptor::new(Classification::Collection).with_base_path("/projects");
    store.update(&d, Some(json!([{ "id": 1 }])), None).unwrap();
    registry.get_or_create("user").unwrap();

    let touched = registry.invalidate_all(InvalidateOptions::default()).unwrap();
    assert_eq!(touched["project"].queries.len(), 1);
    assert!(touched["user"].is_empty());
    assert_eq!(store.fetch(&d).unwrap().status, Some(Status::Stale));
  }
}
