//! Two-level cache: entity fragments keyed by (partial, id) and query results
//! keyed by canonical base path.
//!
//! Collection queries only store ids; their items are always read back through
//! the fragment index, so the two indexes can never disagree about an entity's
//! data. Mutations return the keys they touched so the owning store can notify
//! subscribers.

use serde_json::Value;
use std::collections::BTreeMap;
use std::iter;

use crate::descriptor::{Descriptor, DEFAULT_PARTIAL};
use crate::error::{Error, Result};
use crate::path::param_to_string;
use crate::schema::{Classification, Strategy};

use super::entry::{
  has_data, is_empty_data, shallow_merge, FragmentEntry, FragmentResult, Patch, QueryData,
  QueryEntry, Status, Timestamp, Touched,
};

/// Options for [`FragmentCache::invalidate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidateOptions {
  /// Drop cached data instead of only marking it stale
  pub clear: bool,
  /// Leave fragments alone
  pub no_fragments: bool,
  /// Leave queries alone
  pub no_queries: bool,
  /// Also invalidate descendants in the schema tree (handled by the client)
  pub cascade: bool,
}

/// `None` slots are tombstones left by `destroy`.
type FragmentMap = BTreeMap<String, BTreeMap<String, Option<FragmentEntry>>>;
type QueryMap = BTreeMap<String, Option<QueryEntry>>;

#[derive(Debug, Clone)]
pub struct FragmentCache {
  id_attribute: String,
  fragments: FragmentMap,
  queries: QueryMap,
}

impl Default for FragmentCache {
  fn default() -> Self {
    Self::new("id")
  }
}

impl FragmentCache {
  /// `id_attribute` names the field entity ids are read from.
  pub fn new(id_attribute: impl Into<String>) -> Self {
    Self {
      id_attribute: id_attribute.into(),
      fragments: BTreeMap::new(),
      queries: BTreeMap::new(),
    }
  }

  pub fn fragment(&self, partial: &str, id: &str) -> Option<&FragmentEntry> {
    self.fragments.get(partial)?.get(id)?.as_ref()
  }

  pub fn query(&self, base_path: &str) -> Option<&QueryEntry> {
    self.queries.get(base_path)?.as_ref()
  }

  /// Raw id list of a collection query, without resolving fragments.
  pub fn query_ids(&self, base_path: &str) -> Vec<String> {
    match self.query(base_path).and_then(|q| q.data.as_ref()) {
      Some(QueryData::Ids(ids)) => ids.clone(),
      Some(QueryData::Id(id)) => vec![id.clone()],
      _ => Vec::new(),
    }
  }

  /// Read what the cache holds for `descriptor`. Never mutates.
  pub fn fetch(&self, descriptor: &Descriptor) -> Result<FragmentResult> {
    if let Some(id) = &descriptor.id {
      return Ok(
        self
          .read_fragment(descriptor, id)
          .unwrap_or_else(|| FragmentResult::empty(Value::Null)),
      );
    }

    let is_collection = descriptor.classify == Classification::Collection;
    let empty = if is_collection {
      Value::Array(Vec::new())
    } else {
      Value::Null
    };

    let Some(entry) = descriptor.base_path().and_then(|bp| self.query(bp)) else {
      return Ok(FragmentResult::empty(empty));
    };

    let data = match (descriptor.classify, &entry.data) {
      (_, None) => empty,
      (Classification::Collection, Some(QueryData::Ids(ids))) => Value::Array(
        ids
          .iter()
          .map(|id| self.require_fragment(descriptor, id).map(|r| r.data))
          .collect::<Result<Vec<_>>>()?,
      ),
      (Classification::Item, Some(QueryData::Id(id))) => self.require_fragment(descriptor, id)?.data,
      (Classification::Collection | Classification::Item, Some(other)) => {
        return Err(Error::Consistency(format!(
          "{} query {} holds {:?} instead of ids",
          descriptor.classify, descriptor.base_path, other
        )))
      }
      (_, Some(QueryData::Raw(raw))) => raw.clone(),
      (_, Some(other)) => {
        return Err(Error::Consistency(format!(
          "{} query {} holds ids {:?} instead of a body",
          descriptor.classify, descriptor.base_path, other
        )))
      }
    };

    Ok(FragmentResult {
      status: Some(entry.status),
      timestamp: entry.timestamp,
      data,
      fragments: Vec::new(),
    })
  }

  /// Merge a status/timestamp patch into the entry for `descriptor`, creating it if needed.
  pub fn touch(&mut self, descriptor: &Descriptor, patch: Patch) -> Touched {
    let mut touched = Touched::default();

    if let Some(id) = &descriptor.id {
      let entry = self
        .fragment_slot(&descriptor.partial, id)
        .get_or_insert_with(|| FragmentEntry {
          status: Status::Stale,
          timestamp: Timestamp::Stale,
          data: None,
        });
      apply_patch(&mut entry.status, &mut entry.timestamp, patch);
      touched.ids.insert(id.clone());
    } else if let Some(base_path) = descriptor.base_path() {
      let entry = self
        .queries
        .entry(base_path.to_string())
        .or_insert(None)
        .get_or_insert_with(|| QueryEntry {
          status: Status::Stale,
          timestamp: Timestamp::Stale,
          data: None,
        });
      apply_patch(&mut entry.status, &mut entry.timestamp, patch);
      touched.queries.insert(base_path.to_string());
    }

    touched
  }

  /// Write `data` for `descriptor`.
  ///
  /// Absent data means the resource is stale, not empty. Fragment writes that
  /// leave the entry unchanged are not reported as touched.
  pub fn update(
    &mut self,
    descriptor: &Descriptor,
    data: Option<Value>,
    status: Option<Status>,
  ) -> Result<Touched> {
    let present = has_data(data.as_ref());
    let status = status.unwrap_or(if present {
      Status::Complete
    } else {
      Status::Stale
    });
    let timestamp = if present {
      Timestamp::now()
    } else {
      Timestamp::Stale
    };

    let mut touched = Touched::default();
    let mut ids: Vec<String> = Vec::new();

    match (descriptor.classify, data.as_ref().filter(|_| present)) {
      (Classification::Collection, Some(value)) => {
        let items: Vec<&Value> = match value {
          Value::Array(items) => items.iter().collect(),
          single => vec![single],
        };
        // every id is resolved before the first write
        let resolved = items
          .into_iter()
          .map(|item| Ok((self.item_id(descriptor, item)?, item)))
          .collect::<Result<Vec<_>>>()?;
        for (id, item) in resolved {
          if self.write_fragment(descriptor, &id, item, status, timestamp) {
            touched.ids.insert(id.clone());
          }
          if !ids.contains(&id) {
            ids.push(id);
          }
        }
      }
      (Classification::Item, Some(value)) => {
        let id = self.item_id(descriptor, value)?;
        if self.write_fragment(descriptor, &id, value, status, timestamp) {
          touched.ids.insert(id.clone());
        }
        ids.push(id);
      }
      (Classification::Item, None) => {
        if let Some(id) = &descriptor.id {
          let slot = self.fragment_slot(&descriptor.partial, id);
          let data = slot.as_ref().and_then(|e| e.data.clone());
          *slot = Some(FragmentEntry {
            status,
            timestamp,
            data,
          });
          touched.ids.insert(id.clone());
          ids.push(id.clone());
        }
      }
      _ => {}
    }

    touched.extend(self.update_query_cache(descriptor, &ids, data.as_ref(), status, timestamp));
    Ok(touched)
  }

  /// Mark entries stale.
  ///
  /// Without a descriptor every fragment and query is affected. With one,
  /// queries match by base path (including query-string variants of it) or by
  /// containing the descriptor's id; fragments of the id go stale across all
  /// partials.
  pub fn invalidate(
    &mut self,
    descriptor: Option<&Descriptor>,
    options: InvalidateOptions,
  ) -> Touched {
    let mut touched = Touched::default();

    let Some(descriptor) = descriptor else {
      if !options.no_fragments {
        for by_id in self.fragments.values_mut() {
          for (id, slot) in by_id.iter_mut() {
            if let Some(entry) = slot {
              mark_stale(&mut entry.status, &mut entry.timestamp, &mut entry.data, options.clear);
              touched.ids.insert(id.clone());
            }
          }
        }
      }
      if !options.no_queries {
        for (key, slot) in self.queries.iter_mut() {
          if let Some(entry) = slot {
            mark_stale(&mut entry.status, &mut entry.timestamp, &mut entry.data, options.clear);
            touched.queries.insert(key.clone());
          }
        }
      }
      return touched;
    };

    if !options.no_queries {
      let base_path = descriptor.base_path();
      for (key, slot) in self.queries.iter_mut() {
        let Some(entry) = slot else {
          continue;
        };
        let by_path = base_path.is_some_and(|bp| key == bp || strip_query(key) == bp);
        let by_id = match (&descriptor.id, &entry.data) {
          (Some(id), Some(QueryData::Ids(ids))) => ids.contains(id),
          _ => false,
        };
        if by_path || by_id {
          mark_stale(&mut entry.status, &mut entry.timestamp, &mut entry.data, options.clear);
          touched.queries.insert(key.clone());
        }
      }
    }

    if !options.no_fragments {
      if let Some(id) = &descriptor.id {
        for by_id in self.fragments.values_mut() {
          if let Some(Some(entry)) = by_id.get_mut(id) {
            mark_stale(&mut entry.status, &mut entry.timestamp, &mut entry.data, options.clear);
            touched.ids.insert(id.clone());
          }
        }
      }
    }

    touched
  }

  /// Tombstone the entity (active partial only) or the query of `descriptor`.
  ///
  /// A destroyed id is removed from every collection query that lists it.
  pub fn destroy(&mut self, descriptor: &Descriptor) -> Touched {
    let mut touched = Touched::default();

    if let Some(id) = &descriptor.id {
      *self.fragment_slot(&descriptor.partial, id) = None;
      touched.ids.insert(id.clone());

      for (key, slot) in self.queries.iter_mut() {
        let remove = match slot {
          Some(QueryEntry {
            data: Some(QueryData::Ids(ids)),
            ..
          }) => {
            let before = ids.len();
            ids.retain(|existing| existing != id);
            if ids.len() != before {
              touched.queries.insert(key.clone());
            }
            false
          }
          Some(QueryEntry {
            data: Some(QueryData::Id(existing)),
            ..
          }) => existing == id,
          _ => false,
        };
        if remove {
          *slot = None;
          touched.queries.insert(key.clone());
        }
      }
    } else if let Some(base_path) = descriptor.base_path() {
      if let Some(slot) = self.queries.get_mut(base_path) {
        if slot.take().is_some() {
          touched.queries.insert(base_path.to_string());
        }
      }
    }

    touched
  }

  fn fragment_slot(&mut self, partial: &str, id: &str) -> &mut Option<FragmentEntry> {
    self
      .fragments
      .entry(partial.to_string())
      .or_default()
      .entry(id.to_string())
      .or_insert(None)
  }

  /// Resolve an id through the active partial, then the fallback chain.
  ///
  /// Returns `None` only when no partial in the chain has an entry at all.
  fn read_fragment(&self, descriptor: &Descriptor, id: &str) -> Option<FragmentResult> {
    let primary = self.fragment(&descriptor.partial, id);
    if let Some(entry) = primary {
      if let Some(data) = entry.data.as_ref().filter(|d| !is_empty_data(Some(*d))) {
        return Some(FragmentResult {
          status: Some(entry.status),
          timestamp: entry.timestamp,
          data: data.clone(),
          fragments: vec![descriptor.partial.clone()],
        });
      }
    }

    let mut merged: Option<Value> = None;
    let mut contributed: Vec<String> = Vec::new();
    let mut timestamp = None;
    let mut fallback_entry = primary;

    let chain = descriptor
      .fragments
      .iter()
      .map(String::as_str)
      .chain(iter::once(DEFAULT_PARTIAL));
    for name in chain {
      if name == descriptor.partial || contributed.iter().any(|c| c == name) {
        continue;
      }
      let Some(entry) = self.fragment(name, id) else {
        continue;
      };
      fallback_entry.get_or_insert(entry);
      let Some(data) = entry.data.as_ref().filter(|d| !is_empty_data(Some(*d))) else {
        continue;
      };
      merged = Some(shallow_merge(merged.as_ref(), data));
      contributed.push(name.to_string());
      timestamp.get_or_insert(entry.timestamp);
    }

    match merged {
      Some(data) => Some(FragmentResult {
        status: Some(Status::Partial),
        timestamp: timestamp.unwrap_or(Timestamp::Stale),
        data,
        fragments: contributed,
      }),
      None => fallback_entry.map(|entry| FragmentResult {
        status: Some(entry.status),
        timestamp: entry.timestamp,
        data: entry.data.clone().unwrap_or(Value::Null),
        fragments: Vec::new(),
      }),
    }
  }

  fn require_fragment(&self, descriptor: &Descriptor, id: &str) -> Result<FragmentResult> {
    self.read_fragment(descriptor, id).ok_or_else(|| {
      Error::Consistency(format!(
        "query {} references id {} but no fragment exists for it",
        descriptor.base_path, id
      ))
    })
  }

  /// The descriptor's own id if it has one, else the item's id attribute.
  fn item_id(&self, descriptor: &Descriptor, item: &Value) -> Result<String> {
    let Value::Object(fields) = item else {
      return Err(Error::Consistency(format!(
        "expected an object for {}, got {}",
        descriptor.base_path, item
      )));
    };
    if let Some(id) = &descriptor.id {
      return Ok(id.clone());
    }
    fields
      .get(&self.id_attribute)
      .and_then(param_to_string)
      .ok_or_else(|| {
        Error::Consistency(format!(
          "item in {} has no '{}' attribute",
          descriptor.base_path, self.id_attribute
        ))
      })
  }

  /// Store one entity under the active partial. Returns false for a no-op write.
  fn write_fragment(
    &mut self,
    descriptor: &Descriptor,
    id: &str,
    item: &Value,
    status: Status,
    timestamp: Timestamp,
  ) -> bool {
    let strategy = descriptor.cache_strategy;
    let slot = self.fragment_slot(&descriptor.partial, id);
    let existing = slot.as_ref().and_then(|e| e.data.as_ref());

    let data = match strategy {
      Strategy::Merge => shallow_merge(existing, item),
      Strategy::Replace if is_empty_data(Some(item)) => {
        existing.cloned().unwrap_or_else(|| item.clone())
      }
      Strategy::Replace => item.clone(),
    };

    let changed = match slot.as_ref() {
      Some(previous) => previous.status != status || previous.data.as_ref() != Some(&data),
      None => true,
    };
    *slot = Some(FragmentEntry {
      status,
      timestamp,
      data: Some(data),
    });
    changed
  }

  fn update_query_cache(
    &mut self,
    descriptor: &Descriptor,
    ids: &[String],
    data: Option<&Value>,
    status: Status,
    timestamp: Timestamp,
  ) -> Touched {
    let mut touched = Touched::default();
    let Some(base_path) = descriptor.base_path().map(str::to_string) else {
      return touched;
    };
    let present = has_data(data);
    let slot = self.queries.entry(base_path.clone()).or_insert(None);

    match descriptor.classify {
      Classification::Collection => {
        let existing = match slot {
          Some(QueryEntry {
            data: Some(QueryData::Ids(ids)),
            ..
          }) => ids.clone(),
          _ => Vec::new(),
        };
        *slot = Some(if present {
          let list = match descriptor.collection_strategy {
            Strategy::Merge => append_unique(existing, ids),
            Strategy::Replace => append_unique(Vec::new(), ids),
          };
          QueryEntry {
            status,
            timestamp,
            data: Some(QueryData::Ids(list)),
          }
        } else {
          // an empty write cannot tell "now empty" from "not returned"
          QueryEntry {
            status: Status::Stale,
            timestamp: Timestamp::Stale,
            data: Some(QueryData::Ids(existing)),
          }
        });
        touched.queries.insert(base_path);
      }
      Classification::Item => {
        let previous = slot.as_ref().and_then(|e| e.data.clone());
        *slot = Some(QueryEntry {
          status,
          timestamp,
          data: ids.first().cloned().map(QueryData::Id).or(previous),
        });
        touched.queries.insert(base_path);

        // collections listing this item show its new data
        if let Some(id) = ids.first().or(descriptor.id.as_ref()) {
          for (key, slot) in &self.queries {
            if let Some(QueryEntry {
              data: Some(QueryData::Ids(list)),
              ..
            }) = slot
            {
              if list.contains(id) {
                touched.queries.insert(key.clone());
              }
            }
          }
        }
      }
      _ => {
        let previous = slot.as_ref().and_then(|e| e.data.clone());
        let next = match data.filter(|_| present) {
          Some(value) => {
            let existing = match &previous {
              Some(QueryData::Raw(raw)) => Some(raw),
              _ => None,
            };
            Some(QueryData::Raw(match descriptor.cache_strategy {
              Strategy::Merge => shallow_merge(existing, value),
              Strategy::Replace => value.clone(),
            }))
          }
          None => previous,
        };
        *slot = Some(QueryEntry {
          status,
          timestamp,
          data: next,
        });
        touched.queries.insert(base_path);
      }
    }

    touched
  }
}

fn apply_patch(status: &mut Status, timestamp: &mut Timestamp, patch: Patch) {
  if let Some(s) = patch.status {
    *status = s;
  }
  if let Some(t) = patch.timestamp {
    *timestamp = t;
  }
}

fn mark_stale<T>(status: &mut Status, timestamp: &mut Timestamp, data: &mut Option<T>, clear: bool) {
  *status = Status::Stale;
  *timestamp = Timestamp::Stale;
  if clear {
    *data = None;
  }
}

fn append_unique(mut list: Vec<String>, ids: &[String]) -> Vec<String> {
  for id in ids {
    if !list.contains(id) {
      list.push(id.clone());
    }
  }
  list
}

fn strip_query(key: &str) -> &str {
  key.split_once('?').map_or(key, |(path, _)| path)
}
