//! Collaborator capabilities the cache is fed through.
//!
//! An [`Adapter`] performs the actual I/O for a descriptor; a [`Parser`] turns
//! the returned body into the items handed to the fragment cache.

mod http;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::descriptor::Descriptor;
use crate::error::Result;

pub use http::HttpAdapter;

/// What an adapter returns for a successful call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
  /// Parsed body, `None` for an empty one
  pub data: Option<Value>,
  /// Transport status code (HTTP status for [`HttpAdapter`])
  pub status: u16,
}

/// Performs the I/O described by a descriptor.
pub trait Adapter: Send + Sync {
  fn invoke<'a>(&'a self, descriptor: &'a Descriptor) -> BoxFuture<'a, Result<Response>>;
}

/// Output of a [`Parser`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
  /// Entity type the items belong to, when it differs from the descriptor's
  pub type_name: Option<String>,
  /// Partial the items fill, when it differs from the descriptor's
  pub partial: Option<String>,
  pub items: Option<Value>,
}

pub trait Parser: Send + Sync {
  fn parse(&self, descriptor: &Descriptor, data: Option<Value>) -> Result<Parsed>;
}

/// Passes JSON bodies through, optionally unwrapping an envelope key
/// (e.g. `{"data": [...]}`).
#[derive(Debug, Clone, Default)]
pub struct JsonParser {
  envelope: Option<String>,
}

impl JsonParser {
  pub fn with_envelope(mut self, key: impl Into<String>) -> Self {
    self.envelope = Some(key.into());
    self
  }
}

impl Parser for JsonParser {
  fn parse(&self, _descriptor: &Descriptor, data: Option<Value>) -> Result<Parsed> {
    let items = match (&self.envelope, data) {
      (Some(key), Some(Value::Object(mut map))) if map.contains_key(key) => map.remove(key),
      (_, data) => data,
    };
    Ok(Parsed {
      items,
      ..Default::default()
    })
  }
}
