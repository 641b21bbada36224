use futures::future::BoxFuture;
use reqwest::Method;
use tracing::debug;
use url::Url;

use crate::descriptor::{Action, Descriptor};
use crate::error::{Error, Result};

use super::{Adapter, Response};

/// JSON-over-HTTP adapter.
#[derive(Clone)]
pub struct HttpAdapter {
  client: reqwest::Client,
  token: Option<String>,
  allow_invalid: bool,
}

impl HttpAdapter {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(|e| Error::Adapter(format!("Failed to create HTTP client: {}", e)))?;
    Ok(Self {
      client,
      token: None,
      allow_invalid: false,
    })
  }

  /// Send `Authorization: Bearer <token>` with every request.
  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  /// Send requests for descriptors with unresolved parameters anyway.
  pub fn with_allow_invalid(mut self, allow_invalid: bool) -> Self {
    self.allow_invalid = allow_invalid;
    self
  }

  async fn send(&self, descriptor: &Descriptor) -> Result<Response> {
    if !descriptor.valid && !self.allow_invalid {
      return Err(Error::Unresolved {
        path: descriptor.path.clone(),
        missing: descriptor.errors.clone(),
        params: serde_json::to_string(&descriptor.params)?,
      });
    }

    let url = Url::parse(&descriptor.path)
      .map_err(|e| Error::Adapter(format!("Invalid URL {}: {}", descriptor.path, e)))?;
    let method = method_for(descriptor.action);
    debug!(%method, %url, "sending request");

    let mut request = self.client.request(method.clone(), url);
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if matches!(descriptor.action, Action::Create | Action::Update) && !descriptor.payload.is_empty()
    {
      request = request.json(&descriptor.payload);
    }

    let response = request
      .send()
      .await
      .map_err(|e| Error::Adapter(format!("{} {} failed: {}", method, descriptor.path, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(Error::Adapter(format!(
        "{} {} returned {}",
        method, descriptor.path, status
      )));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| Error::Adapter(format!("Failed to read body of {}: {}", descriptor.path, e)))?;
    let data = if body.is_empty() {
      None
    } else {
      Some(serde_json::from_slice(&body)?)
    };

    Ok(Response {
      data,
      status: status.as_u16(),
    })
  }
}

impl Adapter for HttpAdapter {
  fn invoke<'a>(&'a self, descriptor: &'a Descriptor) -> BoxFuture<'a, Result<Response>> {
    Box::pin(self.send(descriptor))
  }
}

fn method_for(action: Action) -> Method {
  match action {
    Action::Read | Action::Inspect => Method::GET,
    Action::Create => Method::POST,
    Action::Update => Method::PATCH,
    Action::Delete => Method::DELETE,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::Classification;

  #[test]
  fn test_method_mapping() {
    assert_eq!(method_for(Action::Read), Method::GET);
    assert_eq!(method_for(Action::Create), Method::POST);
    assert_eq!(method_for(Action::Update), Method::PATCH);
    assert_eq!(method_for(Action::Delete), Method::DELETE);
  }

  #[tokio::test]
  async fn test_invalid_descriptor_is_refused() {
    let adapter = HttpAdapter::new().unwrap();
    let mut d = Descriptor::new(Classification::Item).with_base_path("http://localhost/p/:pId");
    d.valid = false;
    d.errors = vec!["pId".to_string()];
    let err = adapter.invoke(&d).await.unwrap_err();
    assert!(err.is_unresolved());
  }

  #[tokio::test]
  async fn test_relative_path_is_an_adapter_error() {
    let adapter = HttpAdapter::new().unwrap();
    let d = Descriptor::new(Classification::Collection).with_base_path("/projects");
    let err = adapter.invoke(&d).await.unwrap_err();
    assert!(matches!(err, Error::Adapter(_)));
  }
}
