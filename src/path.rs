//! `:param` URI template filling.

use std::collections::BTreeMap;

use serde_json::Value;

/// Result of filling a template. Failure is reported through `errors`, never by panicking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filled {
  pub uri: String,
  /// Params consumed by the template, keyed by the (renamed) param key.
  pub params_used: BTreeMap<String, String>,
  /// Name of the last `:token` seen, resolved or not.
  pub last_param: Option<String>,
  /// Token names that had no value.
  pub errors: Vec<String>,
}

/// Fill every `:name` token in `template` from `params`.
///
/// `rename` maps a token name to the param key it should be read from. Tokens
/// without a value are left in place as `:name` and reported in `errors`.
pub fn fill(
  template: &str,
  params: &BTreeMap<String, Value>,
  rename: &BTreeMap<String, String>,
) -> Filled {
  let mut filled = Filled::default();
  let mut chars = template.char_indices().peekable();

  while let Some((_, c)) = chars.next() {
    if c != ':' {
      filled.uri.push(c);
      continue;
    }

    let mut name = String::new();
    while let Some(&(_, next)) = chars.peek() {
      if next.is_ascii_alphanumeric() || next == '_' {
        name.push(next);
        chars.next();
      } else {
        break;
      }
    }

    // A lone ':' is literal text (e.g. a port separator).
    if name.is_empty() {
      filled.uri.push(':');
      continue;
    }

    let key = rename.get(&name).cloned().unwrap_or_else(|| name.clone());
    match params.get(&key).and_then(param_to_string) {
      Some(value) => {
        filled.uri.push_str(&value);
        filled.params_used.insert(key, value);
      }
      None => {
        filled.uri.push(':');
        filled.uri.push_str(&name);
        filled.errors.push(name.clone());
      }
    }
    filled.last_param = Some(name);
  }

  filled
}

/// Stringify a scalar param value. Null, arrays and objects have no path form.
pub fn param_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn params(value: Value) -> BTreeMap<String, Value> {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_fill_substitutes_tokens() {
    let filled = fill(
      "projects/:projectId/users/:userId",
      &params(json!({ "projectId": 12, "userId": "ab" })),
      &BTreeMap::new(),
    );
    assert_eq!(filled.uri, "projects/12/users/ab");
    assert!(filled.errors.is_empty());
    assert_eq!(filled.last_param.as_deref(), Some("userId"));
    assert_eq!(filled.params_used.get("projectId").map(String::as_str), Some("12"));
  }

  #[test]
  fn test_fill_reports_missing_tokens() {
    let filled = fill(":projectId", &BTreeMap::new(), &BTreeMap::new());
    assert_eq!(filled.uri, ":projectId");
    assert_eq!(filled.errors, vec!["projectId".to_string()]);
    assert_eq!(filled.last_param.as_deref(), Some("projectId"));
  }

  #[test]
  fn test_fill_applies_rename() {
    let rename = BTreeMap::from([("projectId".to_string(), "id".to_string())]);
    let filled = fill(":projectId", &params(json!({ "id": 7 })), &rename);
    assert_eq!(filled.uri, "7");
    assert_eq!(filled.params_used.get("id").map(String::as_str), Some("7"));
  }

  #[test]
  fn test_fill_without_tokens() {
    let filled = fill("projects", &BTreeMap::new(), &BTreeMap::new());
    assert_eq!(filled.uri, "projects");
    assert_eq!(filled.last_param, None);
  }

  #[test]
  fn test_lone_colon_is_literal() {
    let filled = fill("host:/x", &BTreeMap::new(), &BTreeMap::new());
    assert_eq!(filled.uri, "host:/x");
    assert!(filled.errors.is_empty());
  }

  #[test]
  fn test_null_param_is_unresolved() {
    let filled = fill(":id", &params(json!({ "id": null })), &BTreeMap::new());
    assert_eq!(filled.errors, vec!["id".to_string()]);
  }
}
