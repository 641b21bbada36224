use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use restcache::config::Config;
use restcache::{Action, Client, Cursor, HttpAdapter, JsonParser};

#[derive(Parser, Debug)]
#[command(name = "restcache")]
#[command(about = "Resolve and fetch REST resources through a schema-driven cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/restcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every descriptor reachable from a node
  Inspect {
    /// Dotted node path (default: the schema root)
    nav: Option<String>,
    #[arg(short, long, default_value_t = 4)]
    depth: usize,
  },
  /// Print the descriptor a node resolves to
  Resolve {
    nav: String,
    /// Path parameter, as key=value
    #[arg(short, long = "param")]
    params: Vec<String>,
    /// Query parameter, as key=value
    #[arg(short, long)]
    query: Vec<String>,
    #[arg(short, long, default_value = "read", value_parser = parse_action)]
    action: Action,
  },
  /// Read a node through HTTP and print the cached result
  Fetch {
    nav: String,
    #[arg(short, long = "param")]
    params: Vec<String>,
    #[arg(short, long)]
    query: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let (tree, registry) = config.build_tree()?;

  let mut adapter = HttpAdapter::new()?;
  if let Some(token) = Config::get_token() {
    adapter = adapter.with_token(token);
  }
  let mut client = Client::new(tree, registry, Arc::new(adapter));
  if let Some(envelope) = &config.envelope {
    client = client.with_parser(Arc::new(JsonParser::default().with_envelope(envelope)));
  }

  match args.command {
    Command::Inspect { nav, depth } => {
      let cursor = client.cursor().navigate(nav.as_deref().unwrap_or(""))?;
      for d in client.inspect(&cursor, depth)? {
        let state = if d.valid {
          "ok".to_string()
        } else {
          format!("missing {}", d.errors.join(", "))
        };
        println!("{}\t{}\t{}\t{}", d.nav_path, d.classify, d.path, state);
      }
    }
    Command::Resolve {
      nav,
      params,
      query,
      action,
    } => {
      let cursor = build_cursor(&client, &nav, &params, &query)?;
      let descriptor = cursor.resolve_lenient(action, client.registry())?;
      println!("{}", serde_json::to_string_pretty(&descriptor)?);
    }
    Command::Fetch { nav, params, query } => {
      let cursor = build_cursor(&client, &nav, &params, &query)?;
      let result = client.read(&cursor).await?;
      println!("{}", serde_json::to_string_pretty(&result)?);
    }
  }

  Ok(())
}

/// Log to a daily file under the data dir, or to stderr when there is none.
fn init_logging() -> Option<WorkerGuard> {
  let filter = || {
    EnvFilter::try_from_env("RESTCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("restcache=info"))
  };

  let appender = dirs::data_dir().and_then(|dir| {
    RollingFileAppender::builder()
      .rotation(Rotation::DAILY)
      .filename_prefix("restcache")
      .filename_suffix("log")
      .build(dir.join("restcache").join("logs"))
      .ok()
  });

  match appender {
    Some(appender) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}

fn build_cursor(client: &Client, nav: &str, params: &[String], query: &[String]) -> Result<Cursor> {
  let mut cursor = client.cursor().navigate(nav)?;
  if !params.is_empty() {
    cursor = cursor.params(parse_pairs(params)?);
  }
  if !query.is_empty() {
    cursor = cursor.query(parse_pairs(query)?);
  }
  Ok(cursor)
}

/// `key=value` pairs into an object. Repeated keys collect into an array;
/// values that parse as JSON scalars keep their type.
fn parse_pairs(pairs: &[String]) -> Result<Value> {
  let mut map = Map::new();
  for pair in pairs {
    let (key, raw) = pair
      .split_once('=')
      .ok_or_else(|| eyre!("Expected key=value, got '{}'", pair))?;
    let value = match serde_json::from_str::<Value>(raw) {
      Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
      _ => Value::String(raw.to_string()),
    };
    match map.get_mut(key) {
      Some(Value::Array(values)) => values.push(value),
      Some(existing) => *existing = Value::Array(vec![existing.take(), value]),
      None => {
        map.insert(key.to_string(), value);
      }
    }
  }
  Ok(Value::Object(map))
}

fn parse_action(s: &str) -> std::result::Result<Action, String> {
  serde_json::from_value(Value::String(s.to_lowercase()))
    .map_err(|_| format!("unknown action '{}'", s))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_pairs() {
    let pairs = vec![
      "projectId=7".to_string(),
      "tag=a".to_string(),
      "tag=b".to_string(),
      "name=x=y".to_string(),
      "draft=true".to_string(),
    ];
    assert_eq!(
      parse_pairs(&pairs).unwrap(),
      json!({ "projectId": 7, "tag": ["a", "b"], "name": "x=y", "draft": true })
    );
    assert!(parse_pairs(&["novalue".to_string()]).is_err());
  }

  #[test]
  fn test_parse_action() {
    assert_eq!(parse_action("Delete").unwrap(), Action::Delete);
    assert!(parse_action("purge").is_err());
  }

  #[test]
  fn test_args_parse() {
    let args = Args::try_parse_from([
      "restcache",
      "resolve",
      "projects.project",
      "-p",
      "projectId=1",
      "--action",
      "update",
    ])
    .unwrap();
    match args.command {
      Command::Resolve { params, action, .. } => {
        assert_eq!(params, vec!["projectId=1"]);
        assert_eq!(action, Action::Update);
      }
      other => panic!("unexpected command {:?}", other),
    }
  }
}
