//! Client-side cache for REST resources.
//!
//! A [`SchemaTree`] describes how resources nest. A [`Cursor`] walks that
//! tree and collects params and modifiers, and resolving it yields a
//! [`Descriptor`]: the canonical path, id, store and cache policy of one
//! operation. Stores keep fetched entities as per-partial fragments plus
//! per-path query results, and [`Client`] ties them to an [`Adapter`] doing
//! the actual I/O.

pub mod adapter;
pub mod cache;
pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod path;
pub mod schema;
pub mod store;

pub use adapter::{Adapter, HttpAdapter, JsonParser, Parsed, Parser, Response};
pub use cache::{FragmentResult, InvalidateOptions, Status};
pub use client::Client;
pub use descriptor::{Action, Descriptor};
pub use error::{Error, Result};
pub use schema::{Classification, Cursor, Definition, SchemaTree};
pub use store::{ChangeEvent, Store, StoreDefinition, StoreRegistry};
