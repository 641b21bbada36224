//! In-memory fragment cache for REST resources.
//!
//! This module keeps two indexes per store:
//! - Fragments: entity data keyed by partial name and id
//! - Queries: result sets keyed by canonical base path (id lists, a single id,
//!   or a raw body)
//!
//! Reads fall back through partial chains; writes honor merge/replace
//! strategies; invalidation and destroy keep both indexes consistent.

mod entry;
mod fragment;

pub use entry::{
  FragmentEntry, FragmentResult, Patch, QueryData, QueryEntry, Status, Timestamp, Touched,
};
pub use fragment::{FragmentCache, InvalidateOptions};
