//! Schema tree: nodes describing REST resources and how to navigate them.
//!
//! A tree is built once with [`SchemaTreeBuilder`] and is immutable afterwards.
//! Nodes can be attached at several positions; a link may be restricted to
//! the node stack it was declared under, which keeps cyclic-looking reuse a
//! traversal-time filter instead of a second owning edge.

mod cursor;
mod node;
mod tree;

pub use cursor::Cursor;
pub use node::{Classification, Definition, Leaf, NodeId, SchemaNode, StoreRef, Strategy};
pub use tree::{SchemaTree, SchemaTreeBuilder};
