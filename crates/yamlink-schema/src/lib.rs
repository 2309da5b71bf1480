//! In-memory key-table schema, cached from schema messages.
//!
//! The kernel transmits keys out-of-band from values: the first messages of
//! a session carry a self-describing key table, later batches carry bare
//! values that are joined against it. This crate holds that cached table as
//! an arena-backed tree, created only during the schema phase and read-only
//! once values start arriving.

pub mod error;
pub mod key;
pub mod tree;

pub use error::{Result, SchemaError};
pub use key::{record, KeyDescriptor, KeyFormat};
pub use tree::{NodeId, SchemaNode, SchemaTree};
