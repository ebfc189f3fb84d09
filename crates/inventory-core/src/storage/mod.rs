//! Storage layer
//!
//! The relational mapper and everything it needs from SQLite.
//!
//! ## Architecture
//!
//! - **Table**: typed Get/List/Count/Insert/Update/Delete over one connection
//! - **Schema**: DDL derived from registered model descriptors
//! - **ReadPool**: read-only connections serving committed state
//!
//! The store owns a single writer connection; the pool never writes.

pub mod predicate;
pub mod read_pool;
pub mod schema;
pub mod table;

pub use predicate::{ListOptions, Page, Predicate, Sort};
pub use read_pool::ReadPool;
pub use table::Table;
