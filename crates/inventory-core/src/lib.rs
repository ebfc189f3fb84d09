//! Inventory Core Library
//!
//! An embedded transactional model store over single-writer SQLite. Typed
//! records ("models") are persisted one table per type, a label index is
//! kept in step with every write, and watches observe each type as a full
//! snapshot followed by a live, ordered event stream.
//!
//! # Architecture
//!
//! - **Store**: façade; owns the writer connection, read pool, write lease
//!   and journal
//! - **Journal**: stages change events until the backend commit succeeds
//! - **Watch**: snapshot-then-tail delivery, inline or through a queue
//! - **Storage**: explicit-registration relational mapper
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::new(Config::load()?, Registry::new().register::<Host>());
//! store.open(false)?;
//!
//! let watch = store.watch::<Host, _>(sender)?;
//! store.insert(&host)?;
//!
//! let mut tx = store.begin()?;
//! store.update(&host)?;
//! tx.commit()?;
//! ```
//!
//! # Modules
//!
//! - `store`: Store and Tx (main entry point)
//! - `model`: the `Model` trait, registry and built-in `Label`
//! - `journal`: event staging and fan-out
//! - `watch`: watch handles, handlers and delivery modes
//! - `lease`: the write lease
//! - `storage`: table mapper, predicates, schema, read pool
//! - `config`: store configuration

pub mod config;
pub mod error;
pub mod journal;
mod labels;
pub mod lease;
pub mod model;
pub mod storage;
pub mod store;
pub mod watch;

pub use config::Config;
pub use error::{Error, Result};
pub use journal::Journal;
pub use lease::{LeaseInfo, LeaseScope};
pub use model::{ColumnType, Field, Label, Labels, Model, Registry};
pub use storage::{ListOptions, Page, Predicate, Sort};
pub use store::{Store, Tx};
pub use watch::{Action, Delivery, Event, EventHandler, Watch, WatchOptions, WatchState};
