//! Store
//!
//! The `Store` owns the SQLite file and coordinates:
//! - the relational mapper (one writer connection, a pool of readers)
//! - label synchronization
//! - the journal and its watches
//!
//! ## Locking
//!
//! Two locks, always taken in this order:
//!
//! 1. the **write lease**: one write unit at a time. `begin` takes it and the
//!    returned [`Tx`] keeps it until `commit` or `end`. An autocommit
//!    mutation takes it for the one call.
//! 2. the **state lock**: short, guards the writer connection and which
//!    transaction is active. Every write and journal commit runs under it,
//!    and so does watch registration, which is what makes a watch's
//!    snapshot line up with the live stream.
//!
//! Reads (`get`, `list`, `count`) take neither; they run on the read pool and
//! see committed data only.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::new(Config::with_path(path), Registry::new().register::<Host>());
//! store.open(false)?;
//!
//! store.insert(&host)?; // autocommit, watchers notified before return
//!
//! let mut tx = store.begin()?;
//! store.update(&host)?; // joins the open tx
//! store.delete(&other)?;
//! tx.commit()?; // both events delivered now, in order
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::journal::Journal;
use crate::labels;
use crate::lease::{LeaseInfo, LeaseScope, WriteLease};
use crate::model::{Labels, Model, Registry};
use crate::storage::schema::{configure, enable_wal, init_schema};
use crate::storage::{ListOptions, Predicate, ReadPool, Table};
use crate::watch::{Delivery, EventHandler, Watch, WatchOptions, WatchState};

/// Bookkeeping guarded by the state lock
#[derive(Default)]
struct State {
    writer: Option<Connection>,
    /// Lease id of the open explicit transaction
    tx: Option<u64>,
}

struct Inner {
    config: Config,
    /// Registrations as supplied, validated at open
    models: Registry,
    /// Registrations plus the Label table
    schema: Registry,
    state: Mutex<State>,
    readers: RwLock<Option<ReadPool>>,
    lease: WriteLease,
    journal: Journal,
}

/// Transactional model store
///
/// Cheap to clone; clones share the same connections, lease and journal.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create a closed store for the registered model types
    pub fn new(config: Config, models: Registry) -> Self {
        let schema = models.clone().register::<crate::model::Label>();
        Self {
            inner: Arc::new(Inner {
                config,
                models,
                schema,
                state: Mutex::new(State::default()),
                readers: RwLock::new(None),
                lease: WriteLease::new(),
                journal: Journal::new(),
            }),
        }
    }

    /// Connect and build the schema, optionally deleting the file first
    ///
    /// A failure leaves the store closed. Opening an open store is a no-op.
    pub fn open(&self, purge: bool) -> Result<()> {
        self.check_reentry()?;
        let mut state = self.inner.state.lock();
        if state.writer.is_some() {
            debug!(path = ?self.path(), "store already open");
            return Ok(());
        }

        let schema = self.inner.models.prepare()?;
        let path = self.path();
        if purge {
            remove_files(path)?;
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path).map_err(Error::mapping("open", "store"))?;
        configure(&conn, self.inner.config.busy_timeout())?;
        enable_wal(&conn)?;
        init_schema(&mut conn, &schema)?;

        let pool = ReadPool::open(
            path,
            self.inner.config.read_pool_size,
            self.inner.config.busy_timeout(),
        )?;

        *self.inner.readers.write() = Some(pool);
        state.writer = Some(conn);
        info!(path = ?path, models = self.inner.models.len(), purge, "store opened");
        Ok(())
    }

    /// Release the connections and end every watch
    ///
    /// An open transaction is rolled back. Closing a closed store is a no-op.
    pub fn close(&self, purge: bool) -> Result<()> {
        self.check_reentry()?;
        self.inner.journal.end();

        let mut state = self.inner.state.lock();
        let Some(conn) = state.writer.take() else {
            return Ok(());
        };

        if let Some(lease) = state.tx.take() {
            warn!(lease, "closing store with an open transaction; rolling back");
            rollback(&conn, "close");
            self.inner.journal.unstage();
            self.inner.lease.release(lease);
        }

        self.inner.readers.write().take();
        conn.close()
            .map_err(|(_, e)| Error::mapping("close", "store")(e))?;
        drop(state);

        if purge {
            remove_files(self.path())?;
        }
        info!(path = ?self.path(), purge, "store closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().writer.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn path(&self) -> &Path {
        &self.inner.config.db_path
    }

    /// The journal shared by every mutation path
    pub fn journal(&self) -> &Journal {
        &self.inner.journal
    }

    /// Who holds the write lease right now
    pub fn lease_holder(&self) -> Option<LeaseInfo> {
        self.inner.lease.holder()
    }

    /// True while an explicit transaction is open
    pub fn in_transaction(&self) -> bool {
        self.inner.state.lock().tx.is_some()
    }

    // ==================== Reads ====================

    /// Populate `model` from the committed row with its primary key
    pub fn get<T: Model>(&self, model: &mut T) -> Result<()> {
        self.read(|table| table.get(model))
    }

    /// Begin a transaction and read `model` inside it
    ///
    /// The caller must commit or end the returned transaction. On failure
    /// the transaction has already been ended.
    pub fn get_for_update<T: Model>(&self, model: &mut T) -> Result<Tx> {
        let mut tx = self.begin()?;
        if let Err(e) = tx.get(model) {
            if let Err(end) = tx.end() {
                warn!(error = %end, "failed to end transaction after get");
            }
            return Err(e);
        }
        Ok(tx)
    }

    pub fn list<T: Model>(&self, options: &ListOptions) -> Result<Vec<T>> {
        self.read(|table| table.list(options))
    }

    pub fn count<T: Model>(&self, predicate: Option<&Predicate>) -> Result<i64> {
        self.read(|table| table.count::<T>(predicate))
    }

    /// Committed labels of `model`
    pub fn labels<T: Model>(&self, model: &T) -> Result<Labels> {
        let rows = self.read(|table| labels::labels_of::<T>(table, &model.pk()))?;
        Ok(rows.into_iter().map(|l| (l.name, l.value)).collect())
    }

    fn read<R>(&self, f: impl FnOnce(&Table<'_>) -> Result<R>) -> Result<R> {
        let readers = self.inner.readers.read();
        let pool = readers.as_ref().ok_or(Error::Closed)?;
        pool.with(|conn| f(&Table::new(conn, &self.inner.schema)))
    }

    // ==================== Transactions ====================

    /// Open a write unit, waiting for any other one to finish
    pub fn begin(&self) -> Result<Tx> {
        self.check_reentry()?;
        let lease = self
            .inner
            .lease
            .acquire(LeaseScope::Transaction, self.inner.config.lease_timeout())?;

        let mut state = self.inner.state.lock();
        let started = match state.writer.as_ref() {
            Some(conn) => conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(Error::mapping("begin", "transaction")),
            None => Err(Error::Closed),
        };
        if let Err(e) = started {
            drop(state);
            self.inner.lease.release(lease.id);
            return Err(e);
        }
        state.tx = Some(lease.id);
        debug!(lease = lease.id, "transaction started");

        Ok(Tx {
            store: self.clone(),
            lease,
            done: false,
        })
    }

    /// Commit or roll back the transaction holding `lease`
    fn finish(&self, lease: u64, commit: bool) -> Result<()> {
        self.check_reentry()?;
        let mut state = self.inner.state.lock();
        if state.tx != Some(lease) {
            return Err(Error::TransactionInvalid);
        }
        state.tx = None;

        let journal = &self.inner.journal;
        let result = match state.writer.as_ref() {
            None => {
                journal.unstage();
                Err(Error::Closed)
            }
            Some(conn) if commit => match conn.execute_batch("COMMIT") {
                Ok(()) => {
                    let events = journal.commit();
                    debug!(lease, events, "transaction committed");
                    Ok(())
                }
                Err(e) => {
                    rollback(conn, "transaction");
                    journal.unstage();
                    Err(Error::mapping("commit", "transaction")(e))
                }
            },
            Some(conn) => {
                let rolled_back = conn.execute_batch("ROLLBACK");
                let discarded = journal.unstage();
                debug!(lease, discarded, "transaction ended");
                rolled_back.map_err(Error::mapping("rollback", "transaction"))
            }
        };

        drop(state);
        self.inner.lease.release(lease);
        result
    }

    // ==================== Mutations ====================

    /// Insert the model and its labels
    pub fn insert<T: Model>(&self, model: &T) -> Result<()> {
        self.insert_in(None, model)
    }

    /// Update the model and replace its labels
    ///
    /// Fails with `NotFound` before writing anything if the row is absent.
    pub fn update<T: Model>(&self, model: &T) -> Result<()> {
        self.update_in(None, model)
    }

    /// Delete the model and its labels
    pub fn delete<T: Model>(&self, model: &T) -> Result<()> {
        self.delete_in(None, model)
    }

    fn insert_in<T: Model>(&self, lease: Option<u64>, model: &T) -> Result<()> {
        self.mutate::<T, _>(lease, |table, journal| {
            table.insert(model)?;
            labels::insert_labels(table, model)?;
            journal.created(model);
            debug!(kind = T::KIND, pk = %model.pk(), "inserted");
            Ok(())
        })
    }

    fn update_in<T: Model>(&self, lease: Option<u64>, model: &T) -> Result<()> {
        self.mutate::<T, _>(lease, |table, journal| {
            let mut current = journal.copy(model);
            table.get(&mut current)?;
            table.update(model)?;
            labels::replace_labels(table, model)?;
            journal.updated(current, model);
            debug!(kind = T::KIND, pk = %model.pk(), "updated");
            Ok(())
        })
    }

    fn delete_in<T: Model>(&self, lease: Option<u64>, model: &T) -> Result<()> {
        self.mutate::<T, _>(lease, |table, journal| {
            let mut current = journal.copy(model);
            table.get(&mut current)?;
            table.delete(&current)?;
            labels::delete_labels(table, &current)?;
            journal.deleted(&current);
            debug!(kind = T::KIND, pk = %model.pk(), "deleted");
            Ok(())
        })
    }

    /// Run a write either inside the open transaction or as its own unit
    ///
    /// `lease` names the transaction explicitly. Without it the call joins
    /// whatever transaction is open, from any thread, and autocommits only
    /// when none is.
    fn mutate<T: Model, R>(
        &self,
        lease: Option<u64>,
        f: impl FnOnce(&Table<'_>, &Journal) -> Result<R>,
    ) -> Result<R> {
        self.inner.schema.get::<T>()?;
        self.check_reentry()?;

        {
            let state = self.inner.state.lock();
            if let Some(lease) = lease.or(state.tx) {
                if state.tx != Some(lease) {
                    return Err(Error::TransactionInvalid);
                }
                let conn = state.writer.as_ref().ok_or(Error::Closed)?;
                return f(&Table::new(conn, &self.inner.schema), &self.inner.journal);
            }
        }

        let lease = self
            .inner
            .lease
            .acquire(LeaseScope::Autocommit, self.inner.config.lease_timeout())?;
        let result = self.autocommit::<T, R>(f);
        self.inner.lease.release(lease.id);
        result
    }

    /// Refuse calls that would need the state lock from inside an inline
    /// handler, where this thread already holds it
    fn check_reentry(&self) -> Result<()> {
        if self.inner.journal.dispatching_on_current_thread() {
            let lease = self.inner.lease.holder().map(|l| l.id).unwrap_or_default();
            return Err(Error::LeaseHeld { lease });
        }
        Ok(())
    }

    fn autocommit<T: Model, R>(
        &self,
        f: impl FnOnce(&Table<'_>, &Journal) -> Result<R>,
    ) -> Result<R> {
        let state = self.inner.state.lock();
        let conn = state.writer.as_ref().ok_or(Error::Closed)?;
        let journal = &self.inner.journal;

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(Error::mapping("begin", T::KIND))?;

        match f(&Table::new(conn, &self.inner.schema), journal) {
            Ok(value) => match conn.execute_batch("COMMIT") {
                Ok(()) => {
                    journal.commit();
                    Ok(value)
                }
                Err(e) => {
                    rollback(conn, T::KIND);
                    journal.unstage();
                    Err(Error::mapping("commit", T::KIND)(e))
                }
            },
            Err(e) => {
                rollback(conn, T::KIND);
                journal.unstage();
                Err(e)
            }
        }
    }

    // ==================== Watches ====================

    /// Watch model type `T` with inline delivery and a snapshot replay
    pub fn watch<T: Model, H: EventHandler<T>>(&self, handler: H) -> Result<Watch<T>> {
        self.watch_with(handler, WatchOptions::default())
    }

    /// Watch with queued delivery using the configured queue depth
    pub fn watch_queued<T: Model, H: EventHandler<T>>(&self, handler: H) -> Result<Watch<T>> {
        self.watch_with(
            handler,
            WatchOptions {
                delivery: Delivery::Queued {
                    depth: self.inner.config.watch_queue_depth,
                },
                ..WatchOptions::default()
            },
        )
    }

    /// Register a watch, replay the committed rows, then go live
    ///
    /// Registration and replay happen under the state lock, so no commit can
    /// land between the snapshot and the first live event.
    pub fn watch_with<T: Model, H: EventHandler<T>>(
        &self,
        handler: H,
        options: WatchOptions,
    ) -> Result<Watch<T>> {
        self.inner.schema.get::<T>()?;
        self.check_reentry()?;

        let state = self.inner.state.lock();
        if state.writer.is_none() {
            return Err(Error::Closed);
        }

        let dispatch = self.inner.journal.dispatching();
        let watch = self.inner.journal.watch::<T, H>(handler, options.delivery)?;
        let core = watch.core();

        if options.snapshot {
            core.set_state(WatchState::Replaying);
            let snapshot_id = self.inner.journal.last_event_id();
            match self.list::<T>(&ListOptions::default()) {
                Ok(models) => {
                    debug!(watch = watch.id(), kind = T::KIND, rows = models.len(), "snapshot");
                    for model in models {
                        core.replay(snapshot_id, model);
                    }
                }
                Err(e) => {
                    warn!(watch = watch.id(), kind = T::KIND, error = %e, "snapshot failed");
                    core.error(e.to_string());
                    watch.end();
                    return Err(e);
                }
            }
        }

        core.parity();
        core.set_state(WatchState::Live);
        drop(dispatch);
        drop(state);

        Ok(watch)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("journal", &self.inner.journal)
            .finish()
    }
}

/// Roll back the writer's open transaction, logging a failure
fn rollback(conn: &Connection, kind: &str) -> bool {
    match conn.execute_batch("ROLLBACK") {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, kind, "rollback failed");
            false
        }
    }
}

/// Delete the database file and its WAL siblings; missing files are fine
fn remove_files(path: &Path) -> Result<()> {
    let mut paths = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(suffix);
        paths.push(PathBuf::from(sibling));
    }

    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = ?path, "removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Io { path, source }),
        }
    }
    Ok(())
}

/// An open write unit
///
/// Holds the store's write lease until [`Tx::commit`] or [`Tx::end`].
/// Dropping an unfinished transaction rolls it back.
pub struct Tx {
    store: Store,
    lease: LeaseInfo,
    done: bool,
}

impl Tx {
    pub fn id(&self) -> u64 {
        self.lease.id
    }

    pub fn lease(&self) -> LeaseInfo {
        self.lease
    }

    /// Commit staged changes and deliver their events
    ///
    /// Ends the transaction whether or not the commit succeeds.
    pub fn commit(&mut self) -> Result<()> {
        if self.done {
            return Err(Error::TransactionInvalid);
        }
        self.done = true;
        self.store.finish(self.lease.id, true)
    }

    /// Roll back and discard staged events
    pub fn end(&mut self) -> Result<()> {
        if self.done {
            return Err(Error::TransactionInvalid);
        }
        self.done = true;
        self.store.finish(self.lease.id, false)
    }

    /// Read inside the transaction, seeing its own uncommitted writes
    pub fn get<T: Model>(&self, model: &mut T) -> Result<()> {
        self.store.inner.schema.get::<T>()?;
        self.store.check_reentry()?;
        let state = self.store.inner.state.lock();
        if self.done || state.tx != Some(self.lease.id) {
            return Err(Error::TransactionInvalid);
        }
        let conn = state.writer.as_ref().ok_or(Error::Closed)?;
        Table::new(conn, &self.store.inner.schema).get(model)
    }

    pub fn insert<T: Model>(&self, model: &T) -> Result<()> {
        self.store.insert_in(Some(self.lease.id), model)
    }

    pub fn update<T: Model>(&self, model: &T) -> Result<()> {
        self.store.update_in(Some(self.lease.id), model)
    }

    pub fn delete<T: Model>(&self, model: &T) -> Result<()> {
        self.store.delete_in(Some(self.lease.id), model)
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if !self.done {
            self.done = true;
            warn!(lease = self.lease.id, "transaction dropped without commit; rolling back");
            if let Err(e) = self.store.finish(self.lease.id, false) {
                debug!(error = %e, "rollback on drop");
            }
        }
    }
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("lease", &self.lease)
            .field("done", &self.done)
            .finish()
    }
}
