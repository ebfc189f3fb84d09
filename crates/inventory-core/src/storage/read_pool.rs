//! Read connection pool
//!
//! SQLite needs separate connections for concurrent reads. Each pooled
//! connection is read-only and, with the file in WAL mode, only ever sees
//! committed data, never the writer's open transaction.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::storage::schema::configure;

/// Fixed set of read-only connections handed out round-robin
pub struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    /// Open `size` read-only connections to an existing database file
    pub fn open(path: &Path, size: usize, busy_timeout: Duration) -> Result<Self> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);

        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(Error::mapping("open", "reader"))?;
            configure(&conn, busy_timeout)?;
            connections.push(Mutex::new(conn));
        }

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Run `f` on a free connection, waiting on one if all are busy
    pub fn with<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();

        for offset in 0..self.connections.len() {
            let slot = &self.connections[(start + offset) % self.connections.len()];
            if let Some(conn) = slot.try_lock() {
                return f(&conn);
            }
        }

        let conn = self.connections[start].lock();
        f(&conn)
    }
}
