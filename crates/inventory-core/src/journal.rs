//! Change journal
//!
//! Mutations stage entries here while the write lease is held. Entries
//! reach watches only when the store calls `commit` after the backend
//! commit succeeded; a rollback calls `unstage` and nothing is delivered.
//!
//! Events are numbered from a single sequence, one number per committed
//! entry, whether or not any watch receives it.

use std::any::{Any, TypeId};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::Result;
use crate::model::Model;
use crate::watch::{Action, Delivery, EventHandler, Subscriber, Watch, WatchCore, WatchState};

/// A staged change
pub(crate) struct Entry {
    pub target: TypeId,
    pub kind: &'static str,
    pub action: Action,
    pub model: Arc<dyn Any + Send + Sync>,
    pub prior: Option<Arc<dyn Any + Send + Sync>>,
}

/// Registered watches, shared with each [`Watch`] handle so ending one
/// removes it
pub(crate) type WatchList = Mutex<Vec<Arc<dyn Subscriber>>>;

/// Staging log between the store's write path and its watches
#[derive(Default)]
pub struct Journal {
    staged: Mutex<Vec<Entry>>,
    watches: Arc<WatchList>,
    /// Thread running the current fan-out
    dispatcher: Mutex<Option<ThreadId>>,
    sequence: AtomicU64,
    next_watch: AtomicU64,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn created<T: Model>(&self, model: &T) {
        self.stage(Action::Created, model, None);
    }

    pub(crate) fn updated<T: Model>(&self, prior: T, model: &T) {
        self.stage(Action::Updated, model, Some(Arc::new(prior)));
    }

    pub(crate) fn deleted<T: Model>(&self, model: &T) {
        self.stage(Action::Deleted, model, None);
    }

    fn stage<T: Model>(
        &self,
        action: Action,
        model: &T,
        prior: Option<Arc<dyn Any + Send + Sync>>,
    ) {
        let entry = Entry {
            target: TypeId::of::<T>(),
            kind: T::KIND,
            action,
            model: Arc::new(model.clone()),
            prior,
        };
        self.staged.lock().push(entry);
    }

    /// Detached snapshot of a model, used as the prior half of `Updated`
    pub fn copy<T: Model>(&self, model: &T) -> T {
        model.clone()
    }

    /// Dispatch staged entries in FIFO order, then clear them
    ///
    /// Returns the number of entries committed.
    pub(crate) fn commit(&self) -> usize {
        let entries = mem::take(&mut *self.staged.lock());
        let watches = {
            let mut watches = self.watches.lock();
            watches.retain(|w| w.state() != WatchState::Ended);
            watches.clone()
        };

        let _dispatch = self.dispatching();
        for entry in &entries {
            let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::trace!(event = id, kind = entry.kind, action = ?entry.action, "dispatch");
            for watch in watches.iter().filter(|w| w.target() == entry.target) {
                watch.deliver(id, entry);
            }
        }
        entries.len()
    }

    /// Mark the calling thread as running handlers until the guard drops
    pub(crate) fn dispatching(&self) -> Dispatch<'_> {
        *self.dispatcher.lock() = Some(thread::current().id());
        Dispatch { journal: self }
    }

    /// True inside an inline handler running on this thread
    pub(crate) fn dispatching_on_current_thread(&self) -> bool {
        *self.dispatcher.lock() == Some(thread::current().id())
    }

    /// Discard staged entries without dispatch
    pub(crate) fn unstage(&self) -> usize {
        let staged = mem::take(&mut *self.staged.lock());
        if !staged.is_empty() {
            tracing::debug!(discarded = staged.len(), "journal unstaged");
        }
        staged.len()
    }

    /// Register a watch for model type `T`
    ///
    /// The watch starts in `Created` and receives nothing until it goes
    /// live, either through the store's snapshot replay or [`Watch::start`].
    /// Entries already staged are never delivered to it retroactively.
    pub fn watch<T: Model, H: EventHandler<T>>(
        &self,
        handler: H,
        delivery: Delivery,
    ) -> Result<Watch<T>> {
        let id = self.next_watch.fetch_add(1, Ordering::SeqCst) + 1;
        let core = WatchCore::new(id, handler, delivery)?;
        core.started();

        self.watches
            .lock()
            .push(Arc::clone(&core) as Arc<dyn Subscriber>);
        tracing::debug!(watch = id, kind = T::KIND, ?delivery, "watch registered");

        Ok(Watch::new(core, Arc::downgrade(&self.watches)))
    }

    /// End every watch
    pub fn end(&self) {
        let watches = mem::take(&mut *self.watches.lock());
        for watch in watches {
            watch.end();
        }
    }

    /// Watches that have not ended
    pub fn watch_count(&self) -> usize {
        self.watches
            .lock()
            .iter()
            .filter(|w| w.state() != WatchState::Ended)
            .count()
    }

    pub fn staged_len(&self) -> usize {
        self.staged.lock().len()
    }

    /// Sequence number of the most recently committed entry
    pub fn last_event_id(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

/// Clears the dispatching mark on drop
pub(crate) struct Dispatch<'a> {
    journal: &'a Journal,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        *self.journal.dispatcher.lock() = None;
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("staged", &self.staged_len())
            .field("watches", &self.watch_count())
            .field("last_event_id", &self.last_event_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{Host, Vm};
    use crate::watch::Event;
    use crossbeam_channel::{unbounded, Receiver};
    use std::time::Duration;

    fn live<T: Model>(journal: &Journal) -> (Watch<T>, Receiver<Event<T>>) {
        let (tx, rx) = unbounded();
        let watch = journal.watch::<T, _>(tx, Delivery::Inline).unwrap();
        watch.start();
        (watch, rx)
    }

    #[test]
    fn test_commit_dispatches_in_order() {
        let journal = Journal::new();
        let (_watch, rx) = live::<Host>(&journal);

        let host = Host::new("h1", "a");
        journal.created(&host);
        let mut changed = host.clone();
        changed.cpus = 4;
        journal.updated(journal.copy(&host), &changed);
        journal.deleted(&changed);

        assert!(rx.try_recv().is_err());
        assert_eq!(journal.commit(), 3);

        let events: Vec<_> = rx.try_iter().collect();
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![Action::Created, Action::Updated, Action::Deleted]);
        assert_eq!(events[1].prior.as_ref().unwrap().cpus, 1);
        assert_eq!(events[1].model.cpus, 4);
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(journal.staged_len(), 0);
        assert_eq!(journal.last_event_id(), 3);
    }

    #[test]
    fn test_dispatching_flag() {
        struct Observer {
            journal: Arc<Journal>,
            seen: Arc<Mutex<Vec<bool>>>,
        }

        impl EventHandler<Host> for Observer {
            fn created(&mut self, _event: Event<Host>) {
                self.seen
                    .lock()
                    .push(self.journal.dispatching_on_current_thread());
            }

            fn updated(&mut self, _event: Event<Host>) {}

            fn deleted(&mut self, _event: Event<Host>) {}
        }

        let journal = Arc::new(Journal::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watch = journal
            .watch::<Host, _>(
                Observer {
                    journal: Arc::clone(&journal),
                    seen: Arc::clone(&seen),
                },
                Delivery::Inline,
            )
            .unwrap();
        watch.start();

        journal.created(&Host::new("h1", "a"));
        journal.commit();

        assert_eq!(*seen.lock(), vec![true]);
        assert!(!journal.dispatching_on_current_thread());
        watch.end();
    }

    #[test]
    fn test_unstage_discards() {
        let journal = Journal::new();
        let (_watch, rx) = live::<Host>(&journal);

        journal.created(&Host::new("h1", "a"));
        assert_eq!(journal.unstage(), 1);
        assert_eq!(journal.commit(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_is_type_scoped() {
        let journal = Journal::new();
        let (_hosts, host_rx) = live::<Host>(&journal);
        let (_vms, vm_rx) = live::<Vm>(&journal);

        journal.created(&Vm {
            id: "v1".to_string(),
            host: "h1".to_string(),
        });
        journal.commit();

        assert!(host_rx.try_recv().is_err());
        assert_eq!(vm_rx.try_recv().unwrap().model.id, "v1");
    }

    #[test]
    fn test_unstarted_watch_receives_nothing() {
        let journal = Journal::new();
        let (tx, rx) = unbounded();
        let watch = journal.watch::<Host, _>(tx, Delivery::Inline).unwrap();

        journal.created(&Host::new("h1", "a"));
        journal.commit();
        assert!(rx.try_recv().is_err());

        watch.start();
        journal.created(&Host::new("h2", "b"));
        journal.commit();
        assert_eq!(rx.try_recv().unwrap().model.id, "h2");
    }

    #[test]
    fn test_registration_does_not_leak_staged_entries() {
        let journal = Journal::new();
        journal.created(&Host::new("h1", "a"));

        let (_watch, rx) = live::<Host>(&journal);
        assert!(rx.try_recv().is_err());
        assert_eq!(journal.staged_len(), 1);
    }

    #[test]
    fn test_ended_watch_is_pruned() {
        let journal = Journal::new();
        let (watch, rx) = live::<Host>(&journal);
        assert_eq!(journal.watch_count(), 1);

        watch.end();
        assert_eq!(watch.state(), WatchState::Ended);
        assert_eq!(journal.watch_count(), 0);
        assert!(journal.watches.lock().is_empty());

        journal.created(&Host::new("h1", "a"));
        journal.commit();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_queued_delivery_preserves_order() {
        let journal = Journal::new();
        let (tx, rx) = unbounded();
        let watch = journal
            .watch::<Host, _>(tx, Delivery::Queued { depth: 2 })
            .unwrap();
        watch.start();

        for i in 0..10 {
            journal.created(&Host::new(&format!("h{}", i), "a"));
        }
        journal.commit();

        let ids: Vec<_> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().model.id)
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("h{}", i)).collect();
        assert_eq!(ids, expected);

        watch.end();
        assert_eq!(journal.watch_count(), 0);
    }

    #[test]
    fn test_end_all() {
        let journal = Journal::new();
        let (a, _) = live::<Host>(&journal);
        let (b, _) = live::<Vm>(&journal);

        journal.end();
        assert_eq!(a.state(), WatchState::Ended);
        assert_eq!(b.state(), WatchState::Ended);
        assert_eq!(journal.watch_count(), 0);
    }
}
