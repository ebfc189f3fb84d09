//! Watches
//!
//! A watch delivers one model type's change stream to a handler: first a
//! replay of every existing row as `Created`, then a parity marker, then
//! live events in commit order.
//!
//! ## States
//!
//! ```text
//! Created -> Replaying -> Live -> Ended
//! ```
//!
//! `Ended` is terminal and reachable from every state through [`Watch::end`].
//!
//! ## Delivery
//!
//! - [`Delivery::Inline`]: the handler runs on the committing thread, so an
//!   autocommit mutation's event has been handled by the time the mutation
//!   returns. Writes to the same store from inside the handler fail with
//!   `LeaseHeld`; reads are fine.
//! - [`Delivery::Queued`]: events go through a FIFO channel to a dedicated
//!   thread, where the handler may write to the store. The committing
//!   thread never waits on the queue; a backlog beyond `depth` is logged.

use std::any::TypeId;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::journal::{Entry, WatchList};
use crate::model::Model;

/// What happened to a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

/// One change delivered to a watch
///
/// `id` is the journal sequence number of the commit that produced the
/// event. Replayed snapshot rows all carry the sequence number the snapshot
/// was taken at, so every live event has a strictly greater id.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub id: u64,
    pub action: Action,
    pub model: T,
    /// Value before the change (`Updated` only)
    pub prior: Option<T>,
}

/// Receives a watch's events
pub trait EventHandler<T: Model>: Send + 'static {
    /// The watch was registered
    fn started(&mut self, _watch_id: u64) {}

    /// The snapshot replay is complete
    fn parity(&mut self) {}

    fn created(&mut self, event: Event<T>);

    fn updated(&mut self, event: Event<T>);

    fn deleted(&mut self, event: Event<T>);

    /// The snapshot replay failed; the watch ends next
    fn error(&mut self, _message: &str) {}

    /// The watch ended; no further calls follow
    fn end(&mut self) {}
}

/// Forward every event into a channel
impl<T: Model> EventHandler<T> for Sender<Event<T>> {
    fn created(&mut self, event: Event<T>) {
        let _ = self.send(event);
    }

    fn updated(&mut self, event: Event<T>) {
        let _ = self.send(event);
    }

    fn deleted(&mut self, event: Event<T>) {
        let _ = self.send(event);
    }
}

/// How events reach the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Inline,
    /// `depth` is the backlog above which a warning is logged
    Queued { depth: usize },
}

/// Per-watch options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Replay existing rows before going live
    pub snapshot: bool,
    pub delivery: Delivery,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            snapshot: true,
            delivery: Delivery::Inline,
        }
    }
}

impl WatchOptions {
    pub fn queued(depth: usize) -> Self {
        Self {
            delivery: Delivery::Queued { depth },
            ..Self::default()
        }
    }

    pub fn without_snapshot(mut self) -> Self {
        self.snapshot = false;
        self
    }
}

/// Lifecycle state of a watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WatchState {
    Created = 0,
    Replaying = 1,
    Live = 2,
    Ended = 3,
}

impl WatchState {
    fn from_u8(n: u8) -> Self {
        match n {
            0 => WatchState::Created,
            1 => WatchState::Replaying,
            2 => WatchState::Live,
            _ => WatchState::Ended,
        }
    }
}

/// Type-erased view the journal keeps of each watch
pub(crate) trait Subscriber: Send + Sync {
    fn id(&self) -> u64;
    fn target(&self) -> TypeId;
    fn state(&self) -> WatchState;
    fn deliver(&self, event_id: u64, entry: &Entry);
    fn end(&self);
}

enum Message<T> {
    Started(u64),
    Event(Event<T>),
    Parity,
    Error(String),
    End,
}

enum Sink<T: Model> {
    Inline(Mutex<Box<dyn EventHandler<T>>>),
    Queued {
        sender: Mutex<Option<Sender<Message<T>>>>,
        worker: Mutex<Option<JoinHandle<()>>>,
        depth: usize,
        backlogged: AtomicBool,
    },
}

pub(crate) struct WatchCore<T: Model> {
    id: u64,
    state: AtomicU8,
    end_notified: AtomicBool,
    sink: Sink<T>,
}

impl<T: Model> WatchCore<T> {
    pub(crate) fn new<H: EventHandler<T>>(
        id: u64,
        handler: H,
        delivery: Delivery,
    ) -> Result<Arc<Self>> {
        let sink = match delivery {
            Delivery::Inline => Sink::Inline(Mutex::new(Box::new(handler))),
            Delivery::Queued { depth } => {
                let (tx, rx) = unbounded();
                let worker = thread::Builder::new()
                    .name(format!("watch-{}-{}", T::KIND, id))
                    .spawn(move || run_queue(handler, rx))
                    .map_err(Error::Spawn)?;
                Sink::Queued {
                    sender: Mutex::new(Some(tx)),
                    worker: Mutex::new(Some(worker)),
                    depth: depth.max(1),
                    backlogged: AtomicBool::new(false),
                }
            }
        };

        Ok(Arc::new(Self {
            id,
            state: AtomicU8::new(WatchState::Created as u8),
            end_notified: AtomicBool::new(false),
            sink,
        }))
    }

    pub(crate) fn set_state(&self, state: WatchState) {
        // Ended is terminal.
        let _ = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != WatchState::Ended as u8).then_some(state as u8)
            });
    }

    pub(crate) fn started(&self) {
        self.send(Message::Started(self.id));
    }

    pub(crate) fn replay(&self, event_id: u64, model: T) {
        if self.state() == WatchState::Replaying {
            self.send(Message::Event(Event {
                id: event_id,
                action: Action::Created,
                model,
                prior: None,
            }));
        }
    }

    pub(crate) fn parity(&self) {
        self.send(Message::Parity);
    }

    pub(crate) fn error(&self, message: String) {
        self.send(Message::Error(message));
    }

    fn send(&self, message: Message<T>) {
        match &self.sink {
            Sink::Inline(handler) => {
                let mut handler = handler.lock();
                if self.end_notified.load(Ordering::SeqCst) {
                    return;
                }
                handle(&mut **handler, message);
                if self.state() == WatchState::Ended {
                    self.notify_end(&mut **handler);
                }
            }
            Sink::Queued {
                sender,
                depth,
                backlogged,
                ..
            } => {
                let sender = sender.lock().clone();
                let Some(sender) = sender else {
                    return;
                };
                if sender.send(message).is_err() {
                    tracing::warn!(watch = self.id, kind = T::KIND, "watch queue disconnected");
                    self.end();
                    return;
                }
                let pending = sender.len();
                let over = pending > *depth;
                if over && !backlogged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        watch = self.id,
                        kind = T::KIND,
                        pending,
                        depth = *depth,
                        "watch queue backlog"
                    );
                } else if !over {
                    backlogged.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn notify_end(&self, handler: &mut dyn EventHandler<T>) {
        if !self.end_notified.swap(true, Ordering::SeqCst) {
            handler.end();
        }
    }
}

impl<T: Model> Subscriber for WatchCore<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn target(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn state(&self) -> WatchState {
        WatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn deliver(&self, event_id: u64, entry: &Entry) {
        if self.state() != WatchState::Live {
            return;
        }
        let Some(model) = entry.model.downcast_ref::<T>() else {
            return;
        };
        let prior = entry
            .prior
            .as_ref()
            .and_then(|p| p.downcast_ref::<T>())
            .cloned();

        self.send(Message::Event(Event {
            id: event_id,
            action: entry.action,
            model: model.clone(),
            prior,
        }));
    }

    fn end(&self) {
        let previous = self.state.swap(WatchState::Ended as u8, Ordering::SeqCst);
        if previous == WatchState::Ended as u8 {
            return;
        }
        tracing::debug!(watch = self.id, kind = T::KIND, "watch ended");

        match &self.sink {
            Sink::Inline(handler) => {
                // A delivery in flight on another thread finishes the job.
                if let Some(mut handler) = handler.try_lock() {
                    self.notify_end(&mut **handler);
                }
            }
            Sink::Queued { sender, worker, .. } => {
                if let Some(sender) = sender.lock().take() {
                    let _ = sender.send(Message::End);
                }
                let worker = worker.lock().take();
                if let Some(worker) = worker {
                    if worker.thread().id() != thread::current().id() {
                        let _ = worker.join();
                    }
                }
            }
        }
    }
}

fn handle<T: Model>(handler: &mut dyn EventHandler<T>, message: Message<T>) {
    match message {
        Message::Started(id) => handler.started(id),
        Message::Parity => handler.parity(),
        Message::Error(message) => handler.error(&message),
        Message::End => handler.end(),
        Message::Event(event) => match event.action {
            Action::Created => handler.created(event),
            Action::Updated => handler.updated(event),
            Action::Deleted => handler.deleted(event),
        },
    }
}

fn run_queue<T: Model, H: EventHandler<T>>(mut handler: H, rx: Receiver<Message<T>>) {
    for message in rx.iter() {
        let last = matches!(message, Message::End);
        handle(&mut handler, message);
        if last {
            return;
        }
    }
    handler.end();
}

/// Handle to a registered watch
///
/// Dropping the handle does not end the watch; call [`Watch::end`].
pub struct Watch<T: Model> {
    core: Arc<WatchCore<T>>,
    registry: Weak<WatchList>,
}

impl<T: Model> Watch<T> {
    pub(crate) fn new(core: Arc<WatchCore<T>>, registry: Weak<WatchList>) -> Self {
        Self { core, registry }
    }

    pub(crate) fn core(&self) -> &Arc<WatchCore<T>> {
        &self.core
    }

    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn state(&self) -> WatchState {
        Subscriber::state(self.core.as_ref())
    }

    pub fn is_live(&self) -> bool {
        self.state() == WatchState::Live
    }

    /// Go live without a snapshot
    pub fn start(&self) {
        self.core.set_state(WatchState::Live);
    }

    /// Stop delivery and call the handler's `end`
    ///
    /// With queued delivery this waits for the queue to drain.
    pub fn end(&self) {
        Subscriber::end(self.core.as_ref());
        if let Some(watches) = self.registry.upgrade() {
            watches.lock().retain(|w| w.id() != self.core.id);
        }
    }
}

impl<T: Model> std::fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id())
            .field("kind", &T::KIND)
            .field("state", &self.state())
            .finish()
    }
}
