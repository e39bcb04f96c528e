//! In-process model of the OS hotkey facility
//!
//! Used on platforms without a native backend and by the tests. It keeps
//! the contract of the real thing: a combination can be bound only once
//! across every sink of the same [`SimulatedSystem`], sinks are bound to
//! the thread that created them, and presses arrive as queued messages
//! carrying the packed key/modifier parameter.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;
use tracing::{debug, trace};

use super::{Backend, MessageHandler, Sink, SinkMessage, SinkOps, Waker};
use crate::events::HotkeyEvent;
use crate::hotkey::error::HotkeyError;
use crate::hotkey::{Hotkey, HotkeyId, Key, Modifiers};

static SHARED: Lazy<SimulatedSystem> = Lazy::new(SimulatedSystem::new);

/// A simulated "operating system" that owns the table of bound hotkeys
#[derive(Clone, Default)]
pub struct SimulatedSystem {
    inner: Arc<SystemInner>,
}

#[derive(Default)]
struct SystemInner {
    bindings: Mutex<HashMap<Hotkey, Binding>>,
    next_sink: AtomicU64,
}

struct Binding {
    sink: u64,
    id: HotkeyId,
    modifiers: Modifiers,
    queue: Sender<Queued>,
}

enum Queued {
    Message(SinkMessage),
    Quit,
}

impl SimulatedSystem {
    /// Create an isolated system with an empty binding table
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance used by [`super::default_backend`]
    pub fn shared() -> Self {
        SHARED.clone()
    }

    /// Simulate a physical key press. Returns true if a sink was notified.
    pub fn press(&self, key: Key, modifiers: Modifiers) -> bool {
        self.deliver(key, modifiers, false)
    }

    /// Simulate the auto-repeat of a held combination.
    ///
    /// Registrations made with [`Modifiers::NO_REPEAT`] are not notified.
    pub fn auto_repeat(&self, key: Key, modifiers: Modifiers) -> bool {
        self.deliver(key, modifiers, true)
    }

    /// Whether any sink currently holds the combination
    pub fn is_bound(&self, key: Key, modifiers: Modifiers) -> bool {
        self.bindings().contains_key(&Self::slot(key, modifiers))
    }

    /// Number of combinations bound across all sinks
    pub fn bound_count(&self) -> usize {
        self.bindings().len()
    }

    fn deliver(&self, key: Key, modifiers: Modifiers, repeat: bool) -> bool {
        let bindings = self.bindings();
        let Some(binding) = bindings.get(&Self::slot(key, modifiers)) else {
            trace!(%key, %modifiers, "press with no binding");
            return false;
        };

        if repeat && binding.modifiers.contains(Modifiers::NO_REPEAT) {
            trace!(id = %binding.id, "auto-repeat suppressed");
            return false;
        }

        let param = HotkeyEvent::pack(key, binding.modifiers.chord());
        binding
            .queue
            .send(Queued::Message(SinkMessage::Hotkey {
                id: binding.id,
                param,
            }))
            .is_ok()
    }

    fn slot(key: Key, modifiers: Modifiers) -> Hotkey {
        Hotkey::new(key, modifiers.chord())
    }

    fn bindings(&self) -> std::sync::MutexGuard<'_, HashMap<Hotkey, Binding>> {
        self.inner
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for SimulatedSystem {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn create_sink(
        &self,
        handler: MessageHandler,
        quit_on_close: bool,
    ) -> Result<Rc<dyn Sink>, HotkeyError> {
        let id = self.inner.next_sink.fetch_add(1, Ordering::SeqCst) + 1;
        let (queue_tx, queue_rx) = mpsc::channel();
        debug!(sink = id, "simulated sink created");

        Ok(Rc::new(SimulatedSink {
            id,
            system: self.clone(),
            queue_tx,
            queue_rx,
            handler: RefCell::new(handler),
            visible: Cell::new(false),
            closed: Cell::new(false),
            quit_on_close,
        }))
    }
}

struct SimulatedSink {
    id: u64,
    system: SimulatedSystem,
    queue_tx: Sender<Queued>,
    queue_rx: Receiver<Queued>,
    handler: RefCell<MessageHandler>,
    visible: Cell<bool>,
    closed: Cell<bool>,
    quit_on_close: bool,
}

impl SimulatedSink {
    fn dispatch(&self, handler: &mut MessageHandler, message: SinkMessage) {
        trace!(sink = self.id, ?message, "dispatching");
        handler(self as &dyn SinkOps, message);
    }
}

impl SinkOps for SimulatedSink {
    fn register(&self, id: HotkeyId, hotkey: Hotkey) -> bool {
        if self.closed.get() {
            return false;
        }

        let mut bindings = self.system.bindings();
        let slot = SimulatedSystem::slot(hotkey.key, hotkey.modifiers);
        if bindings.contains_key(&slot) {
            return false;
        }

        bindings.insert(
            slot,
            Binding {
                sink: self.id,
                id,
                modifiers: hotkey.modifiers,
                queue: self.queue_tx.clone(),
            },
        );
        true
    }

    fn unregister(&self, id: HotkeyId) -> bool {
        let mut bindings = self.system.bindings();
        let slot = bindings
            .iter()
            .find(|(_, binding)| binding.sink == self.id && binding.id == id)
            .map(|(slot, _)| *slot);

        match slot {
            Some(slot) => bindings.remove(&slot).is_some(),
            None => false,
        }
    }

    fn set_visible(&self, visible: bool) {
        if visible {
            debug!(sink = self.id, "refusing to show notification sink");
        }
        self.visible.set(false);
    }

    fn is_visible(&self) -> bool {
        self.visible.get()
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }

        self.system
            .bindings()
            .retain(|_, binding| binding.sink != self.id);

        if self.quit_on_close {
            let _ = self.queue_tx.send(Queued::Quit);
        }
        debug!(sink = self.id, "simulated sink closed");
    }
}

impl Sink for SimulatedSink {
    fn run(&self) {
        while let Ok(queued) = self.queue_rx.recv() {
            match queued {
                Queued::Quit => break,
                Queued::Message(message) => {
                    let mut handler = self.handler.borrow_mut();
                    self.dispatch(&mut handler, message);
                }
            }
        }
    }

    fn pump(&self) -> usize {
        // Nested pump from inside a handler; leave the queue for the outer loop
        let Ok(mut handler) = self.handler.try_borrow_mut() else {
            return 0;
        };

        let mut processed = 0;
        while let Ok(queued) = self.queue_rx.try_recv() {
            if let Queued::Message(message) = queued {
                self.dispatch(&mut handler, message);
                processed += 1;
            }
        }
        processed
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(SimulatedWaker {
            queue: self.queue_tx.clone(),
        })
    }

    fn as_ops(&self) -> &dyn SinkOps {
        self
    }
}

struct SimulatedWaker {
    queue: Sender<Queued>,
}

impl Waker for SimulatedWaker {
    fn wake(&self) -> bool {
        self.queue.send(Queued::Message(SinkMessage::Wake)).is_ok()
    }
}
