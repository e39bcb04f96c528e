//! Owner-side half of the manager
//!
//! Commands are queued by any thread and executed one at a time on the
//! thread that owns the sink. Sinks are kept in a thread-local table so the
//! owning thread can also run commands inline.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::Arc;

use tracing::{debug, error, info};

use super::backend::{Backend, MessageHandler, Sink, SinkMessage, SinkOps, Waker};
use super::error::HotkeyError;
use super::manager::Shared;
use super::{Hotkey, HotkeyId};
use crate::events::HotkeyEvent;

thread_local! {
    static OWNED: RefCell<HashMap<u64, Rc<dyn Sink>>> = RefCell::new(HashMap::new());
}

/// Work the owning thread performs on behalf of a caller
#[derive(Debug, Clone, Copy)]
pub(crate) enum Command {
    Register { id: HotkeyId, hotkey: Hotkey },
    Unregister(HotkeyId),
    SetVisible(bool),
    IsVisible,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Registered(bool),
    Unregistered(bool),
    Visible(bool),
    ShutDown(usize),
}

/// A queued command and the channel its caller is blocked on
pub(crate) struct Envelope {
    pub command: Command,
    pub reply: Sender<Reply>,
}

/// Hand a sink to the current thread's table
pub(crate) fn adopt(instance: u64, sink: Rc<dyn Sink>) {
    OWNED.with(|owned| owned.borrow_mut().insert(instance, sink));
}

pub(crate) fn release(instance: u64) -> Option<Rc<dyn Sink>> {
    OWNED.with(|owned| owned.borrow_mut().remove(&instance))
}

/// Run `f` against the sink this thread owns for `instance`, if any
pub(crate) fn with_owned<R>(instance: u64, f: impl FnOnce(&dyn Sink) -> R) -> Option<R> {
    let sink = OWNED.with(|owned| owned.borrow().get(&instance).cloned())?;
    Some(f(&*sink))
}

/// Execute a command on the owning thread
pub(crate) fn execute(instance: u64, sink: &dyn SinkOps, shared: &Shared, command: Command) -> Reply {
    match command {
        Command::Register { id, hotkey } => {
            let ok = sink.register(id, hotkey);
            if ok {
                shared.record(id, hotkey);
            }
            Reply::Registered(ok)
        }
        Command::Unregister(id) => {
            let ok = sink.unregister(id);
            if ok {
                shared.forget(id);
            }
            Reply::Unregistered(ok)
        }
        Command::SetVisible(visible) => {
            sink.set_visible(visible);
            Reply::Visible(sink.is_visible())
        }
        Command::IsVisible => Reply::Visible(sink.is_visible()),
        Command::Shutdown => {
            let mut released = 0;
            for (id, hotkey) in shared.take_all() {
                if sink.unregister(id) {
                    released += 1;
                } else {
                    debug!(%id, %hotkey, "hotkey already gone at shutdown");
                }
            }
            sink.close();
            release(instance);
            Reply::ShutDown(released)
        }
    }
}

/// Build the callback a sink runs for each message it receives
pub(crate) fn message_handler(
    instance: u64,
    shared: Arc<Shared>,
    commands: Receiver<Envelope>,
) -> MessageHandler {
    Box::new(move |sink: &dyn SinkOps, message: SinkMessage| match message {
        SinkMessage::Wake => {
            for envelope in commands.try_iter() {
                debug!(command = ?envelope.command, "executing marshaled command");
                let reply = execute(instance, sink, &shared, envelope.command);
                // Caller gave up waiting; nothing to report back to
                let _ = envelope.reply.send(reply);
            }
        }
        SinkMessage::Hotkey { id, param } => {
            shared.dispatch(HotkeyEvent::from_packed(id, param));
        }
    })
}

/// Body of the dedicated message loop thread
pub(crate) fn run_dedicated(
    instance: u64,
    backend: Arc<dyn Backend>,
    shared: Arc<Shared>,
    commands: Receiver<Envelope>,
    ready: SyncSender<Result<Arc<dyn Waker>, HotkeyError>>,
) {
    let handler = message_handler(instance, shared, commands);
    let sink = match backend.create_sink(handler, true) {
        Ok(sink) => sink,
        Err(e) => {
            error!(error = %e, "failed to create notification sink");
            let _ = ready.send(Err(e));
            return;
        }
    };

    adopt(instance, Rc::clone(&sink));
    if ready.send(Ok(sink.waker())).is_err() {
        release(instance);
        sink.close();
        return;
    }

    info!(backend = backend.name(), "message loop running");
    sink.run();

    release(instance);
    info!("message loop stopped");
}
