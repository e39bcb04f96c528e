//! Notification sink backends
//!
//! A sink is the thread-affine endpoint the OS delivers hotkey
//! notifications to. It is created on, and may only be used from, the
//! thread that owns the message loop. Everything that crosses threads goes
//! through its [`Waker`].

use std::rc::Rc;
use std::sync::Arc;

use super::error::HotkeyError;
use super::{HotkeyId, Hotkey};

pub mod simulated;
#[cfg(windows)]
pub mod win32;

pub use simulated::SimulatedSystem;

/// Messages a sink hands to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMessage {
    /// Commands are waiting in the owner's queue
    Wake,
    /// A registered combination was pressed; `param` is the packed key/modifiers
    Hotkey { id: HotkeyId, param: isize },
}

/// Callback run on the owning thread for every message addressed to a sink
pub type MessageHandler = Box<dyn FnMut(&dyn SinkOps, SinkMessage)>;

/// Operations that are only valid on the sink's owning thread
pub trait SinkOps {
    /// Bind `hotkey` to `id`; false if the OS refuses
    fn register(&self, id: HotkeyId, hotkey: Hotkey) -> bool;

    /// Release `id`; false if it is not bound to this sink
    fn unregister(&self, id: HotkeyId) -> bool;

    /// Request a visibility change. Sinks always stay hidden.
    fn set_visible(&self, visible: bool);

    fn is_visible(&self) -> bool;

    /// Destroy the sink; a running [`Sink::run`] returns afterwards
    fn close(&self);
}

/// A live notification sink
pub trait Sink: SinkOps {
    /// Run the message loop on the current thread until the sink closes
    fn run(&self);

    /// Process already queued messages without blocking
    fn pump(&self) -> usize;

    /// Handle used by other threads to get the owner's attention
    fn waker(&self) -> Arc<dyn Waker>;

    fn as_ops(&self) -> &dyn SinkOps;
}

/// Wakes the owning thread so it drains its command queue
pub trait Waker: Send + Sync {
    /// Returns false once the sink is gone
    fn wake(&self) -> bool;
}

/// Factory for sinks
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Create a sink on the calling thread.
    ///
    /// `quit_on_close` is set when the sink owns its loop; closing it must
    /// then make [`Sink::run`] return. Hosted sinks leave the host loop alone.
    fn create_sink(
        &self,
        handler: MessageHandler,
        quit_on_close: bool,
    ) -> Result<Rc<dyn Sink>, HotkeyError>;
}

/// The backend for the current platform
pub fn default_backend() -> Arc<dyn Backend> {
    #[cfg(windows)]
    {
        Arc::new(win32::Win32Backend)
    }
    #[cfg(not(windows))]
    {
        Arc::new(SimulatedSystem::shared())
    }
}
