//! hotkey-manager: process-wide global hotkeys
//!
//! Application code asks for a key + modifier combination to be captured
//! system-wide and is notified whenever it is pressed, whichever window has
//! focus. The OS facility is thread-affine, so all calls are marshaled to
//! the thread that owns a hidden message window.
//!
//! ```no_run
//! use hotkey_manager::{HotkeyManager, Key, Modifiers};
//!
//! let manager = HotkeyManager::global()?;
//! manager.subscribe(|event| println!("{}", event));
//! if let Some(id) = manager.register(Key::F1, Modifiers::CONTROL) {
//!     // ...
//!     manager.unregister(id);
//! }
//! # Ok::<(), hotkey_manager::HotkeyError>(())
//! ```

pub mod config;
pub mod events;
pub mod hotkey;
pub mod lifecycle;

pub use config::Config;
pub use events::HotkeyEvent;
pub use hotkey::{
    Hotkey, HotkeyError, HotkeyId, HotkeyManager, Key, LoopMode, ManagerOptions, Modifiers,
    SimulatedSystem, SubscriptionId,
};
