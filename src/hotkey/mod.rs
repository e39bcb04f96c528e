//! Global hotkey registration
//!
//! A [`HotkeyManager`] owns a hidden notification sink on a message loop
//! thread and marshals every OS call onto that thread.

pub mod backend;
mod error;
mod keys;
mod manager;
mod message_loop;

pub use backend::{default_backend, Backend, SimulatedSystem};
pub use error::HotkeyError;
pub use keys::{flags, Hotkey, Key, Modifiers};
pub use manager::{HotkeyId, HotkeyManager, LoopMode, ManagerOptions, SubscriptionId};
