//! Events delivered to hotkey subscribers
//!
//! The OS reports a press as a single packed parameter: the high 16 bits
//! carry the virtual-key code and the low 16 bits the modifier flags.

use serde::{Deserialize, Serialize};

use crate::hotkey::{HotkeyId, Key, Modifiers};

/// A registered combination was pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyEvent {
    /// Registration that fired
    pub id: HotkeyId,
    /// Key that was pressed
    pub key: Key,
    /// Modifiers held with the key
    pub modifiers: Modifiers,
}

impl HotkeyEvent {
    pub fn new(id: HotkeyId, key: Key, modifiers: Modifiers) -> Self {
        Self { id, key, modifiers }
    }

    /// Decode the packed notification parameter
    pub fn from_packed(id: HotkeyId, param: isize) -> Self {
        let param = param as u32;
        Self {
            id,
            key: Key::from_code(((param & 0xffff_0000) >> 16) as u16),
            modifiers: Modifiers::from_bits_truncate((param & 0x0000_ffff) as u16),
        }
    }

    /// Inverse of [`HotkeyEvent::from_packed`]
    pub fn pack(key: Key, modifiers: Modifiers) -> isize {
        ((u32::from(key.code()) << 16) | u32::from(modifiers.bits())) as isize
    }
}

impl std::fmt::Display for HotkeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "HOTKEY_PRESSED {} ({})", self.key, self.id)
        } else {
            write!(f, "HOTKEY_PRESSED {}+{} ({})", self.modifiers, self.key, self.id)
        }
    }
}
