//! Key codes, modifier flags and key combinations
//!
//! Values follow the Win32 input subsystem: keys are virtual-key codes and
//! modifiers are the `MOD_*` flags accepted by `RegisterHotKey`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::HotkeyError;

/// Raw modifier flag values as understood by `RegisterHotKey`
pub mod flags {
    /// Either Alt key
    pub const ALT: u16 = 0x0001;
    /// Either Control key
    pub const CONTROL: u16 = 0x0002;
    /// Either Shift key
    pub const SHIFT: u16 = 0x0004;
    /// Either Windows (platform) key
    pub const WIN: u16 = 0x0008;
    /// Suppress auto-repeat notifications while the combination is held
    pub const NO_REPEAT: u16 = 0x4000;
}

/// Set of modifier keys combined by bitwise union
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub struct Modifiers(u16);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const ALT: Self = Self(flags::ALT);
    pub const CONTROL: Self = Self(flags::CONTROL);
    pub const SHIFT: Self = Self(flags::SHIFT);
    pub const WIN: Self = Self(flags::WIN);
    pub const NO_REPEAT: Self = Self(flags::NO_REPEAT);

    const ALL: u16 = flags::ALT | flags::CONTROL | flags::SHIFT | flags::WIN | flags::NO_REPEAT;

    /// Build a set from raw bits, dropping anything that is not a known flag
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// The modifiers that identify a combination, i.e. without `NO_REPEAT`
    pub const fn chord(self) -> Self {
        self.difference(Self::NO_REPEAT)
    }
}

impl From<u16> for Modifiers {
    fn from(bits: u16) -> Self {
        Self::from_bits_truncate(bits)
    }
}

impl From<Modifiers> for u16 {
    fn from(modifiers: Modifiers) -> Self {
        modifiers.bits()
    }
}

impl BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Modifiers, &str); 5] = [
            (Modifiers::CONTROL, "Ctrl"),
            (Modifiers::ALT, "Alt"),
            (Modifiers::SHIFT, "Shift"),
            (Modifiers::WIN, "Win"),
            (Modifiers::NO_REPEAT, "NoRepeat"),
        ];

        if self.is_empty() {
            return write!(f, "None");
        }

        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for Modifiers {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::NONE),
            "alt" | "option" => Ok(Self::ALT),
            "ctrl" | "control" => Ok(Self::CONTROL),
            "shift" => Ok(Self::SHIFT),
            "win" | "super" | "meta" | "cmd" | "command" => Ok(Self::WIN),
            "norepeat" | "no_repeat" | "no-repeat" => Ok(Self::NO_REPEAT),
            other => Err(HotkeyError::Parse(format!("unknown modifier '{}'", other))),
        }
    }
}

/// Virtual-key code of a non-modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(u16);

impl Key {
    pub const BACKSPACE: Self = Self(0x08);
    pub const TAB: Self = Self(0x09);
    pub const ENTER: Self = Self(0x0D);
    pub const PAUSE: Self = Self(0x13);
    pub const ESCAPE: Self = Self(0x1B);
    pub const SPACE: Self = Self(0x20);
    pub const PAGE_UP: Self = Self(0x21);
    pub const PAGE_DOWN: Self = Self(0x22);
    pub const END: Self = Self(0x23);
    pub const HOME: Self = Self(0x24);
    pub const LEFT: Self = Self(0x25);
    pub const UP: Self = Self(0x26);
    pub const RIGHT: Self = Self(0x27);
    pub const DOWN: Self = Self(0x28);
    pub const PRINT_SCREEN: Self = Self(0x2C);
    pub const INSERT: Self = Self(0x2D);
    pub const DELETE: Self = Self(0x2E);
    pub const F1: Self = Self(0x70);
    pub const F2: Self = Self(0x71);
    pub const F3: Self = Self(0x72);
    pub const F4: Self = Self(0x73);
    pub const F5: Self = Self(0x74);
    pub const F6: Self = Self(0x75);
    pub const F7: Self = Self(0x76);
    pub const F8: Self = Self(0x77);
    pub const F9: Self = Self(0x78);
    pub const F10: Self = Self(0x79);
    pub const F11: Self = Self(0x7A);
    pub const F12: Self = Self(0x7B);

    const NAMED: [(Key, &'static str); 17] = [
        (Key::BACKSPACE, "Backspace"),
        (Key::TAB, "Tab"),
        (Key::ENTER, "Enter"),
        (Key::PAUSE, "Pause"),
        (Key::ESCAPE, "Esc"),
        (Key::SPACE, "Space"),
        (Key::PAGE_UP, "PageUp"),
        (Key::PAGE_DOWN, "PageDown"),
        (Key::END, "End"),
        (Key::HOME, "Home"),
        (Key::LEFT, "Left"),
        (Key::UP, "Up"),
        (Key::RIGHT, "Right"),
        (Key::DOWN, "Down"),
        (Key::PRINT_SCREEN, "PrintScreen"),
        (Key::INSERT, "Insert"),
        (Key::DELETE, "Delete"),
    ];

    /// Wrap a raw virtual-key code
    pub const fn from_code(code: u16) -> Self {
        Self(code)
    }

    pub const fn code(self) -> u16 {
        self.0
    }

    /// Key for an ASCII letter or digit; letters map to their uppercase code
    pub fn from_char(ch: char) -> Option<Self> {
        if ch.is_ascii_alphanumeric() {
            Some(Self(ch.to_ascii_uppercase() as u16))
        } else {
            None
        }
    }

    /// Function key F1..=F24
    pub fn function(n: u8) -> Option<Self> {
        if (1..=24).contains(&n) {
            Some(Self(0x70 + u16::from(n) - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((_, name)) = Self::NAMED.iter().find(|(key, _)| key == self) {
            return write!(f, "{}", name);
        }
        match self.0 {
            code @ (0x30..=0x39 | 0x41..=0x5A) => write!(f, "{}", code as u8 as char),
            code @ 0x70..=0x87 => write!(f, "F{}", code - 0x70 + 1),
            code => write!(f, "0x{:02X}", code),
        }
    }
}

impl FromStr for Key {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let err = || HotkeyError::Parse(format!("unknown key '{}'", name));

        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "RETURN" => return Ok(Self::ENTER),
            "ESCAPE" => return Ok(Self::ESCAPE),
            "DEL" => return Ok(Self::DELETE),
            "INS" => return Ok(Self::INSERT),
            "PGUP" => return Ok(Self::PAGE_UP),
            "PGDN" => return Ok(Self::PAGE_DOWN),
            "PRTSC" => return Ok(Self::PRINT_SCREEN),
            _ => {}
        }

        if let Some((key, _)) = Self::NAMED
            .iter()
            .find(|(_, key_name)| key_name.eq_ignore_ascii_case(name))
        {
            return Ok(*key);
        }

        let mut chars = upper.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            return Self::from_char(ch).ok_or_else(err);
        }

        if let Some(n) = upper.strip_prefix('F') {
            let n: u8 = n.parse().map_err(|_| err())?;
            return Self::function(n).ok_or_else(err);
        }

        if let Some(hex) = upper.strip_prefix("0X") {
            return u16::from_str_radix(hex, 16).map(Self).map_err(|_| err());
        }

        Err(err())
    }
}

/// A key together with the modifiers that must accompany it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hotkey {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl Hotkey {
    pub const fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

/// Parses `ctrl+shift+k` style strings; the last segment is the key
impl FromStr for Hotkey {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = match parts.pop() {
            Some(key) if !key.is_empty() => key.parse::<Key>()?,
            _ => return Err(HotkeyError::Parse(format!("missing key in '{}'", s))),
        };

        let mut modifiers = Modifiers::NONE;
        for part in parts {
            modifiers |= part.parse::<Modifiers>()?;
        }

        Ok(Self { key, modifiers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modifier_union() {
        let mods = Modifiers::CONTROL | Modifiers::SHIFT;
        assert_eq!(mods.bits(), 0x6);
        assert!(mods.contains(Modifiers::CONTROL));
        assert!(!mods.contains(Modifiers::ALT));
        assert!(Modifiers::NONE.is_empty());
    }

    #[test]
    fn test_chord_drops_no_repeat() {
        let mods = Modifiers::ALT | Modifiers::NO_REPEAT;
        assert_eq!(mods.chord(), Modifiers::ALT);
    }

    #[test]
    fn test_from_bits_truncate_ignores_unknown() {
        let mods = Modifiers::from_bits_truncate(0x8003);
        assert_eq!(mods, Modifiers::ALT | Modifiers::CONTROL);
    }

    #[test]
    fn test_modifier_deserialization_drops_unknown_bits() {
        let mods: Modifiers = serde_json::from_str("32770").unwrap();
        assert_eq!(mods, Modifiers::CONTROL);

        let mods: Modifiers = serde_json::from_str("16385").unwrap();
        assert_eq!(mods, Modifiers::ALT | Modifiers::NO_REPEAT);
        assert_eq!(serde_json::to_string(&mods).unwrap(), "16385");
    }

    #[test]
    fn test_modifier_display() {
        let mods = Modifiers::SHIFT | Modifiers::CONTROL;
        assert_eq!(mods.to_string(), "Ctrl+Shift");
        assert_eq!(Modifiers::NONE.to_string(), "None");
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!("F1".parse::<Key>().unwrap(), Key::F1);
        assert_eq!("f12".parse::<Key>().unwrap(), Key::F12);
        assert_eq!("F24".parse::<Key>().unwrap().code(), 0x87);
        assert_eq!("k".parse::<Key>().unwrap().code(), 0x4B);
        assert_eq!("7".parse::<Key>().unwrap().code(), 0x37);
        assert_eq!("Return".parse::<Key>().unwrap(), Key::ENTER);
        assert_eq!("space".parse::<Key>().unwrap(), Key::SPACE);
        assert_eq!("0x91".parse::<Key>().unwrap().code(), 0x91);
        assert!("F25".parse::<Key>().is_err());
        assert!("?".parse::<Key>().is_err());
        assert!("banana".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::F1.to_string(), "F1");
        assert_eq!(Key::from_char('q').unwrap().to_string(), "Q");
        assert_eq!(Key::ESCAPE.to_string(), "Esc");
        assert_eq!(Key::from_code(0x91).to_string(), "0x91");
    }

    #[test]
    fn test_parse_hotkey() {
        let hotkey: Hotkey = "ctrl+shift+k".parse().unwrap();
        assert_eq!(hotkey.key, Key::from_char('K').unwrap());
        assert_eq!(hotkey.modifiers, Modifiers::CONTROL | Modifiers::SHIFT);
        assert_eq!(hotkey.to_string(), "Ctrl+Shift+K");

        let bare: Hotkey = "F5".parse().unwrap();
        assert_eq!(bare, Hotkey::new(Key::F5, Modifiers::NONE));
    }

    #[test]
    fn test_parse_hotkey_errors() {
        assert!("ctrl+".parse::<Hotkey>().is_err());
        assert!("hyper+k".parse::<Hotkey>().is_err());
        assert!("".parse::<Hotkey>().is_err());
    }
}
