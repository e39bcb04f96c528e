//! Configuration loading and management

use std::env;

use anyhow::{bail, Context, Result};

use crate::hotkey::{Hotkey, LoopMode, ManagerOptions};

const BINDINGS_VAR: &str = "HOTKEY_MANAGER_BINDINGS";
const LOOP_VAR: &str = "HOTKEY_MANAGER_LOOP";
const THREAD_NAME_VAR: &str = "HOTKEY_MANAGER_THREAD_NAME";
const EVENT_CAPACITY_VAR: &str = "HOTKEY_MANAGER_EVENT_CAPACITY";

/// Host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Hotkeys registered at startup
    pub bindings: Vec<Hotkey>,

    /// Where the message loop runs
    pub loop_mode: LoopMode,

    /// Name of the dedicated message loop thread
    pub thread_name: String,

    /// Buffered presses per async subscriber
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = ManagerOptions::default();
        Self {
            bindings: parse_bindings("ctrl+alt+h").unwrap_or_default(),
            loop_mode: defaults.loop_mode,
            thread_name: defaults.thread_name,
            event_capacity: defaults.event_capacity,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bindings) = lookup(BINDINGS_VAR) {
            config.bindings = parse_bindings(&bindings)
                .with_context(|| format!("invalid {}", BINDINGS_VAR))?;
        }

        if let Some(mode) = lookup(LOOP_VAR) {
            config.loop_mode = match mode.trim().to_ascii_lowercase().as_str() {
                "dedicated" => LoopMode::Dedicated,
                "hosted" => LoopMode::Hosted,
                other => bail!("invalid {}: '{}'", LOOP_VAR, other),
            };
        }

        if let Some(name) = lookup(THREAD_NAME_VAR) {
            config.thread_name = name;
        }

        if let Some(capacity) = lookup(EVENT_CAPACITY_VAR) {
            config.event_capacity = capacity
                .trim()
                .parse()
                .with_context(|| format!("invalid {}", EVENT_CAPACITY_VAR))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_name.trim().is_empty() {
            bail!("thread name must not be empty");
        }
        if self.event_capacity == 0 {
            bail!("event capacity must be greater than 0");
        }
        Ok(())
    }

    /// Manager options for the platform default backend
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            loop_mode: self.loop_mode,
            thread_name: self.thread_name.clone(),
            event_capacity: self.event_capacity,
            ..ManagerOptions::default()
        }
    }
}

/// Parse a comma-separated list such as `ctrl+f1, alt+shift+k`
pub fn parse_bindings(list: &str) -> Result<Vec<Hotkey>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<Hotkey>()
                .with_context(|| format!("bad hotkey '{}'", entry))
        })
        .collect()
}
