//! Process-wide global hotkey manager
//!
//! Owns a hidden notification sink, hands out registration ids and
//! forwards every OS call to the thread that owns the sink. Presses are
//! re-dispatched to subscribers on that same thread.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::backend::{default_backend, Backend, Waker};
use super::error::HotkeyError;
use super::message_loop::{self, Command, Envelope, Reply};
use super::{Hotkey, Key, Modifiers};
use crate::events::HotkeyEvent;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);
static GLOBAL: OnceCell<HotkeyManager> = OnceCell::new();

/// Identifier of a registration, unique for the lifetime of its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotkeyId(i32);

impl HotkeyId {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for HotkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by [`HotkeyManager::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&HotkeyEvent) + Send + Sync>;

/// Where the notification sink's message loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Spawn a background thread that runs its own message loop
    #[default]
    Dedicated,
    /// Use the calling thread, which already runs a message loop
    Hosted,
}

/// Construction options for [`HotkeyManager`]
#[derive(Clone)]
pub struct ManagerOptions {
    pub loop_mode: LoopMode,
    /// Name of the dedicated loop thread
    pub thread_name: String,
    /// Capacity of the broadcast channel behind [`HotkeyManager::events`]
    pub event_capacity: usize,
    pub backend: Arc<dyn Backend>,
}

impl ManagerOptions {
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_loop_mode(mut self, loop_mode: LoopMode) -> Self {
        self.loop_mode = loop_mode;
        self
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            loop_mode: LoopMode::Dedicated,
            thread_name: "hotkey-message-loop".to_string(),
            event_capacity: 64,
            backend: default_backend(),
        }
    }
}

impl fmt::Debug for ManagerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerOptions")
            .field("loop_mode", &self.loop_mode)
            .field("thread_name", &self.thread_name)
            .field("event_capacity", &self.event_capacity)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// State shared between callers and the owning thread
pub(crate) struct Shared {
    next_id: AtomicI32,
    active: Mutex<BTreeMap<HotkeyId, Hotkey>>,
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    next_subscription: AtomicU64,
    events: broadcast::Sender<HotkeyEvent>,
}

impl Shared {
    fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            next_id: AtomicI32::new(0),
            active: Mutex::new(BTreeMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            events,
        }
    }

    /// Next id, or `None` once the counter is exhausted
    fn allocate_id(&self) -> Option<HotkeyId> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .ok()
            .map(|previous| HotkeyId(previous + 1))
    }

    pub(crate) fn record(&self, id: HotkeyId, hotkey: Hotkey) {
        self.active().insert(id, hotkey);
    }

    pub(crate) fn forget(&self, id: HotkeyId) {
        self.active().remove(&id);
    }

    pub(crate) fn take_all(&self) -> Vec<(HotkeyId, Hotkey)> {
        std::mem::take(&mut *self.active()).into_iter().collect()
    }

    /// Deliver a press to every subscriber, then to async listeners
    pub(crate) fn dispatch(&self, event: HotkeyEvent) {
        debug!(%event, "hotkey pressed");

        // Clone out so callbacks can (un)subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            // A panicking subscriber must not take the message loop down
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(%event, "hotkey subscriber panicked");
            }
        }

        // No receivers is not an error
        let _ = self.events.send(event);
    }

    fn active(&self) -> std::sync::MutexGuard<'_, BTreeMap<HotkeyId, Hotkey>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Global hotkey manager
///
/// Registration and unregistration may be called from any thread; the
/// call is executed on the thread owning the notification sink and the
/// caller blocks until it completes. Dropping the manager shuts it down.
pub struct HotkeyManager {
    instance: u64,
    shared: Arc<Shared>,
    commands: Sender<Envelope>,
    waker: Arc<dyn Waker>,
    owner: ThreadId,
    own_loop: bool,
    closed: AtomicBool,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
}

impl HotkeyManager {
    /// Create a manager according to `options.loop_mode`
    pub fn new(options: ManagerOptions) -> Result<Self, HotkeyError> {
        match options.loop_mode {
            LoopMode::Dedicated => Self::start(options),
            LoopMode::Hosted => Self::attach(options),
        }
    }

    /// Spawn a dedicated message loop thread and wait until its sink exists
    pub fn start(options: ManagerOptions) -> Result<Self, HotkeyError> {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(Shared::new(options.event_capacity));
        let (commands_tx, commands_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let backend = Arc::clone(&options.backend);
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(options.thread_name.clone())
            .spawn(move || {
                message_loop::run_dedicated(instance, backend, loop_shared, commands_rx, ready_tx)
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        let waker = match ready_rx.recv() {
            Ok(Ok(waker)) => waker,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(HotkeyError::Init(
                    "message loop thread exited during startup".to_string(),
                ));
            }
        };

        info!(
            backend = options.backend.name(),
            thread = %options.thread_name,
            "hotkey manager started with dedicated message loop"
        );

        Ok(Self {
            instance,
            shared,
            commands: commands_tx,
            waker,
            owner: handle.thread().id(),
            own_loop: true,
            closed: AtomicBool::new(false),
            loop_thread: Mutex::new(Some(handle)),
        })
    }

    /// Create the sink on the calling thread, which must keep running a
    /// message loop (a native UI loop, or regular [`HotkeyManager::pump`]
    /// calls) for the manager to make progress
    pub fn attach(options: ManagerOptions) -> Result<Self, HotkeyError> {
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(Shared::new(options.event_capacity));
        let (commands_tx, commands_rx) = mpsc::channel();

        let handler = message_loop::message_handler(instance, Arc::clone(&shared), commands_rx);
        let sink = options.backend.create_sink(handler, false)?;
        let waker = sink.waker();
        message_loop::adopt(instance, sink);

        info!(
            backend = options.backend.name(),
            "hotkey manager attached to existing message loop"
        );

        Ok(Self {
            instance,
            shared,
            commands: commands_tx,
            waker,
            owner: thread::current().id(),
            own_loop: false,
            closed: AtomicBool::new(false),
            loop_thread: Mutex::new(None),
        })
    }

    /// The process-wide manager, created with default options on first use
    pub fn global() -> Result<&'static HotkeyManager, HotkeyError> {
        Self::init_global(ManagerOptions::default())
    }

    /// Like [`HotkeyManager::global`], but with `options` if this call
    /// creates the instance. Later calls return the existing manager.
    pub fn init_global(options: ManagerOptions) -> Result<&'static HotkeyManager, HotkeyError> {
        GLOBAL.get_or_try_init(|| Self::new(options))
    }

    /// Bind `key` + `modifiers` system-wide.
    ///
    /// Returns `None` if the OS refuses the combination (typically because
    /// another registration holds it) or the manager has been shut down.
    /// An id is consumed either way.
    pub fn register(&self, key: Key, modifiers: Modifiers) -> Option<HotkeyId> {
        self.register_hotkey(Hotkey::new(key, modifiers))
    }

    pub fn register_hotkey(&self, hotkey: Hotkey) -> Option<HotkeyId> {
        let Some(id) = self.shared.allocate_id() else {
            warn!(%hotkey, "hotkey ids exhausted");
            return None;
        };
        match self.call(Command::Register { id, hotkey }) {
            Ok(Reply::Registered(true)) => {
                info!(%id, %hotkey, "hotkey registered");
                Some(id)
            }
            Ok(_) => {
                warn!(%id, %hotkey, "hotkey registration refused");
                None
            }
            Err(e) => {
                warn!(%id, %hotkey, error = %e, "hotkey registration failed");
                None
            }
        }
    }

    /// Release a registration; false for ids that are not currently bound
    pub fn unregister(&self, id: HotkeyId) -> bool {
        match self.call(Command::Unregister(id)) {
            Ok(Reply::Unregistered(true)) => {
                info!(%id, "hotkey unregistered");
                true
            }
            Ok(_) => {
                debug!(%id, "unregister of unknown hotkey id");
                false
            }
            Err(e) => {
                warn!(%id, error = %e, "hotkey unregistration failed");
                false
            }
        }
    }

    /// Call `callback` on the message loop thread for every press
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HotkeyEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst) + 1);
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .shared
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(subscription, _)| *subscription != id);
        subscribers.len() != before
    }

    /// Stream of presses for async consumers
    pub fn events(&self) -> broadcast::Receiver<HotkeyEvent> {
        self.shared.events.subscribe()
    }

    /// True when the manager runs its own message loop thread
    pub fn uses_own_message_loop(&self) -> bool {
        self.own_loop
    }

    pub fn is_running(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Active registrations in id order
    pub fn registrations(&self) -> Vec<(HotkeyId, Hotkey)> {
        self.shared
            .active()
            .iter()
            .map(|(id, hotkey)| (*id, *hotkey))
            .collect()
    }

    /// Ask the sink to change visibility. It always stays hidden, so the
    /// returned visibility is false.
    pub fn set_window_visible(&self, visible: bool) -> bool {
        match self.call(Command::SetVisible(visible)) {
            Ok(Reply::Visible(visible)) => visible,
            _ => false,
        }
    }

    pub fn is_window_visible(&self) -> bool {
        match self.call(Command::IsVisible) {
            Ok(Reply::Visible(visible)) => visible,
            _ => false,
        }
    }

    /// Process queued messages of a hosted sink without blocking.
    ///
    /// Must be called on the thread that created the manager.
    pub fn pump(&self) -> Result<usize, HotkeyError> {
        if thread::current().id() != self.owner {
            return Err(HotkeyError::WrongThread);
        }
        message_loop::with_owned(self.instance, |sink| sink.pump()).ok_or(HotkeyError::Closed)
    }

    /// Unregister every active hotkey and close the sink.
    ///
    /// Returns the number of registrations released. Later calls return 0.
    pub fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let released = match self.marshal(Command::Shutdown) {
            Ok(Reply::ShutDown(released)) => released,
            Ok(reply) => {
                warn!(?reply, "unexpected reply to shutdown");
                0
            }
            Err(e) => {
                warn!(error = %e, "message loop gone before shutdown");
                0
            }
        };

        let handle = self
            .loop_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // Shutdown from a subscriber runs on the loop thread itself
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("message loop thread panicked");
            }
        }

        info!(released, "hotkey manager shut down");
        released
    }

    fn call(&self, command: Command) -> Result<Reply, HotkeyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HotkeyError::Closed);
        }
        self.marshal(command)
    }

    /// Run `command` on the owning thread and wait for its reply
    fn marshal(&self, command: Command) -> Result<Reply, HotkeyError> {
        if thread::current().id() == self.owner {
            return message_loop::with_owned(self.instance, |sink| {
                message_loop::execute(self.instance, sink.as_ops(), &self.shared, command)
            })
            .ok_or(HotkeyError::LoopGone);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(Envelope {
                command,
                reply: reply_tx,
            })
            .map_err(|_| HotkeyError::LoopGone)?;

        if !self.waker.wake() {
            return Err(HotkeyError::LoopGone);
        }
        reply_rx.recv().map_err(|_| HotkeyError::LoopGone)
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for HotkeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotkeyManager")
            .field("instance", &self.instance)
            .field("own_loop", &self.own_loop)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::Receiver;
    use std::time::Duration;

    use super::*;
    use crate::hotkey::backend::{MessageHandler, Sink, SimulatedSystem};

    const WAIT: Duration = Duration::from_secs(5);

    fn start(system: &SimulatedSystem) -> HotkeyManager {
        let options = ManagerOptions::default().with_backend(Arc::new(system.clone()));
        HotkeyManager::start(options).unwrap()
    }

    fn collect(manager: &HotkeyManager) -> Receiver<HotkeyEvent> {
        let (tx, rx) = mpsc::channel();
        manager.subscribe(move |event| {
            let _ = tx.send(*event);
        });
        rx
    }

    fn key(code: u16) -> Key {
        Key::from_code(code)
    }

    #[test]
    fn test_register_unregister_scenario() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        assert!(manager.uses_own_message_loop());

        let first = manager.register(Key::F1, Modifiers::CONTROL);
        assert_eq!(first, Some(HotkeyId::from_raw(1)));

        assert_eq!(manager.register(Key::F1, Modifiers::CONTROL), None);
        assert_eq!(manager.shared.next_id.load(Ordering::SeqCst), 2);

        assert!(manager.unregister(HotkeyId::from_raw(1)));
        assert!(!manager.unregister(HotkeyId::from_raw(1)));
    }

    #[test]
    fn test_failed_registration_consumes_id() {
        let system = SimulatedSystem::new();
        let manager = start(&system);

        let a = manager.register(Key::F2, Modifiers::ALT).unwrap();
        assert!(manager.register(Key::F2, Modifiers::ALT).is_none());
        let b = manager.register(Key::F3, Modifiers::ALT).unwrap();

        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 3);
        // The id handed to the failed attempt was never bound
        assert!(!manager.unregister(HotkeyId::from_raw(2)));
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let system = SimulatedSystem::new();
        let manager = start(&system);

        let per_thread: Vec<Vec<HotkeyId>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u16)
                .map(|t| {
                    let manager = &manager;
                    scope.spawn(move || {
                        (0..16u16)
                            .map(|i| manager.register(key(0x100 + t * 16 + i), Modifiers::NONE).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for ids in &per_thread {
            assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
        }

        let mut all: Vec<i32> = per_thread.iter().flatten().map(|id| id.get()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 128);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&128));
        assert_eq!(manager.registrations().len(), 128);
    }

    #[test]
    fn test_unregister_unknown_id_has_no_effect() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let id = manager.register(Key::F4, Modifiers::SHIFT).unwrap();

        assert!(!manager.unregister(HotkeyId::from_raw(42)));
        assert!(!manager.unregister(HotkeyId::from_raw(-1)));

        assert_eq!(manager.registrations(), vec![(id, Hotkey::new(Key::F4, Modifiers::SHIFT))]);
        assert!(system.is_bound(Key::F4, Modifiers::SHIFT));
    }

    #[test]
    fn test_duplicate_registration_keeps_first_active() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let events = collect(&manager);

        let first = manager.register(Key::F5, Modifiers::WIN).unwrap();
        assert!(manager.register(Key::F5, Modifiers::WIN).is_none());

        assert!(system.press(Key::F5, Modifiers::WIN));
        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event.id, first);
    }

    #[test]
    fn test_reregister_after_unregister() {
        let system = SimulatedSystem::new();
        let manager = start(&system);

        let id = manager.register(Key::F6, Modifiers::CONTROL).unwrap();
        assert!(manager.unregister(id));
        assert!(!system.is_bound(Key::F6, Modifiers::CONTROL));

        let again = manager.register(Key::F6, Modifiers::CONTROL).unwrap();
        assert!(again > id);
    }

    #[test]
    fn test_press_dispatches_exactly_one_event() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let events = collect(&manager);
        let modifiers = Modifiers::CONTROL | Modifiers::SHIFT;

        let id = manager.register(Key::F7, modifiers).unwrap();
        assert!(system.press(Key::F7, modifiers));

        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event, HotkeyEvent::new(id, Key::F7, modifiers));
        assert!(events.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_no_repeat_suppresses_auto_repeat() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let events = collect(&manager);

        manager
            .register(Key::F8, Modifiers::ALT | Modifiers::NO_REPEAT)
            .unwrap();

        assert!(!system.auto_repeat(Key::F8, Modifiers::ALT));
        assert!(system.press(Key::F8, Modifiers::ALT));

        let event = events.recv_timeout(WAIT).unwrap();
        assert_eq!(event.modifiers, Modifiers::ALT);
    }

    #[test]
    fn test_every_subscriber_notified_until_unsubscribed() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let counted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&counted);
        let subscription = manager.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let events = collect(&manager);

        manager.register(Key::F9, Modifiers::NONE).unwrap();
        system.press(Key::F9, Modifiers::NONE);
        events.recv_timeout(WAIT).unwrap();
        assert_eq!(counted.load(Ordering::SeqCst), 1);

        assert!(manager.unsubscribe(subscription));
        assert!(!manager.unsubscribe(subscription));

        system.press(Key::F9, Modifiers::NONE);
        events.recv_timeout(WAIT).unwrap();
        assert_eq!(counted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_events_stream() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let mut rx = manager.events();

        let id = manager.register(Key::F10, Modifiers::CONTROL).unwrap();
        system.press(Key::F10, Modifiers::CONTROL);

        let event = tokio_test::block_on(async {
            tokio::time::timeout(WAIT, rx.recv()).await
        })
        .unwrap()
        .unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.key, Key::F10);
    }

    #[test]
    fn test_window_never_visible() {
        let system = SimulatedSystem::new();
        let manager = start(&system);

        assert!(!manager.is_window_visible());
        assert!(!manager.set_window_visible(true));
        assert!(!manager.is_window_visible());
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        let id = manager.register(Key::F11, Modifiers::CONTROL).unwrap();
        manager.register(Key::F12, Modifiers::CONTROL).unwrap();

        assert_eq!(manager.shutdown(), 2);
        assert_eq!(manager.shutdown(), 0);
        assert!(!manager.is_running());
        assert_eq!(system.bound_count(), 0);
        assert!(manager.registrations().is_empty());

        // Calls after shutdown fail instead of blocking
        assert!(manager.register(Key::F11, Modifiers::ALT).is_none());
        assert!(!manager.unregister(id));
        assert!(!manager.is_window_visible());

        let other = start(&system);
        assert!(other.register(Key::F11, Modifiers::CONTROL).is_some());
    }

    #[test]
    fn test_drop_releases_bindings() {
        let system = SimulatedSystem::new();
        {
            let manager = start(&system);
            manager.register(Key::HOME, Modifiers::WIN).unwrap();
            assert_eq!(system.bound_count(), 1);
        }
        assert_eq!(system.bound_count(), 0);
    }

    #[test]
    fn test_shutdown_from_subscriber() {
        let system = SimulatedSystem::new();
        let manager = Arc::new(start(&system));
        let weak = Arc::downgrade(&manager);
        manager.subscribe(move |_| {
            if let Some(manager) = weak.upgrade() {
                manager.shutdown();
            }
        });

        manager.register(Key::END, Modifiers::CONTROL).unwrap();
        system.press(Key::END, Modifiers::CONTROL);

        let deadline = std::time::Instant::now() + WAIT;
        while manager.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!manager.is_running());

        while system.bound_count() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(system.bound_count(), 0);
    }

    #[test]
    fn test_hosted_mode_runs_inline_and_pumps() {
        let system = SimulatedSystem::new();
        let options = ManagerOptions::default()
            .with_backend(Arc::new(system.clone()))
            .with_loop_mode(LoopMode::Hosted);
        let manager = HotkeyManager::new(options).unwrap();
        assert!(!manager.uses_own_message_loop());

        let presses = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&presses);
        manager.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Owner thread executes without waiting for a pump
        let id = manager.register(Key::INSERT, Modifiers::ALT).unwrap();
        assert!(system.press(Key::INSERT, Modifiers::ALT));
        assert_eq!(presses.load(Ordering::SeqCst), 0);

        assert_eq!(manager.pump().unwrap(), 1);
        assert_eq!(presses.load(Ordering::SeqCst), 1);

        thread::scope(|scope| {
            let manager = &manager;
            let pumped_elsewhere = scope.spawn(move || manager.pump()).join().unwrap();
            assert!(matches!(pumped_elsewhere, Err(HotkeyError::WrongThread)));

            // Another thread blocks until the owner pumps
            let unregister = scope.spawn(move || manager.unregister(id));
            while !unregister.is_finished() {
                manager.pump().unwrap();
                thread::yield_now();
            }
            assert!(unregister.join().unwrap());
        });

        assert_eq!(manager.shutdown(), 0);
        assert!(matches!(manager.pump(), Err(HotkeyError::Closed)));
    }

    #[test]
    fn test_ids_advance_for_contended_combination() {
        let system = SimulatedSystem::new();
        let manager = start(&system);

        let per_thread: Vec<Vec<Option<HotkeyId>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let manager = &manager;
                    scope.spawn(move || {
                        (0..50)
                            .map(|_| manager.register(Key::F1, Modifiers::CONTROL))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<HotkeyId> = per_thread.iter().flatten().flatten().copied().collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(manager.shared.next_id.load(Ordering::SeqCst), 400);
        assert_eq!(manager.registrations(), vec![(winners[0], Hotkey::new(Key::F1, Modifiers::CONTROL))]);
    }

    #[test]
    fn test_exhausted_ids_refuse_registration() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        manager.shared.next_id.store(i32::MAX - 1, Ordering::SeqCst);

        let last = manager.register(Key::F1, Modifiers::ALT);
        assert_eq!(last, Some(HotkeyId::from_raw(i32::MAX)));

        assert_eq!(manager.register(Key::F2, Modifiers::ALT), None);
        assert_eq!(manager.shared.next_id.load(Ordering::SeqCst), i32::MAX);
        assert!(!system.is_bound(Key::F2, Modifiers::ALT));
        assert!(manager.unregister(HotkeyId::from_raw(i32::MAX)));
    }

    #[test]
    fn test_panicking_subscriber_keeps_loop_alive() {
        let system = SimulatedSystem::new();
        let manager = start(&system);
        manager.subscribe(|_| panic!("subscriber failure"));
        let events = collect(&manager);

        let id = manager.register(Key::F1, Modifiers::CONTROL).unwrap();
        assert!(system.press(Key::F1, Modifiers::CONTROL));
        assert_eq!(events.recv_timeout(WAIT).unwrap().id, id);

        assert!(manager.is_running());
        let other = manager.register(Key::F2, Modifiers::CONTROL).unwrap();
        assert!(manager.unregister(other));

        assert!(system.press(Key::F1, Modifiers::CONTROL));
        assert_eq!(events.recv_timeout(WAIT).unwrap().id, id);

        assert_eq!(manager.shutdown(), 1);
        assert_eq!(system.bound_count(), 0);
    }

    struct FailingBackend;

    impl Backend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn create_sink(
            &self,
            _handler: MessageHandler,
            _quit_on_close: bool,
        ) -> Result<Rc<dyn Sink>, HotkeyError> {
            Err(HotkeyError::Init("no window station".to_string()))
        }
    }

    #[test]
    fn test_initialization_failure_is_reported() {
        let options = ManagerOptions::default().with_backend(Arc::new(FailingBackend));
        assert!(matches!(
            HotkeyManager::start(options.clone()),
            Err(HotkeyError::Init(_))
        ));
        assert!(matches!(
            HotkeyManager::attach(options),
            Err(HotkeyError::Init(_))
        ));
    }

    #[test]
    fn test_global_is_created_once() {
        let first = HotkeyManager::global().unwrap();
        let second = HotkeyManager::global().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.uses_own_message_loop());
        assert!(first.is_running());
    }
}
