//! Win32 notification sink
//!
//! `RegisterHotKey` delivers `WM_HOTKEY` to a window, so the sink is a
//! message-only window (parented to `HWND_MESSAGE`). It can never be shown,
//! does not appear in the taskbar and receives no broadcast messages.
//! Other threads wake it by posting a private message.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error, warn};
use windows::core::{w, Error as WinError, PCWSTR};
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    RegisterHotKey, UnregisterHotKey, HOT_KEY_MODIFIERS,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    IsWindowVisible, PeekMessageW, PostMessageW, PostQuitMessage, RegisterClassExW, ShowWindow,
    TranslateMessage, HMENU, HWND_MESSAGE, MSG, PM_REMOVE, SWP_SHOWWINDOW, SW_HIDE, WINDOWPOS,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_APP, WM_DESTROY, WM_HOTKEY, WM_WINDOWPOSCHANGING,
    WNDCLASSEXW,
};

use super::{Backend, MessageHandler, Sink, SinkMessage, SinkOps, Waker};
use crate::hotkey::error::HotkeyError;
use crate::hotkey::{Hotkey, HotkeyId};

/// Posted to the sink when its command queue is non-empty
const WM_WAKE: u32 = WM_APP + 1;

thread_local! {
    // Sinks owned by this thread, keyed by window handle
    static WINDOWS: RefCell<HashMap<isize, Rc<MessageWindow>>> = RefCell::new(HashMap::new());
}

fn class_name() -> PCWSTR {
    w!("HotkeyManagerMessageWindow")
}

fn handle_key(hwnd: HWND) -> isize {
    hwnd.0 as isize
}

/// Backend creating message-only windows
pub struct Win32Backend;

impl Backend for Win32Backend {
    fn name(&self) -> &'static str {
        "win32"
    }

    fn create_sink(
        &self,
        handler: MessageHandler,
        quit_on_close: bool,
    ) -> Result<Rc<dyn Sink>, HotkeyError> {
        let window: Rc<dyn Sink> = MessageWindow::create(handler, quit_on_close)?;
        Ok(window)
    }
}

struct MessageWindow {
    hwnd: HWND,
    handler: RefCell<MessageHandler>,
    closed: Cell<bool>,
    quit_on_close: bool,
}

impl MessageWindow {
    fn create(handler: MessageHandler, quit_on_close: bool) -> Result<Rc<Self>, HotkeyError> {
        // Retried on the next sink creation if registration failed
        static CLASS_REGISTERED: OnceCell<()> = OnceCell::new();

        let instance = unsafe { GetModuleHandleW(PCWSTR::null()) }
            .map_err(|e| HotkeyError::Init(format!("GetModuleHandleW: {}", e)))?;

        CLASS_REGISTERED.get_or_try_init(|| {
            let class = WNDCLASSEXW {
                cbSize: std::mem::size_of::<WNDCLASSEXW>() as u32,
                lpfnWndProc: Some(window_proc),
                hInstance: instance.into(),
                lpszClassName: class_name(),
                ..Default::default()
            };
            if unsafe { RegisterClassExW(&class) } == 0 {
                let e = WinError::from_win32();
                warn!(error = %e, "RegisterClassExW failed");
                return Err(HotkeyError::Init(format!("RegisterClassExW: {}", e)));
            }
            Ok(())
        })?;

        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                class_name(),
                w!("hotkey-manager"),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                HWND_MESSAGE,
                HMENU::default(),
                instance,
                None,
            )
        }
        .map_err(|e| HotkeyError::Init(format!("CreateWindowExW: {}", e)))?;

        let window = Rc::new(Self {
            hwnd,
            handler: RefCell::new(handler),
            closed: Cell::new(false),
            quit_on_close,
        });
        WINDOWS.with(|windows| {
            windows
                .borrow_mut()
                .insert(handle_key(hwnd), Rc::clone(&window))
        });

        debug!(hwnd = handle_key(hwnd), "message window created");
        Ok(window)
    }

    fn dispatch(&self, msg: u32, message: SinkMessage) {
        match self.handler.try_borrow_mut() {
            Ok(mut handler) => handler(self as &dyn SinkOps, message),
            // A nested loop inside a subscriber picked this up; retry wakes
            // once the outer dispatch has returned
            Err(_) if msg == WM_WAKE => {
                let _ = unsafe { PostMessageW(self.hwnd, WM_WAKE, WPARAM(0), LPARAM(0)) };
            }
            Err(_) => warn!(?message, "dropping re-entrant hotkey notification"),
        }
    }
}

fn lookup(hwnd: HWND) -> Option<Rc<MessageWindow>> {
    WINDOWS.with(|windows| windows.borrow().get(&handle_key(hwnd)).cloned())
}

fn forget(hwnd: HWND) -> Option<Rc<MessageWindow>> {
    WINDOWS.with(|windows| windows.borrow_mut().remove(&handle_key(hwnd)))
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_WAKE => {
            if let Some(window) = lookup(hwnd) {
                window.dispatch(msg, SinkMessage::Wake);
            }
            return LRESULT(0);
        }
        WM_HOTKEY => {
            if let Some(window) = lookup(hwnd) {
                let message = SinkMessage::Hotkey {
                    id: HotkeyId::from_raw(wparam.0 as i32),
                    param: lparam.0,
                };
                window.dispatch(msg, message);
            }
        }
        WM_WINDOWPOSCHANGING => {
            // Never let the window become visible
            let pos = lparam.0 as *mut WINDOWPOS;
            if !pos.is_null() {
                unsafe { (*pos).flags.0 &= !SWP_SHOWWINDOW.0 };
            }
        }
        WM_DESTROY => {
            if let Some(window) = forget(hwnd) {
                window.closed.set(true);
                if window.quit_on_close {
                    unsafe { PostQuitMessage(0) };
                }
            }
        }
        _ => {}
    }

    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

impl SinkOps for MessageWindow {
    fn register(&self, id: HotkeyId, hotkey: Hotkey) -> bool {
        let modifiers = HOT_KEY_MODIFIERS(u32::from(hotkey.modifiers.bits()));
        match unsafe { RegisterHotKey(self.hwnd, id.get(), modifiers, u32::from(hotkey.key.code())) } {
            Ok(()) => true,
            Err(e) => {
                debug!(%id, %hotkey, error = %e, "RegisterHotKey refused");
                false
            }
        }
    }

    fn unregister(&self, id: HotkeyId) -> bool {
        unsafe { UnregisterHotKey(self.hwnd, id.get()) }.is_ok()
    }

    fn set_visible(&self, visible: bool) {
        if visible {
            debug!(hwnd = handle_key(self.hwnd), "refusing to show message window");
        }
        let _ = unsafe { ShowWindow(self.hwnd, SW_HIDE) };
    }

    fn is_visible(&self) -> bool {
        unsafe { IsWindowVisible(self.hwnd) }.as_bool()
    }

    fn close(&self) {
        if self.closed.get() {
            return;
        }
        if let Err(e) = unsafe { DestroyWindow(self.hwnd) } {
            error!(error = %e, "DestroyWindow failed");
        }
        self.closed.set(true);
    }
}

impl Sink for MessageWindow {
    fn run(&self) {
        let mut msg = MSG::default();
        loop {
            let status = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
            if status.0 == 0 {
                break;
            }
            if status.0 < 0 {
                error!("GetMessageW failed, leaving message loop");
                break;
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            }
        }
    }

    fn pump(&self) -> usize {
        let mut msg = MSG::default();
        let mut processed = 0;
        while unsafe { PeekMessageW(&mut msg, self.hwnd, 0, 0, PM_REMOVE) }.as_bool() {
            unsafe {
                let _ = TranslateMessage(&msg);
                let _ = DispatchMessageW(&msg);
            }
            processed += 1;
        }
        processed
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(Win32Waker {
            hwnd: handle_key(self.hwnd),
        })
    }

    fn as_ops(&self) -> &dyn SinkOps {
        self
    }
}

/// Posts `WM_WAKE`; window handles are valid from any thread
struct Win32Waker {
    hwnd: isize,
}

impl Waker for Win32Waker {
    fn wake(&self) -> bool {
        let hwnd = HWND(self.hwnd as *mut _);
        unsafe { PostMessageW(hwnd, WM_WAKE, WPARAM(0), LPARAM(0)) }.is_ok()
    }
}
