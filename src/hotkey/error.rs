/// Errors that can occur while running the hotkey manager
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("failed to create notification window: {0}")]
    Init(String),

    #[error("failed to spawn message loop thread: {0}")]
    ThreadSpawn(String),

    #[error("hotkey manager has been shut down")]
    Closed,

    #[error("message loop thread exited before replying")]
    LoopGone,

    #[error("operation must run on the thread that owns the message loop")]
    WrongThread,

    #[error("invalid hotkey: {0}")]
    Parse(String),
}
