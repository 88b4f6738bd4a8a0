//! Typed signals broadcast through the bus.

use std::fmt;

/// Legacy window commands carried by `cmd:` IPC messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpcCommand {
    Show,
    Hide,
    Toggle,
    Quit,
    Restart,
}

impl IpcCommand {
    pub fn parse(cmd: &str) -> Option<Self> {
        match cmd {
            "show" => Some(IpcCommand::Show),
            "hide" => Some(IpcCommand::Hide),
            "toggle" => Some(IpcCommand::Toggle),
            "quit" => Some(IpcCommand::Quit),
            "restart" => Some(IpcCommand::Restart),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IpcCommand::Show => "show",
            IpcCommand::Hide => "hide",
            IpcCommand::Toggle => "toggle",
            IpcCommand::Quit => "quit",
            IpcCommand::Restart => "restart",
        }
    }
}

/// A signal delivered to bus subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Tear the run down and rebuild it from fresh configuration.
    ExitReload,
    NotifyChange,
    NotifyForceChange,
    /// Quit if no module is still running.
    CheckState,
    IpcAction(String),
    IpcCommand(IpcCommand),
    IpcHook { module: String, index: usize },
    UiReady,
    /// Raw action string attached to the clicked area.
    UiButtonPress(String),
    UiUpdateBackground,
}

/// Payload-free tag of a [`Signal`], used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignalKind {
    ExitReload,
    NotifyChange,
    NotifyForceChange,
    CheckState,
    IpcAction,
    IpcCommand,
    IpcHook,
    UiReady,
    UiButtonPress,
    UiUpdateBackground,
}

impl SignalKind {
    pub const ALL: [SignalKind; 10] = [
        SignalKind::ExitReload,
        SignalKind::NotifyChange,
        SignalKind::NotifyForceChange,
        SignalKind::CheckState,
        SignalKind::IpcAction,
        SignalKind::IpcCommand,
        SignalKind::IpcHook,
        SignalKind::UiReady,
        SignalKind::UiButtonPress,
        SignalKind::UiUpdateBackground,
    ];
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::ExitReload => SignalKind::ExitReload,
            Signal::NotifyChange => SignalKind::NotifyChange,
            Signal::NotifyForceChange => SignalKind::NotifyForceChange,
            Signal::CheckState => SignalKind::CheckState,
            Signal::IpcAction(_) => SignalKind::IpcAction,
            Signal::IpcCommand(_) => SignalKind::IpcCommand,
            Signal::IpcHook { .. } => SignalKind::IpcHook,
            Signal::UiReady => SignalKind::UiReady,
            Signal::UiButtonPress(_) => SignalKind::UiButtonPress,
            Signal::UiUpdateBackground => SignalKind::UiUpdateBackground,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::ExitReload => "exit_reload",
            SignalKind::NotifyChange => "notify_change",
            SignalKind::NotifyForceChange => "notify_forcechange",
            SignalKind::CheckState => "check_state",
            SignalKind::IpcAction => "ipc_action",
            SignalKind::IpcCommand => "ipc_command",
            SignalKind::IpcHook => "ipc_hook",
            SignalKind::UiReady => "ui_ready",
            SignalKind::UiButtonPress => "ui_button_press",
            SignalKind::UiUpdateBackground => "ui_update_background",
        };
        f.write_str(name)
    }
}
