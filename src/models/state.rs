//! Lifecycle of a single language server instance

use serde::Serialize;

/// `NotStarted → Starting → Initializing → Ready → {Crashed, ShuttingDown} → Stopped`
///
/// Any live state may move to `Crashed` when the process exits on its own.
/// `Crashed` and `Stopped` are terminal for an instance; a later
/// `ensure_servers` replaces it with a fresh one. There is no
/// `Crashed → Stopped` edge: shutting down a crashed instance only removes
/// it from the registry and leaves its state at `Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ServerState {
    NotStarted = 0,
    Starting = 1,
    Initializing = 2,
    Ready = 3,
    Crashed = 4,
    ShuttingDown = 5,
    Stopped = 6,
}

impl ServerState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Initializing,
            3 => Self::Ready,
            4 => Self::Crashed,
            5 => Self::ShuttingDown,
            6 => Self::Stopped,
            _ => Self::NotStarted,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// The process is gone (or going) and the instance must be replaced.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Crashed | Self::Stopped)
    }

    pub fn is_alive(self) -> bool {
        matches!(self, Self::Starting | Self::Initializing | Self::Ready)
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        match (self, next) {
            (NotStarted, Starting) => true,
            (Starting, Initializing) => true,
            (Initializing, Ready) => true,
            (Ready, ShuttingDown) => true,
            (Starting | Initializing, ShuttingDown) => true,
            (ShuttingDown, Stopped) => true,
            (NotStarted | Starting | Initializing | Ready, Crashed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Crashed => "crashed",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
