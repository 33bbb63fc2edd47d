//! Toplevel window state machine and shell requests

use super::WindowId;
use crate::geometry::PixelSize;
use bitflags::bitflags;
use log::trace;

bitflags! {
    /// States named by an `xdg_toplevel.configure`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ToplevelStates: u32 {
        const MAXIMIZED = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const RESIZING = 1 << 2;
        const ACTIVATED = 1 << 3;
        const TILED_LEFT = 1 << 4;
        const TILED_RIGHT = 1 << 5;
        const TILED_TOP = 1 << 6;
        const TILED_BOTTOM = 1 << 7;
    }
}

impl ToplevelStates {
    /// Maps one `xdg_toplevel.state` wire value
    pub fn from_protocol(value: u32) -> Self {
        match value {
            1 => Self::MAXIMIZED,
            2 => Self::FULLSCREEN,
            3 => Self::RESIZING,
            4 => Self::ACTIVATED,
            5 => Self::TILED_LEFT,
            6 => Self::TILED_RIGHT,
            7 => Self::TILED_TOP,
            8 => Self::TILED_BOTTOM,
            _ => Self::empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum WindowState {
    #[default]
    Normal,
    Minimized,
    Maximized,
    FullScreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecorationMode {
    ClientSide,
    ServerSide,
}

/// Edge or corner grabbed for an interactive resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeEdge {
    Top,
    Bottom,
    Left,
    TopLeft,
    BottomLeft,
    Right,
    TopRight,
    BottomRight,
}

impl ResizeEdge {
    /// `xdg_toplevel.resize_edge` wire value
    pub fn protocol_value(self) -> u32 {
        match self {
            ResizeEdge::Top => 1,
            ResizeEdge::Bottom => 2,
            ResizeEdge::Left => 4,
            ResizeEdge::TopLeft => 5,
            ResizeEdge::BottomLeft => 6,
            ResizeEdge::Right => 8,
            ResizeEdge::TopRight => 9,
            ResizeEdge::BottomRight => 10,
        }
    }
}

/// Requests sent on a toplevel role object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToplevelRequest {
    SetTitle(String),
    SetAppId(String),
    /// A zero dimension lifts the limit
    SetMinSize(PixelSize),
    SetMaxSize(PixelSize),
    SetMaximized,
    UnsetMaximized,
    SetFullscreen,
    UnsetFullscreen,
    SetMinimized,
    Move { serial: u32 },
    Resize { serial: u32, edge: ResizeEdge },
    SetParent(Option<WindowId>),
    SetDecorationMode(DecorationMode),
}

/// Everything the backend needs to give a surface the toplevel role
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToplevelSetup {
    pub title: String,
    pub app_id: Option<String>,
    pub parent: Option<WindowId>,
    /// Requested mode; `None` when no decoration manager is bound
    pub decorations: Option<DecorationMode>,
    /// Export the toplevel for cross-client handles
    pub export: bool,
}

/// Observable effect of one configure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateChange {
    pub state: Option<WindowState>,
    pub activated: Option<bool>,
}

impl StateChange {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.activated.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ToplevelStateMachine {
    state: WindowState,
    restore: WindowState,
    active: bool,
    configured: bool,
}

impl Default for ToplevelStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ToplevelStateMachine {
    pub fn new() -> Self {
        Self {
            state: WindowState::Normal,
            restore: WindowState::Normal,
            active: false,
            configured: false,
        }
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    /// State to return to when a minimized window is activated again
    pub fn restore_state(&self) -> WindowState {
        self.restore
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    fn minimize(&mut self) {
        if self.state != WindowState::Minimized {
            self.restore = self.state;
            self.state = WindowState::Minimized;
        }
    }

    /// Applies the full state set of a configure
    pub fn configure(&mut self, states: ToplevelStates) -> StateChange {
        let before = (self.state, self.active);
        self.configured = true;

        if states.is_empty() && self.active {
            // Compositors hide minimized windows by dropping every state
            self.minimize();
            self.active = false;
        } else {
            self.active = states.contains(ToplevelStates::ACTIVATED);
            self.state = if states.contains(ToplevelStates::FULLSCREEN) {
                WindowState::FullScreen
            } else if states.contains(ToplevelStates::MAXIMIZED) {
                WindowState::Maximized
            } else if self.state == WindowState::Minimized {
                if self.active {
                    self.restore
                } else {
                    WindowState::Minimized
                }
            } else {
                WindowState::Normal
            };
        }

        trace!("Toplevel states {:?} -> {:?} (active: {})", states, self.state, self.active);
        StateChange {
            state: (self.state != before.0).then_some(self.state),
            activated: (self.active != before.1).then_some(self.active),
        }
    }

    /// Requests that move the compositor toward `target`
    ///
    /// Minimizing has no compositor confirmation, so it takes effect locally.
    pub fn request(&mut self, target: WindowState) -> (Vec<ToplevelRequest>, StateChange) {
        let mut requests = Vec::new();
        let mut change = StateChange::default();
        match target {
            WindowState::Minimized => {
                requests.push(ToplevelRequest::SetMinimized);
                if self.state != WindowState::Minimized {
                    self.minimize();
                    change.state = Some(WindowState::Minimized);
                }
            }
            WindowState::Maximized => {
                if self.state == WindowState::FullScreen {
                    requests.push(ToplevelRequest::UnsetFullscreen);
                }
                requests.push(ToplevelRequest::SetMaximized);
            }
            WindowState::FullScreen => requests.push(ToplevelRequest::SetFullscreen),
            WindowState::Normal => match self.state {
                WindowState::FullScreen => requests.push(ToplevelRequest::UnsetFullscreen),
                WindowState::Maximized => requests.push(ToplevelRequest::UnsetMaximized),
                _ => {}
            },
        }
        (requests, change)
    }
}
