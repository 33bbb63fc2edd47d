//! Protocol events, one enum per protocol object family
//!
//! The backend translates wire events into these and hands them to the
//! matching `Platform` handler.

use crate::clipboard::{DndAction, OfferId};
use crate::geometry::{PixelRect, PixelSize, Point};
use crate::input::{Capabilities, ScrollAxis};
use crate::window::{DecorationMode, ToplevelStates, WindowId};
use std::os::fd::OwnedFd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Global { name: u32, interface: String, version: u32 },
    GlobalRemove { name: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatEvent {
    Capabilities(Capabilities),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// `surface` is `None` when it belongs to no window of ours
    Enter { serial: u32, surface: Option<WindowId>, position: Point },
    Leave { serial: u32 },
    Motion { time: u32, position: Point },
    Button { serial: u32, time: u32, button: u32, pressed: bool },
    Axis { time: u32, axis: ScrollAxis, value: f64 },
}

#[derive(Debug)]
pub enum KeyboardEvent {
    Keymap { fd: OwnedFd, size: u32 },
    Enter { serial: u32, surface: Option<WindowId> },
    Leave { serial: u32 },
    Key { serial: u32, time: u32, key: u32, pressed: bool },
    Modifiers { serial: u32, depressed: u32, latched: u32, locked: u32, group: u32 },
    RepeatInfo { rate: i32, delay: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    Down { serial: u32, time: u32, surface: Option<WindowId>, id: i32, position: Point },
    Up { serial: u32, time: u32, id: i32 },
    Motion { time: u32, id: i32, position: Point },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureEvent {
    PinchBegin { serial: u32, surface: Option<WindowId> },
    /// `rotation` is the delta in degrees since the previous update
    PinchUpdate { time: u32, dx: f64, dy: f64, scale: f64, rotation: f64 },
    PinchEnd { serial: u32 },
    SwipeBegin { serial: u32, surface: Option<WindowId> },
    SwipeUpdate { time: u32, dx: f64, dy: f64 },
    SwipeEnd { serial: u32 },
}

/// Events of the seat's text input; applied together on `Done`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextInputEvent {
    Enter { surface: Option<WindowId> },
    Leave,
    PreeditString { text: Option<String>, cursor_begin: i32, cursor_end: i32 },
    CommitString { text: Option<String> },
    DeleteSurroundingText { before_length: u32, after_length: u32 },
    Done { serial: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Geometry { x: i32, y: i32 },
    Mode { width: i32, height: i32, current: bool, preferred: bool },
    Scale(i32),
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataDeviceEvent {
    DataOffer(OfferId),
    Offer { offer: OfferId, mime_type: String },
    SourceActions { offer: OfferId, actions: DndAction },
    Action { offer: OfferId, action: DndAction },
    Selection(Option<OfferId>),
    Enter { serial: u32, surface: Option<WindowId>, position: Point, offer: Option<OfferId> },
    Motion { time: u32, position: Point },
    Leave,
    Drop,
}

/// Events on a window's surface, role, and companion objects
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Enter { output: u32 },
    Leave { output: u32 },
    /// `xdg_surface.configure`
    Configure { serial: u32 },
    /// `size` is `None` when the compositor leaves the size to the client
    ToplevelConfigure { size: Option<PixelSize>, states: ToplevelStates },
    ToplevelClose,
    PopupConfigure { rect: PixelRect },
    PopupDone,
    Repositioned { token: u32 },
    FrameDone { time: u32 },
    DecorationConfigure(DecorationMode),
    Exported(String),
}
