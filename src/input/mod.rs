//! Input device state machine
//!
//! One [`InputDevice`] per seat. It tracks capabilities, focus, pointer
//! position, modifier and button state, and the serials later requests
//! need. Raw seat events go in; toolkit [`InputEvent`]s routed to a window
//! come out, together with instructions for the key-repeat timer and the
//! cursor surface. The device never talks to the compositor itself.

pub mod cursor;
pub mod keymap;
pub mod text_input;

use crate::geometry::{Point, Vector};
use crate::window::WindowId;
use bitflags::bitflags;
use cursor::{Cursor, CursorCommand, CursorPresenter};
use keymap::{KeyboardLayout, XkbKeyboard, EVDEV_OFFSET};
use log::{debug, trace, warn};
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::time::Duration;

bitflags! {
    /// Keyboard modifiers and held pointer buttons
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const CONTROL = 1 << 0;
        const ALT = 1 << 1;
        const SHIFT = 1 << 2;
        const META = 1 << 3;
        const LEFT_BUTTON = 1 << 4;
        const RIGHT_BUTTON = 1 << 5;
        const MIDDLE_BUTTON = 1 << 6;
        const XBUTTON1 = 1 << 7;
        const XBUTTON2 = 1 << 8;
    }
}

impl Modifiers {
    pub const KEYBOARD: Modifiers = Modifiers::CONTROL
        .union(Modifiers::ALT)
        .union(Modifiers::SHIFT)
        .union(Modifiers::META);
}

bitflags! {
    /// Seat capabilities as announced by the compositor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u32 {
        const POINTER = 1;
        const KEYBOARD = 2;
        const TOUCH = 4;
    }
}

/// Linux evdev button codes
pub mod buttons {
    pub const BTN_LEFT: u32 = 0x110;
    pub const BTN_RIGHT: u32 = 0x111;
    pub const BTN_MIDDLE: u32 = 0x112;
    pub const BTN_SIDE: u32 = 0x113;
    pub const BTN_EXTRA: u32 = 0x114;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    XButton1,
    XButton2,
}

impl MouseButton {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            buttons::BTN_LEFT => Some(MouseButton::Left),
            buttons::BTN_RIGHT => Some(MouseButton::Right),
            buttons::BTN_MIDDLE => Some(MouseButton::Middle),
            buttons::BTN_SIDE => Some(MouseButton::XButton2),
            buttons::BTN_EXTRA => Some(MouseButton::XButton1),
            _ => None,
        }
    }

    fn modifier(self) -> Modifiers {
        match self {
            MouseButton::Left => Modifiers::LEFT_BUTTON,
            MouseButton::Right => Modifiers::RIGHT_BUTTON,
            MouseButton::Middle => Modifiers::MIDDLE_BUTTON,
            MouseButton::XButton1 => Modifiers::XBUTTON1,
            MouseButton::XButton2 => Modifiers::XBUTTON2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEventKind {
    Move,
    LeaveWindow,
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Magnify,
    Rotate,
    Swipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEventKind {
    Begin,
    Update,
    End,
    Cancel,
}

/// Toolkit-facing input event
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Pointer {
        kind: PointerEventKind,
        position: Point,
        modifiers: Modifiers,
        time: u32,
    },
    Wheel {
        position: Point,
        delta: Vector,
        modifiers: Modifiers,
        time: u32,
    },
    Gesture {
        kind: GestureKind,
        position: Point,
        delta: Vector,
        modifiers: Modifiers,
        time: u32,
    },
    Key {
        pressed: bool,
        keysym: u32,
        modifiers: Modifiers,
        time: u32,
    },
    Text {
        text: String,
        time: u32,
    },
    /// Composition text from the input method; empty clears it
    Preedit {
        text: String,
        /// Byte range of the cursor, `None` when hidden
        cursor: Option<(usize, usize)>,
    },
    Touch {
        kind: TouchEventKind,
        id: i32,
        position: Point,
        modifiers: Modifiers,
        time: u32,
    },
}

/// An input event addressed to a window
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub window: WindowId,
    pub event: InputEvent,
}

/// Instruction for the key-repeat timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatCommand {
    #[default]
    Keep,
    /// Replace the repeat timer with one firing at this interval
    Arm(Duration),
    Stop,
}

#[derive(Debug, Default)]
pub struct KeyOutcome {
    pub events: Vec<Routed>,
    pub repeat: RepeatCommand,
}

/// Sub-devices to create and release after a capability change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityDelta {
    pub added: Capabilities,
    pub removed: Capabilities,
}

#[derive(Debug, Clone, Copy)]
struct RepeatState {
    keycode: u32,
    keysym: u32,
    time: u32,
    first: bool,
}

/// Constructs the layout engine when a keyboard appears
pub type LayoutFactory = Box<dyn Fn() -> Box<dyn KeyboardLayout>>;

/// Tunables for translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSettings {
    pub scroll_factor: f64,
    pub natural_scrolling: bool,
    pub repeat_delay: Duration,
    /// `None` disables repeat
    pub repeat_interval: Option<Duration>,
}

impl InputSettings {
    pub fn from_config(config: &crate::config::InputConfig) -> Self {
        Self {
            scroll_factor: config.scroll_factor,
            natural_scrolling: config.natural_scrolling,
            repeat_delay: Duration::from_millis(config.keyboard_repeat_delay as u64),
            repeat_interval: repeat_interval(config.keyboard_repeat_rate as i32),
        }
    }
}

impl Default for InputSettings {
    fn default() -> Self {
        Self::from_config(&crate::config::InputConfig::default())
    }
}

fn repeat_interval(rate: i32) -> Option<Duration> {
    (rate > 0).then(|| Duration::from_secs_f64(1.0 / rate as f64))
}

const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);

pub struct InputDevice {
    settings: InputSettings,
    capabilities: Capabilities,
    layout_factory: LayoutFactory,
    layout: Option<Box<dyn KeyboardLayout>>,

    modifiers: Modifiers,
    pointer_position: Point,
    pointer_focus: Option<WindowId>,
    keyboard_focus: Option<WindowId>,
    touch_focus: Option<WindowId>,
    touch_id: Option<i32>,
    touch_position: Point,

    pointer_enter_serial: u32,
    keyboard_enter_serial: u32,
    last_serial: u32,

    repeat: Option<RepeatState>,
    cursor: CursorPresenter,
}

impl InputDevice {
    pub fn new(settings: InputSettings) -> Self {
        Self::with_layout_factory(settings, Box::new(|| Box::new(XkbKeyboard::new())))
    }

    pub fn with_layout_factory(settings: InputSettings, layout_factory: LayoutFactory) -> Self {
        Self {
            settings,
            capabilities: Capabilities::empty(),
            layout_factory,
            layout: None,
            modifiers: Modifiers::empty(),
            pointer_position: Point::default(),
            pointer_focus: None,
            keyboard_focus: None,
            touch_focus: None,
            touch_id: None,
            touch_position: Point::default(),
            pointer_enter_serial: 0,
            keyboard_enter_serial: 0,
            last_serial: 0,
            repeat: None,
            cursor: CursorPresenter::default(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn pointer_position(&self) -> Point {
        self.pointer_position
    }

    pub fn pointer_focus(&self) -> Option<WindowId> {
        self.pointer_focus
    }

    pub fn keyboard_focus(&self) -> Option<WindowId> {
        self.keyboard_focus
    }

    /// Serial of the last pointer enter, required for cursor requests
    pub fn pointer_enter_serial(&self) -> u32 {
        self.pointer_enter_serial
    }

    /// Serial of the last keyboard enter, required for selection requests
    pub fn keyboard_enter_serial(&self) -> u32 {
        self.keyboard_enter_serial
    }

    /// Serial of the last input event, required for grabs, moves and drags
    pub fn last_serial(&self) -> u32 {
        self.last_serial
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat.is_some()
    }

    // Seat

    pub fn set_capabilities(&mut self, capabilities: Capabilities) -> CapabilityDelta {
        let delta = CapabilityDelta {
            added: capabilities - self.capabilities,
            removed: self.capabilities - capabilities,
        };
        self.capabilities = capabilities;

        if delta.added.contains(Capabilities::KEYBOARD) {
            self.layout = Some((self.layout_factory)());
        }
        if delta.removed.contains(Capabilities::KEYBOARD) {
            self.layout = None;
            self.keyboard_focus = None;
            self.repeat = None;
        }
        if delta.removed.contains(Capabilities::POINTER) {
            self.pointer_focus = None;
            self.modifiers -= Modifiers::KEYBOARD.complement();
        }
        if delta.removed.contains(Capabilities::TOUCH) {
            self.touch_focus = None;
            self.touch_id = None;
        }

        if !delta.added.is_empty() || !delta.removed.is_empty() {
            debug!("🎮 Seat capabilities now {:?} ({:?})", capabilities, delta);
        }
        delta
    }

    /// Drops every reference to a window that is going away
    pub fn forget_window(&mut self, window: WindowId) {
        if self.pointer_focus == Some(window) {
            self.pointer_focus = None;
        }
        if self.keyboard_focus == Some(window) {
            self.keyboard_focus = None;
            self.repeat = None;
        }
        if self.touch_focus == Some(window) {
            self.touch_focus = None;
            self.touch_id = None;
        }
    }

    // Pointer

    fn pointer_event(&self, kind: PointerEventKind, time: u32) -> Option<Routed> {
        Some(Routed {
            window: self.pointer_focus?,
            event: InputEvent::Pointer {
                kind,
                position: self.pointer_position,
                modifiers: self.modifiers,
                time,
            },
        })
    }

    pub fn pointer_enter(&mut self, serial: u32, window: Option<WindowId>, position: Point) -> Option<Routed> {
        self.pointer_enter_serial = serial;
        self.pointer_focus = window;
        self.pointer_position = position;
        self.pointer_event(PointerEventKind::Move, 0)
    }

    pub fn pointer_leave(&mut self, serial: u32) -> Option<Routed> {
        self.pointer_enter_serial = serial;
        let event = self.pointer_event(PointerEventKind::LeaveWindow, 0);
        self.pointer_focus = None;
        event
    }

    pub fn pointer_motion(&mut self, time: u32, position: Point) -> Option<Routed> {
        self.pointer_position = position;
        self.pointer_event(PointerEventKind::Move, time)
    }

    pub fn pointer_button(&mut self, serial: u32, time: u32, code: u32, pressed: bool) -> Option<Routed> {
        self.last_serial = serial;
        let Some(button) = MouseButton::from_code(code) else {
            trace!("Ignoring pointer button {:#x}", code);
            return None;
        };

        // The event carries the button state from before this transition
        let kind = if pressed {
            PointerEventKind::ButtonDown(button)
        } else {
            PointerEventKind::ButtonUp(button)
        };
        let event = self.pointer_event(kind, time);
        self.modifiers.set(button.modifier(), pressed);
        event
    }

    pub fn pointer_axis(&mut self, time: u32, axis: ScrollAxis, value: f64) -> Option<Routed> {
        let mut amount = value * self.settings.scroll_factor;
        if self.settings.natural_scrolling {
            amount = -amount;
        }
        let delta = match axis {
            ScrollAxis::Horizontal => Vector::new(amount, 0.0),
            ScrollAxis::Vertical => Vector::new(0.0, amount),
        };
        Some(Routed {
            window: self.pointer_focus?,
            event: InputEvent::Wheel {
                position: self.pointer_position,
                delta,
                modifiers: self.modifiers,
                time,
            },
        })
    }

    // Gestures

    pub fn gesture_begin(&mut self, serial: u32, window: Option<WindowId>) {
        self.last_serial = serial;
        if window.is_some() {
            self.pointer_focus = window;
        }
    }

    pub fn gesture_end(&mut self, serial: u32) {
        self.last_serial = serial;
    }

    fn gesture_event(&self, kind: GestureKind, delta: Vector, time: u32) -> Option<Routed> {
        Some(Routed {
            window: self.pointer_focus?,
            event: InputEvent::Gesture {
                kind,
                position: self.pointer_position,
                delta,
                modifiers: self.modifiers,
                time,
            },
        })
    }

    /// Pinch update; `rotation` is in degrees
    pub fn pinch_update(&mut self, time: u32, dx: f64, dy: f64, rotation: f64) -> Vec<Routed> {
        let mut events = Vec::new();
        let magnify = Vector::new(dx, dy);
        if !magnify.is_zero() {
            events.extend(self.gesture_event(GestureKind::Magnify, magnify, time));
        }
        let radians = rotation.to_radians();
        if radians != 0.0 {
            let rotate = Vector::new(radians.cos(), radians.sin());
            events.extend(self.gesture_event(GestureKind::Rotate, rotate, time));
        }
        events
    }

    pub fn swipe_update(&mut self, time: u32, dx: f64, dy: f64) -> Option<Routed> {
        self.gesture_event(GestureKind::Swipe, Vector::new(dx, dy), time)
    }

    // Keyboard

    /// Hands the compositor's keymap to the layout engine
    pub fn keymap(&mut self, fd: OwnedFd, size: u32) {
        let Some(layout) = self.layout.as_mut() else {
            debug!("Keymap received without a keyboard");
            return;
        };
        if let Err(err) = layout.load_keymap(fd, size) {
            warn!("⚠️ Keymap not applied: {}", err);
        }
    }

    pub fn keyboard_enter(&mut self, serial: u32, window: Option<WindowId>) {
        self.last_serial = serial;
        self.keyboard_enter_serial = serial;
        self.keyboard_focus = window;
    }

    pub fn keyboard_leave(&mut self, serial: u32) -> RepeatCommand {
        self.last_serial = serial;
        self.keyboard_focus = None;
        self.stop_repeat()
    }

    pub fn repeat_info(&mut self, rate: i32, delay: i32) {
        self.settings.repeat_interval = repeat_interval(rate);
        self.settings.repeat_delay = Duration::from_millis(delay.max(0) as u64);
        debug!(
            "⌨️ Key repeat: delay {:?}, interval {:?}",
            self.settings.repeat_delay, self.settings.repeat_interval
        );
    }

    fn stop_repeat(&mut self) -> RepeatCommand {
        match self.repeat.take() {
            Some(_) => RepeatCommand::Stop,
            None => RepeatCommand::Keep,
        }
    }

    /// Key-down plus any composed text for one press (or repeat)
    fn key_down_events(&mut self, window: WindowId, keysym: u32, keycode: u32, time: u32) -> Vec<Routed> {
        let mut events = vec![Routed {
            window,
            event: InputEvent::Key {
                pressed: true,
                keysym,
                modifiers: self.modifiers,
                time,
            },
        }];
        if let Some(text) = self
            .layout
            .as_mut()
            .and_then(|layout| layout.compose_text(keysym, keycode))
        {
            events.push(Routed {
                window,
                event: InputEvent::Text { text, time },
            });
        }
        events
    }

    pub fn key(&mut self, serial: u32, time: u32, key: u32, pressed: bool) -> KeyOutcome {
        self.last_serial = serial;
        let keycode = key + EVDEV_OFFSET;

        let Some(window) = self.keyboard_focus else {
            return KeyOutcome::default();
        };
        let Some(keysym) = self
            .layout
            .as_ref()
            .filter(|layout| layout.is_ready())
            .and_then(|layout| layout.keysym(keycode))
        else {
            return KeyOutcome::default();
        };

        if !pressed {
            let repeat = match self.repeat {
                Some(state) if state.keycode == keycode => self.stop_repeat(),
                _ => RepeatCommand::Keep,
            };
            return KeyOutcome {
                events: vec![Routed {
                    window,
                    event: InputEvent::Key {
                        pressed: false,
                        keysym,
                        modifiers: self.modifiers,
                        time,
                    },
                }],
                repeat,
            };
        }

        let events = self.key_down_events(window, keysym, keycode, time);
        let repeats = self
            .layout
            .as_ref()
            .is_some_and(|layout| layout.key_repeats(keycode));

        let repeat = match self.settings.repeat_interval {
            Some(_) if repeats => {
                self.repeat = Some(RepeatState {
                    keycode,
                    keysym,
                    time,
                    first: true,
                });
                RepeatCommand::Arm(self.settings.repeat_delay.max(MIN_TIMER_INTERVAL))
            }
            _ => self.stop_repeat(),
        };

        KeyOutcome { events, repeat }
    }

    /// Called when the repeat timer fires
    pub fn repeat_tick(&mut self) -> KeyOutcome {
        let Some(state) = self.repeat else {
            return KeyOutcome {
                events: Vec::new(),
                repeat: RepeatCommand::Stop,
            };
        };
        let Some(window) = self.keyboard_focus else {
            return KeyOutcome {
                events: Vec::new(),
                repeat: self.stop_repeat(),
            };
        };

        let events = self.key_down_events(window, state.keysym, state.keycode, state.time);
        let repeat = match (state.first, self.settings.repeat_interval) {
            (true, Some(interval)) => {
                self.repeat = Some(RepeatState {
                    first: false,
                    ..state
                });
                RepeatCommand::Arm(interval.max(MIN_TIMER_INTERVAL))
            }
            (_, None) => self.stop_repeat(),
            (false, Some(_)) => RepeatCommand::Keep,
        };
        KeyOutcome { events, repeat }
    }

    pub fn modifiers_changed(&mut self, serial: u32, depressed: u32, latched: u32, locked: u32, group: u32) {
        self.last_serial = serial;
        let keyboard = match self.layout.as_mut() {
            Some(layout) => layout.update_modifiers(depressed, latched, locked, group),
            None => Modifiers::empty(),
        };
        self.modifiers = (self.modifiers - Modifiers::KEYBOARD) | keyboard;
    }

    // Touch

    fn touch_event(&self, kind: TouchEventKind, id: i32, time: u32) -> Option<Routed> {
        Some(Routed {
            window: self.touch_focus?,
            event: InputEvent::Touch {
                kind,
                id,
                position: self.touch_position,
                modifiers: self.modifiers,
                time,
            },
        })
    }

    pub fn touch_down(&mut self, serial: u32, time: u32, window: Option<WindowId>, id: i32, position: Point) -> Option<Routed> {
        self.last_serial = serial;
        self.touch_id = Some(id);
        self.touch_focus = window;
        self.touch_position = position;
        self.touch_event(TouchEventKind::Begin, id, time)
    }

    pub fn touch_up(&mut self, serial: u32, time: u32, id: i32) -> Option<Routed> {
        self.last_serial = serial;
        self.touch_id = Some(id);
        self.touch_event(TouchEventKind::End, id, time)
    }

    pub fn touch_motion(&mut self, time: u32, id: i32, position: Point) -> Option<Routed> {
        self.touch_id = Some(id);
        self.touch_position = position;
        self.touch_event(TouchEventKind::Update, id, time)
    }

    pub fn touch_cancel(&mut self) -> Option<Routed> {
        let id = self.touch_id.take()?;
        self.touch_event(TouchEventKind::Cancel, id, 0)
    }

    // Cursor

    /// Presents `cursor`, or the arrow from `arrow` when `None`
    pub fn set_cursor(
        &mut self,
        cursor: Option<Rc<Cursor>>,
        arrow: impl FnOnce() -> Option<Rc<Cursor>>,
    ) -> Vec<CursorCommand> {
        if !self.capabilities.contains(Capabilities::POINTER) {
            return Vec::new();
        }
        match cursor.or_else(arrow) {
            Some(cursor) => self.cursor.set(cursor),
            None => Vec::new(),
        }
    }

    pub fn cursor_tick(&mut self) -> Vec<CursorCommand> {
        self.cursor.tick()
    }

    pub fn current_cursor_image(&self) -> Option<cursor::CursorImage> {
        self.cursor.current_image()
    }

    pub fn clear_cursor(&mut self) -> Vec<CursorCommand> {
        self.cursor.clear()
    }
}

impl std::fmt::Debug for InputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDevice")
            .field("capabilities", &self.capabilities)
            .field("modifiers", &self.modifiers)
            .field("pointer_focus", &self.pointer_focus)
            .field("keyboard_focus", &self.keyboard_focus)
            .field("repeat", &self.repeat)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests;
