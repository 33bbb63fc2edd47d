//! Unit tests for the input device state machine
//!
//! A table-driven keyboard layout replaces xkbcommon so key handling can be
//! checked without keymap data installed.

use super::keymap::printable_text;
use super::*;
use crate::error::Result;
use crate::input::cursor::{CursorBuffer, CursorImage};
use crate::geometry::{PixelPoint, PixelSize};
use std::collections::HashMap;
use std::os::fd::OwnedFd;

pub(crate) const KEY_A: u32 = 30;
pub(crate) const KEY_ENTER: u32 = 28;
pub(crate) const KEY_LEFTSHIFT: u32 = 42;
pub(crate) const KEYSYM_A: u32 = 0x61;

/// Keyboard layout backed by a fixed table of evdev keys
#[derive(Debug, Clone)]
pub(crate) struct FakeLayout {
    /// xkb keycode -> (keysym, utf8, repeats)
    keys: HashMap<u32, (u32, &'static str, bool)>,
    pub keymaps_loaded: usize,
}

impl FakeLayout {
    pub(crate) fn us() -> Self {
        let mut keys = HashMap::new();
        keys.insert(KEY_A + 8, (KEYSYM_A, "a", true));
        keys.insert(KEY_ENTER + 8, (0xff0d, "\r", true));
        keys.insert(KEY_LEFTSHIFT + 8, (0xffe1, "", false));
        Self {
            keys,
            keymaps_loaded: 0,
        }
    }

    pub(crate) fn factory() -> LayoutFactory {
        Box::new(|| Box::new(FakeLayout::us()))
    }
}

impl KeyboardLayout for FakeLayout {
    fn load_keymap(&mut self, _fd: OwnedFd, _size: u32) -> Result<()> {
        self.keymaps_loaded += 1;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn keysym(&self, keycode: u32) -> Option<u32> {
        self.keys.get(&keycode).map(|(sym, _, _)| *sym)
    }

    fn key_repeats(&self, keycode: u32) -> bool {
        self.keys.get(&keycode).is_some_and(|(_, _, repeats)| *repeats)
    }

    fn update_modifiers(&mut self, depressed: u32, _latched: u32, _locked: u32, _group: u32) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        modifiers.set(Modifiers::SHIFT, depressed & 0x1 != 0);
        modifiers.set(Modifiers::CONTROL, depressed & 0x4 != 0);
        modifiers
    }

    fn compose_text(&mut self, _keysym: u32, keycode: u32) -> Option<String> {
        self.keys
            .get(&keycode)
            .and_then(|(_, text, _)| printable_text(text.to_string()))
    }
}

const WINDOW: WindowId = WindowId(1);

fn device() -> InputDevice {
    let settings = InputSettings {
        scroll_factor: 0.1,
        natural_scrolling: true,
        repeat_delay: Duration::from_millis(600),
        repeat_interval: Some(Duration::from_millis(40)),
    };
    let mut device = InputDevice::with_layout_factory(settings, FakeLayout::factory());
    device.set_capabilities(Capabilities::POINTER | Capabilities::KEYBOARD);
    device
}

fn kinds(events: &[Routed]) -> Vec<&InputEvent> {
    events.iter().map(|routed| &routed.event).collect()
}

#[test]
fn test_pointer_enter_motion_press_sequence() {
    let mut device = device();

    let enter = device.pointer_enter(5, Some(WINDOW), Point::new(10.0, 20.0)).unwrap();
    let motion = device.pointer_motion(100, Point::new(15.0, 20.0)).unwrap();
    let press = device
        .pointer_button(6, 101, buttons::BTN_LEFT, true)
        .unwrap();

    assert_eq!(
        enter.event,
        InputEvent::Pointer {
            kind: PointerEventKind::Move,
            position: Point::new(10.0, 20.0),
            modifiers: Modifiers::empty(),
            time: 0,
        }
    );
    assert_eq!(
        motion.event,
        InputEvent::Pointer {
            kind: PointerEventKind::Move,
            position: Point::new(15.0, 20.0),
            modifiers: Modifiers::empty(),
            time: 100,
        }
    );
    assert_eq!(
        press.event,
        InputEvent::Pointer {
            kind: PointerEventKind::ButtonDown(MouseButton::Left),
            position: Point::new(15.0, 20.0),
            modifiers: Modifiers::empty(),
            time: 101,
        }
    );
    assert_eq!(device.modifiers(), Modifiers::LEFT_BUTTON);
    assert_eq!(device.pointer_enter_serial(), 5);
    assert_eq!(device.last_serial(), 6);
}

#[test]
fn test_button_mapping_and_running_mask() {
    let mut device = device();
    device.pointer_enter(1, Some(WINDOW), Point::default());

    device.pointer_button(2, 0, buttons::BTN_SIDE, true);
    device.pointer_button(3, 0, buttons::BTN_EXTRA, true);
    assert_eq!(device.modifiers(), Modifiers::XBUTTON2 | Modifiers::XBUTTON1);

    let release = device.pointer_button(4, 0, buttons::BTN_SIDE, false).unwrap();
    match release.event {
        InputEvent::Pointer { kind, modifiers, .. } => {
            assert_eq!(kind, PointerEventKind::ButtonUp(MouseButton::XButton2));
            assert!(modifiers.contains(Modifiers::XBUTTON2));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(device.modifiers(), Modifiers::XBUTTON1);

    // Unknown buttons are dropped but still consume the serial
    assert!(device.pointer_button(9, 0, 0x115, true).is_none());
    assert_eq!(device.last_serial(), 9);
}

#[test]
fn test_scroll_is_scaled_and_inverted() {
    let mut device = device();
    device.pointer_enter(1, Some(WINDOW), Point::default());

    let vertical = device.pointer_axis(0, ScrollAxis::Vertical, 10.0).unwrap();
    let horizontal = device.pointer_axis(0, ScrollAxis::Horizontal, -5.0).unwrap();

    match (vertical.event, horizontal.event) {
        (InputEvent::Wheel { delta: v, .. }, InputEvent::Wheel { delta: h, .. }) => {
            assert_eq!(v, Vector::new(0.0, -1.0));
            assert_eq!(h, Vector::new(0.5, 0.0));
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[test]
fn test_events_without_focus_are_dropped() {
    let mut device = device();
    assert!(device.pointer_motion(0, Point::new(1.0, 1.0)).is_none());
    assert!(device.pointer_enter(1, None, Point::default()).is_none());
    assert!(device.key(2, 0, KEY_A, true).events.is_empty());
    assert!(device.touch_motion(0, 1, Point::default()).is_none());
}

#[test]
fn test_pointer_leave_targets_previous_focus() {
    let mut device = device();
    device.pointer_enter(1, Some(WINDOW), Point::new(3.0, 4.0));
    let leave = device.pointer_leave(2).unwrap();
    assert_eq!(leave.window, WINDOW);
    assert!(matches!(
        leave.event,
        InputEvent::Pointer {
            kind: PointerEventKind::LeaveWindow,
            ..
        }
    ));
    assert_eq!(device.pointer_focus(), None);
}

#[test]
fn test_key_press_emits_key_and_text_and_arms_repeat() {
    let mut device = device();
    device.keyboard_enter(7, Some(WINDOW));

    let outcome = device.key(8, 50, KEY_A, true);
    assert_eq!(
        kinds(&outcome.events),
        vec![
            &InputEvent::Key {
                pressed: true,
                keysym: KEYSYM_A,
                modifiers: Modifiers::empty(),
                time: 50
            },
            &InputEvent::Text {
                text: "a".into(),
                time: 50
            },
        ]
    );
    assert_eq!(outcome.repeat, RepeatCommand::Arm(Duration::from_millis(600)));
    assert_eq!(device.keyboard_enter_serial(), 7);
}

#[test]
fn test_control_characters_produce_no_text() {
    let mut device = device();
    device.keyboard_enter(1, Some(WINDOW));
    let outcome = device.key(2, 0, KEY_ENTER, true);
    assert_eq!(outcome.events.len(), 1);
}

#[test]
fn test_repeat_cycle_until_release() {
    let mut device = device();
    device.keyboard_enter(1, Some(WINDOW));
    device.key(2, 0, KEY_A, true);

    // Delay elapsed: switch to the interval
    let first = device.repeat_tick();
    assert_eq!(first.events.len(), 2);
    assert_eq!(first.repeat, RepeatCommand::Arm(Duration::from_millis(40)));

    let second = device.repeat_tick();
    assert_eq!(second.events.len(), 2);
    assert_eq!(second.repeat, RepeatCommand::Keep);

    let release = device.key(3, 10, KEY_A, false);
    assert_eq!(release.repeat, RepeatCommand::Stop);
    assert!(matches!(
        release.events[0].event,
        InputEvent::Key { pressed: false, .. }
    ));

    // A stale tick after release emits nothing
    let stale = device.repeat_tick();
    assert!(stale.events.is_empty());
    assert!(!device.is_repeating());
}

#[test]
fn test_other_key_press_cancels_repeat() {
    let mut device = device();
    device.keyboard_enter(1, Some(WINDOW));
    device.key(2, 0, KEY_A, true);

    let shift = device.key(3, 0, KEY_LEFTSHIFT, true);
    assert_eq!(shift.repeat, RepeatCommand::Stop);

    // Releasing a key other than the repeating one keeps repeat state untouched
    device.key(4, 0, KEY_A, true);
    let release = device.key(5, 0, KEY_LEFTSHIFT, false);
    assert_eq!(release.repeat, RepeatCommand::Keep);
    assert!(device.is_repeating());
}

#[test]
fn test_zero_rate_disables_repeat() {
    let mut device = device();
    device.repeat_info(0, 300);
    device.keyboard_enter(1, Some(WINDOW));
    assert_eq!(device.key(2, 0, KEY_A, true).repeat, RepeatCommand::Keep);
    assert!(!device.is_repeating());
}

#[test]
fn test_keyboard_leave_stops_repeat() {
    let mut device = device();
    device.keyboard_enter(1, Some(WINDOW));
    device.key(2, 0, KEY_A, true);
    assert_eq!(device.keyboard_leave(3), RepeatCommand::Stop);
    assert_eq!(device.keyboard_focus(), None);
}

#[test]
fn test_modifiers_merge_with_buttons() {
    let mut device = device();
    device.pointer_enter(1, Some(WINDOW), Point::default());
    device.pointer_button(2, 0, buttons::BTN_RIGHT, true);
    device.modifiers_changed(3, 0x1 | 0x4, 0, 0, 0);
    assert_eq!(
        device.modifiers(),
        Modifiers::RIGHT_BUTTON | Modifiers::SHIFT | Modifiers::CONTROL
    );
    device.modifiers_changed(4, 0, 0, 0, 0);
    assert_eq!(device.modifiers(), Modifiers::RIGHT_BUTTON);
}

#[test]
fn test_touch_cancel_clears_tracked_id() {
    let mut device = device();
    device.set_capabilities(Capabilities::TOUCH);
    device.touch_down(1, 0, Some(WINDOW), 4, Point::new(1.0, 2.0));

    let cancel = device.touch_cancel().unwrap();
    assert!(matches!(
        cancel.event,
        InputEvent::Touch {
            kind: TouchEventKind::Cancel,
            id: 4,
            ..
        }
    ));
    assert!(device.touch_cancel().is_none());
}

#[test]
fn test_capability_delta() {
    let mut device = device();
    let delta = device.set_capabilities(Capabilities::KEYBOARD | Capabilities::TOUCH);
    assert_eq!(delta.added, Capabilities::TOUCH);
    assert_eq!(delta.removed, Capabilities::POINTER);

    let delta = device.set_capabilities(Capabilities::KEYBOARD | Capabilities::TOUCH);
    assert_eq!(delta, CapabilityDelta::default());
}

#[test]
fn test_pinch_emits_magnify_and_rotate() {
    let mut device = device();
    device.gesture_begin(3, Some(WINDOW));
    let events = device.pinch_update(0, 1.0, 2.0, 90.0);
    assert_eq!(events.len(), 2);
    match &events[1].event {
        InputEvent::Gesture { kind, delta, .. } => {
            assert_eq!(*kind, GestureKind::Rotate);
            assert!(delta.x.abs() < 1e-9);
            assert!((delta.y - 1.0).abs() < 1e-9);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(device.pinch_update(0, 0.0, 0.0, 0.0).is_empty());
    assert_eq!(device.last_serial(), 3);
}

#[test]
fn test_null_cursor_resolves_to_arrow() {
    let mut device = device();
    let arrow = Cursor::new(vec![CursorImage {
        buffer: CursorBuffer(1),
        size: PixelSize::new(24, 24),
        hotspot: PixelPoint::new(1, 1),
        delay: Duration::ZERO,
    }])
    .unwrap();

    let arrow_for_factory = arrow.clone();
    let commands = device.set_cursor(None, move || Some(arrow_for_factory));
    assert!(commands.contains(&CursorCommand::Show(arrow.images()[0])));

    // No pointer, no cursor
    device.set_capabilities(Capabilities::KEYBOARD);
    assert!(device.set_cursor(None, || Some(arrow)).is_empty());
}
