//! Wire events to platform events
//!
//! Surface-bound objects carry their [`WindowId`] as user data, outputs their
//! registry name. Everything else is keyed by nothing and routed by type.

use super::State;
use crate::clipboard::{DndAction, OfferId, SourceEvent, SourceId};
use crate::geometry::{PixelRect, PixelSize, Point};
use crate::input::{Capabilities, ScrollAxis};
use crate::platform::{
    DataDeviceEvent, GestureEvent, KeyboardEvent, OutputEvent, PointerEvent, RegistryEvent,
    SeatEvent, SurfaceEvent, TextInputEvent, TouchEvent,
};
use crate::window::{DecorationMode, ToplevelStates, WindowId};
use log::{trace, warn};
use wayland_client::protocol::{
    wl_buffer::WlBuffer,
    wl_callback::{self, WlCallback},
    wl_compositor::WlCompositor,
    wl_data_device::{self, WlDataDevice},
    wl_data_device_manager::{self, WlDataDeviceManager},
    wl_data_offer::{self, WlDataOffer},
    wl_data_source::{self, WlDataSource},
    wl_keyboard::{self, WlKeyboard},
    wl_output::{self, WlOutput},
    wl_pointer::{self, WlPointer},
    wl_registry::{self, WlRegistry},
    wl_seat::{self, WlSeat},
    wl_shm::WlShm,
    wl_shm_pool::WlShmPool,
    wl_surface::{self, WlSurface},
    wl_touch::{self, WlTouch},
};
use wayland_client::{delegate_noop, event_created_child, Connection, Dispatch, Proxy, QueueHandle, WEnum};
use wayland_protocols::wp::pointer_gestures::zv1::client::{
    zwp_pointer_gesture_pinch_v1::{self, ZwpPointerGesturePinchV1},
    zwp_pointer_gesture_swipe_v1::{self, ZwpPointerGestureSwipeV1},
    zwp_pointer_gestures_v1::ZwpPointerGesturesV1,
};
use wayland_protocols::wp::text_input::zv3::client::{
    zwp_text_input_manager_v3::ZwpTextInputManagerV3,
    zwp_text_input_v3::{self, ZwpTextInputV3},
};
use wayland_protocols::xdg::decoration::zv1::client::{
    zxdg_decoration_manager_v1::ZxdgDecorationManagerV1,
    zxdg_toplevel_decoration_v1::{self, ZxdgToplevelDecorationV1},
};
use wayland_protocols::xdg::foreign::zv2::client::{
    zxdg_exported_v2::{self, ZxdgExportedV2},
    zxdg_exporter_v2::ZxdgExporterV2,
};
use wayland_protocols::xdg::shell::client::{
    xdg_popup::{self, XdgPopup},
    xdg_positioner::XdgPositioner,
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

fn window_of(surface: &WlSurface) -> Option<WindowId> {
    surface.data::<WindowId>().copied()
}

fn offer_id(offer: &WlDataOffer) -> OfferId {
    OfferId(offer.id().protocol_id())
}

fn dnd_actions(actions: WEnum<wl_data_device_manager::DndAction>) -> DndAction {
    match actions {
        WEnum::Value(actions) => DndAction::from_bits_truncate(actions.bits()),
        WEnum::Unknown(bits) => DndAction::from_bits_truncate(bits),
    }
}

fn toplevel_states(raw: &[u8]) -> ToplevelStates {
    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .fold(ToplevelStates::empty(), |states, value| {
            states | ToplevelStates::from_protocol(value)
        })
}

// Registry and shell globals

impl Dispatch<WlRegistry, ()> for State {
    fn event(state: &mut Self, _: &WlRegistry, event: wl_registry::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.registry_event(RegistryEvent::Global {
                name,
                interface,
                version,
            }),
            wl_registry::Event::GlobalRemove { name } => {
                state.registry_event(RegistryEvent::GlobalRemove { name })
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgWmBase, ()> for State {
    fn event(state: &mut Self, _: &XdgWmBase, event: xdg_wm_base::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            state.ping(serial);
        }
    }
}

impl Dispatch<WlOutput, u32> for State {
    fn event(state: &mut Self, _: &WlOutput, event: wl_output::Event, name: &u32, _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_output::Event::Geometry { x, y, .. } => OutputEvent::Geometry { x, y },
            wl_output::Event::Mode {
                flags,
                width,
                height,
                ..
            } => {
                let flags = match flags {
                    WEnum::Value(flags) => flags,
                    WEnum::Unknown(bits) => wl_output::Mode::from_bits_truncate(bits),
                };
                OutputEvent::Mode {
                    width,
                    height,
                    current: flags.contains(wl_output::Mode::Current),
                    preferred: flags.contains(wl_output::Mode::Preferred),
                }
            }
            wl_output::Event::Scale { factor } => OutputEvent::Scale(factor),
            wl_output::Event::Done => OutputEvent::Done,
            _ => return,
        };
        state.output_event(*name, event);
    }
}

// Seat devices

impl Dispatch<WlSeat, ()> for State {
    fn event(state: &mut Self, _: &WlSeat, event: wl_seat::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        if let wl_seat::Event::Capabilities { capabilities } = event {
            let bits = match capabilities {
                WEnum::Value(capabilities) => capabilities.bits(),
                WEnum::Unknown(bits) => bits,
            };
            state.seat_event(SeatEvent::Capabilities(Capabilities::from_bits_truncate(bits)));
        }
    }
}

impl Dispatch<WlPointer, ()> for State {
    fn event(state: &mut Self, _: &WlPointer, event: wl_pointer::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_pointer::Event::Enter {
                serial,
                surface,
                surface_x,
                surface_y,
            } => PointerEvent::Enter {
                serial,
                surface: window_of(&surface),
                position: Point::new(surface_x, surface_y),
            },
            wl_pointer::Event::Leave { serial, .. } => PointerEvent::Leave { serial },
            wl_pointer::Event::Motion {
                time,
                surface_x,
                surface_y,
            } => PointerEvent::Motion {
                time,
                position: Point::new(surface_x, surface_y),
            },
            wl_pointer::Event::Button {
                serial,
                time,
                button,
                state: button_state,
            } => PointerEvent::Button {
                serial,
                time,
                button,
                pressed: button_state == WEnum::Value(wl_pointer::ButtonState::Pressed),
            },
            wl_pointer::Event::Axis { time, axis, value } => {
                let axis = match axis {
                    WEnum::Value(wl_pointer::Axis::VerticalScroll) => ScrollAxis::Vertical,
                    WEnum::Value(wl_pointer::Axis::HorizontalScroll) => ScrollAxis::Horizontal,
                    _ => return,
                };
                PointerEvent::Axis { time, axis, value }
            }
            _ => return,
        };
        state.pointer_event(event);
    }
}

impl Dispatch<WlKeyboard, ()> for State {
    fn event(state: &mut Self, _: &WlKeyboard, event: wl_keyboard::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                if format != WEnum::Value(wl_keyboard::KeymapFormat::XkbV1) {
                    warn!("⌨️ Ignoring keymap in format {:?}", format);
                    return;
                }
                KeyboardEvent::Keymap { fd, size }
            }
            wl_keyboard::Event::Enter { serial, surface, .. } => KeyboardEvent::Enter {
                serial,
                surface: window_of(&surface),
            },
            wl_keyboard::Event::Leave { serial, .. } => KeyboardEvent::Leave { serial },
            wl_keyboard::Event::Key {
                serial,
                time,
                key,
                state: key_state,
            } => KeyboardEvent::Key {
                serial,
                time,
                key,
                pressed: key_state == WEnum::Value(wl_keyboard::KeyState::Pressed),
            },
            wl_keyboard::Event::Modifiers {
                serial,
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
            } => KeyboardEvent::Modifiers {
                serial,
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            },
            wl_keyboard::Event::RepeatInfo { rate, delay } => KeyboardEvent::RepeatInfo { rate, delay },
            _ => return,
        };
        state.keyboard_event(event);
    }
}

impl Dispatch<WlTouch, ()> for State {
    fn event(state: &mut Self, _: &WlTouch, event: wl_touch::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_touch::Event::Down {
                serial,
                time,
                surface,
                id,
                x,
                y,
            } => TouchEvent::Down {
                serial,
                time,
                surface: window_of(&surface),
                id,
                position: Point::new(x, y),
            },
            wl_touch::Event::Up { serial, time, id } => TouchEvent::Up { serial, time, id },
            wl_touch::Event::Motion { time, id, x, y } => TouchEvent::Motion {
                time,
                id,
                position: Point::new(x, y),
            },
            wl_touch::Event::Cancel => TouchEvent::Cancel,
            _ => return,
        };
        state.touch_event(event);
    }
}

impl Dispatch<ZwpPointerGesturePinchV1, ()> for State {
    fn event(
        state: &mut Self,
        _: &ZwpPointerGesturePinchV1,
        event: zwp_pointer_gesture_pinch_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            zwp_pointer_gesture_pinch_v1::Event::Begin { serial, surface, .. } => GestureEvent::PinchBegin {
                serial,
                surface: window_of(&surface),
            },
            zwp_pointer_gesture_pinch_v1::Event::Update {
                time,
                dx,
                dy,
                scale,
                rotation,
            } => GestureEvent::PinchUpdate {
                time,
                dx,
                dy,
                scale,
                rotation,
            },
            zwp_pointer_gesture_pinch_v1::Event::End { serial, .. } => GestureEvent::PinchEnd { serial },
            _ => return,
        };
        state.gesture_event(event);
    }
}

impl Dispatch<ZwpPointerGestureSwipeV1, ()> for State {
    fn event(
        state: &mut Self,
        _: &ZwpPointerGestureSwipeV1,
        event: zwp_pointer_gesture_swipe_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            zwp_pointer_gesture_swipe_v1::Event::Begin { serial, surface, .. } => GestureEvent::SwipeBegin {
                serial,
                surface: window_of(&surface),
            },
            zwp_pointer_gesture_swipe_v1::Event::Update { time, dx, dy } => {
                GestureEvent::SwipeUpdate { time, dx, dy }
            }
            zwp_pointer_gesture_swipe_v1::Event::End { serial, .. } => GestureEvent::SwipeEnd { serial },
            _ => return,
        };
        state.gesture_event(event);
    }
}

// Data transfer

impl Dispatch<WlDataDevice, ()> for State {
    fn event(state: &mut Self, _: &WlDataDevice, event: wl_data_device::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_data_device::Event::DataOffer { id } => {
                let offer = offer_id(&id);
                state.backend_mut().offers.insert(offer, id);
                DataDeviceEvent::DataOffer(offer)
            }
            wl_data_device::Event::Selection { id } => DataDeviceEvent::Selection(id.as_ref().map(offer_id)),
            wl_data_device::Event::Enter {
                serial,
                surface,
                x,
                y,
                id,
            } => DataDeviceEvent::Enter {
                serial,
                surface: window_of(&surface),
                position: Point::new(x, y),
                offer: id.as_ref().map(offer_id),
            },
            wl_data_device::Event::Motion { time, x, y } => DataDeviceEvent::Motion {
                time,
                position: Point::new(x, y),
            },
            wl_data_device::Event::Leave => DataDeviceEvent::Leave,
            wl_data_device::Event::Drop => DataDeviceEvent::Drop,
            _ => return,
        };
        state.data_device_event(event);
    }

    event_created_child!(State, WlDataDevice, [
        wl_data_device::EVT_DATA_OFFER_OPCODE => (WlDataOffer, ()),
    ]);
}

impl Dispatch<WlDataOffer, ()> for State {
    fn event(state: &mut Self, offer: &WlDataOffer, event: wl_data_offer::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let offer = offer_id(offer);
        let event = match event {
            wl_data_offer::Event::Offer { mime_type } => DataDeviceEvent::Offer { offer, mime_type },
            wl_data_offer::Event::SourceActions { source_actions } => DataDeviceEvent::SourceActions {
                offer,
                actions: dnd_actions(source_actions),
            },
            wl_data_offer::Event::Action { dnd_action } => DataDeviceEvent::Action {
                offer,
                action: dnd_actions(dnd_action),
            },
            _ => return,
        };
        state.data_device_event(event);
    }
}

/// Collects events for our data sources on their private queue
#[derive(Debug, Default)]
pub struct SourceCollector {
    events: Vec<SourceEvent>,
}

impl SourceCollector {
    pub fn take(&mut self) -> Vec<SourceEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Dispatch<WlDataSource, SourceId> for SourceCollector {
    fn event(
        collector: &mut Self,
        _: &WlDataSource,
        event: wl_data_source::Event,
        source: &SourceId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let source = *source;
        let event = match event {
            wl_data_source::Event::Target { mime_type } => SourceEvent::Target { source, mime_type },
            wl_data_source::Event::Send { mime_type, fd } => SourceEvent::Send {
                source,
                mime_type,
                fd,
            },
            wl_data_source::Event::Cancelled => SourceEvent::Cancelled { source },
            wl_data_source::Event::DndDropPerformed => SourceEvent::DndDropPerformed { source },
            wl_data_source::Event::DndFinished => SourceEvent::DndFinished { source },
            wl_data_source::Event::Action { dnd_action } => SourceEvent::Action {
                source,
                action: dnd_actions(dnd_action),
            },
            _ => return,
        };
        trace!("📦 Source event {:?}", event);
        collector.events.push(event);
    }
}

impl Dispatch<ZwpTextInputV3, ()> for State {
    fn event(state: &mut Self, _: &ZwpTextInputV3, event: zwp_text_input_v3::Event, _: &(), _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            zwp_text_input_v3::Event::Enter { surface } => TextInputEvent::Enter {
                surface: window_of(&surface),
            },
            zwp_text_input_v3::Event::Leave { .. } => TextInputEvent::Leave,
            zwp_text_input_v3::Event::PreeditString {
                text,
                cursor_begin,
                cursor_end,
            } => TextInputEvent::PreeditString {
                text,
                cursor_begin,
                cursor_end,
            },
            zwp_text_input_v3::Event::CommitString { text } => TextInputEvent::CommitString { text },
            zwp_text_input_v3::Event::DeleteSurroundingText {
                before_length,
                after_length,
            } => TextInputEvent::DeleteSurroundingText {
                before_length,
                after_length,
            },
            zwp_text_input_v3::Event::Done { serial } => TextInputEvent::Done { serial },
            _ => return,
        };
        trace!("⌨️ Text input event {:?}", event);
        state.text_input_event(event);
    }
}

// Windows

impl Dispatch<WlSurface, WindowId> for State {
    fn event(state: &mut Self, _: &WlSurface, event: wl_surface::Event, window: &WindowId, _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            wl_surface::Event::Enter { output } => match output.data::<u32>() {
                Some(name) => SurfaceEvent::Enter { output: *name },
                None => return,
            },
            wl_surface::Event::Leave { output } => match output.data::<u32>() {
                Some(name) => SurfaceEvent::Leave { output: *name },
                None => return,
            },
            _ => return,
        };
        state.window_event(*window, event);
    }
}

impl Dispatch<XdgSurface, WindowId> for State {
    fn event(state: &mut Self, _: &XdgSurface, event: xdg_surface::Event, window: &WindowId, _: &Connection, _: &QueueHandle<Self>) {
        if let xdg_surface::Event::Configure { serial } = event {
            state.window_event(*window, SurfaceEvent::Configure { serial });
        }
    }
}

impl Dispatch<XdgToplevel, WindowId> for State {
    fn event(state: &mut Self, _: &XdgToplevel, event: xdg_toplevel::Event, window: &WindowId, _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => SurfaceEvent::ToplevelConfigure {
                size: (width > 0 && height > 0).then(|| PixelSize::new(width as u32, height as u32)),
                states: toplevel_states(&states),
            },
            xdg_toplevel::Event::Close => SurfaceEvent::ToplevelClose,
            _ => return,
        };
        state.window_event(*window, event);
    }
}

impl Dispatch<XdgPopup, WindowId> for State {
    fn event(state: &mut Self, _: &XdgPopup, event: xdg_popup::Event, window: &WindowId, _: &Connection, _: &QueueHandle<Self>) {
        let event = match event {
            xdg_popup::Event::Configure {
                x,
                y,
                width,
                height,
            } => SurfaceEvent::PopupConfigure {
                rect: PixelRect::new(x, y, width.max(0) as u32, height.max(0) as u32),
            },
            xdg_popup::Event::PopupDone => SurfaceEvent::PopupDone,
            xdg_popup::Event::Repositioned { token } => SurfaceEvent::Repositioned { token },
            _ => return,
        };
        state.window_event(*window, event);
    }
}

impl Dispatch<WlCallback, WindowId> for State {
    fn event(state: &mut Self, _: &WlCallback, event: wl_callback::Event, window: &WindowId, _: &Connection, _: &QueueHandle<Self>) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.window_event(*window, SurfaceEvent::FrameDone { time: callback_data });
        }
    }
}

impl Dispatch<ZxdgToplevelDecorationV1, WindowId> for State {
    fn event(
        state: &mut Self,
        _: &ZxdgToplevelDecorationV1,
        event: zxdg_toplevel_decoration_v1::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zxdg_toplevel_decoration_v1::Event::Configure { mode } = event {
            let mode = match mode {
                WEnum::Value(zxdg_toplevel_decoration_v1::Mode::ServerSide) => DecorationMode::ServerSide,
                _ => DecorationMode::ClientSide,
            };
            state.window_event(*window, SurfaceEvent::DecorationConfigure(mode));
        }
    }
}

impl Dispatch<ZxdgExportedV2, WindowId> for State {
    fn event(
        state: &mut Self,
        _: &ZxdgExportedV2,
        event: zxdg_exported_v2::Event,
        window: &WindowId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zxdg_exported_v2::Event::Handle { handle } = event {
            state.window_event(*window, SurfaceEvent::Exported(handle));
        }
    }
}

// Objects whose events carry nothing we use

delegate_noop!(State: WlCompositor);
delegate_noop!(State: WlShmPool);
delegate_noop!(State: WlDataDeviceManager);
delegate_noop!(State: XdgPositioner);
delegate_noop!(State: ZxdgDecorationManagerV1);
delegate_noop!(State: ZxdgExporterV2);
delegate_noop!(State: ZwpPointerGesturesV1);
delegate_noop!(State: ZwpTextInputManagerV3);
delegate_noop!(State: ignore WlShm);
delegate_noop!(State: ignore WlBuffer);
// Cursor surface
delegate_noop!(State: ignore WlSurface);
