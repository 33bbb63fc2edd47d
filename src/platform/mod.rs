//! Platform state: wires the components together on the loop thread
//!
//! `Platform` is the state the display event loop dispatches into. Protocol
//! events arrive through one handler per object family; the components turn
//! them into toolkit callbacks and protocol requests, which go out through
//! the [`Backend`].

pub mod backend;
pub mod events;


pub use backend::{Backend, NativeHandles};
pub use events::{
    DataDeviceEvent, GestureEvent, KeyboardEvent, OutputEvent, PointerEvent, RegistryEvent,
    SeatEvent, SurfaceEvent, TextInputEvent, TouchEvent,
};

use crate::clipboard::{
    DataFormat, DataTransferBroker, DndAction, DragCompletion, DragEvent, DragEventKind, DropData,
    Payload, SourceEvent,
};
use crate::config::{InputConfig, SkylightConfig};
use crate::error::{PlatformError, Result};
use crate::event_loop::{LoopState, TimerId, TimerPriority, Timers};
use crate::geometry::{PixelPoint, PixelRect, PixelSize};
use crate::input::cursor::{decode_png_cursor, CursorCommand, CursorShape};
use crate::input::text_input::{
    TextInputClient, TextInputOptions, TextInputRequest, TextInputState,
};
use crate::input::{Capabilities, InputDevice, InputSettings, RepeatCommand, Routed};
use crate::registry::{GlobalKind, GlobalRegistry, RegistryAction};
use crate::screens::ScreenRegistry;
use crate::window::{
    DecorationMode, GpuWindowHandle, PopupState, Positioner, ResizeEdge, Role, ToplevelRequest,
    ToplevelSetup, ToplevelStateMachine, Window, WindowConstraints, WindowEvents, WindowId,
    WindowState,
};
use log::{debug, error, info, trace, warn};
use std::collections::BTreeMap;
use std::time::Duration;

/// Creation parameters of a toplevel window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToplevelOptions {
    pub title: String,
    /// Initial client size; derived from the primary screen when `None`
    pub size: Option<PixelSize>,
    pub parent: Option<WindowId>,
}

/// Double-click thresholds the toolkit applies to pointer and touch input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSettings {
    pub double_click_time: Duration,
    /// Largest movement between the clicks, in pixels
    pub double_click_size: PixelSize,
    pub touch_double_click_time: Duration,
    pub touch_double_click_size: PixelSize,
}

impl PlatformSettings {
    pub fn from_config(config: &InputConfig) -> Self {
        let time = Duration::from_millis(u64::from(config.double_click_time_ms));
        let [width, height] = config.double_click_size;
        let [touch_width, touch_height] = config.touch_double_click_size;
        Self {
            double_click_time: time,
            double_click_size: PixelSize::new(width, height),
            // Compositors publish no separate touch timing
            touch_double_click_time: time,
            touch_double_click_size: PixelSize::new(touch_width, touch_height),
        }
    }
}

pub struct Platform<B: Backend> {
    backend: B,
    config: SkylightConfig,
    timers: Timers<Platform<B>>,

    registry: GlobalRegistry,
    screens: ScreenRegistry,
    input: InputDevice,
    text_input: TextInputState,
    clipboard: DataTransferBroker,
    windows: BTreeMap<WindowId, Window>,
    next_window: u32,

    repeat_timer: Option<TimerId>,
    cursor_timer: Option<TimerId>,
    shut_down: bool,
}

impl<B: Backend> Platform<B> {
    pub fn new(backend: B, config: SkylightConfig, timers: Timers<Self>) -> Self {
        let input = InputDevice::new(InputSettings::from_config(&config.input));
        Self::with_input(backend, config, timers, input)
    }

    pub fn with_input(backend: B, config: SkylightConfig, timers: Timers<Self>, input: InputDevice) -> Self {
        let clipboard = DataTransferBroker::new(&config.clipboard);
        Self {
            backend,
            config,
            timers,
            registry: GlobalRegistry::new(),
            screens: ScreenRegistry::new(),
            input,
            text_input: TextInputState::new(),
            clipboard,
            windows: BTreeMap::new(),
            next_window: 1,
            repeat_timer: None,
            cursor_timer: None,
            shut_down: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &SkylightConfig {
        &self.config
    }

    pub fn settings(&self) -> PlatformSettings {
        PlatformSettings::from_config(&self.config.input)
    }

    pub fn timers(&self) -> &Timers<Self> {
        &self.timers
    }

    pub fn registry(&self) -> &GlobalRegistry {
        &self.registry
    }

    pub fn screens(&self) -> &ScreenRegistry {
        &self.screens
    }

    pub fn input(&self) -> &InputDevice {
        &self.input
    }

    pub fn text_input(&self) -> &TextInputState {
        &self.text_input
    }

    pub fn clipboard(&self) -> &DataTransferBroker {
        &self.clipboard
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.windows.keys().copied().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn window_mut(&mut self, id: WindowId) -> Result<&mut Window> {
        self.windows
            .get_mut(&id)
            .ok_or_else(|| PlatformError::contract(format!("unknown window {}", id)))
    }

    // Registry

    pub fn registry_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Global {
                name,
                interface,
                version,
            } => {
                let Some(RegistryAction::Bind {
                    name,
                    kind,
                    version,
                }) = self.registry.announce(name, &interface, version)
                else {
                    return;
                };
                match self.backend.bind_global(name, kind, version) {
                    Ok(()) if kind == GlobalKind::Output => self.screens.add_output(name),
                    Ok(()) if matches!(kind, GlobalKind::Seat | GlobalKind::TextInputManager) => {
                        // A new text input object starts disabled
                        let requests = self.text_input.resume();
                        self.send_text_input(requests);
                    }
                    Ok(()) => {}
                    Err(err) => warn!("⚠️ Could not bind {}: {}", kind.interface(), err),
                }
            }
            RegistryEvent::GlobalRemove { name } => match self.registry.remove(name) {
                Some(RegistryAction::Unbind { name, kind }) => {
                    if kind == GlobalKind::Seat {
                        self.seat_event(SeatEvent::Capabilities(Capabilities::empty()));
                    }
                    if matches!(kind, GlobalKind::Seat | GlobalKind::TextInputManager) {
                        self.text_input.leave();
                    }
                    self.backend.unbind_global(name, kind);
                }
                Some(RegistryAction::OutputRemoved { name }) => {
                    self.backend.unbind_global(name, GlobalKind::Output);
                    self.screens.remove_output(name);
                    let affected: Vec<WindowId> = self
                        .windows
                        .values_mut()
                        .filter_map(|window| window.output_left(name).then(|| window.id()))
                        .collect();
                    for id in affected {
                        self.update_scaling(id);
                    }
                }
                _ => {}
            },
        }
    }

    /// Verifies the globals after the initial round-trip
    pub fn check_globals(&self) -> Result<()> {
        if let Some(missing) = self.registry.missing_required().first() {
            return Err(PlatformError::MissingGlobal(missing));
        }
        for missing in self.registry.missing_optional() {
            warn!("⚠️ Optional global {} not advertised", missing);
        }
        info!("🔗 Required globals bound");
        Ok(())
    }

    pub fn ping(&mut self, serial: u32) {
        self.backend.pong(serial);
    }

    // Seat

    pub fn seat_event(&mut self, event: SeatEvent) {
        let SeatEvent::Capabilities(capabilities) = event;
        let delta = self.input.set_capabilities(capabilities);

        for device in [Capabilities::POINTER, Capabilities::KEYBOARD, Capabilities::TOUCH] {
            if delta.removed.contains(device) {
                if device == Capabilities::KEYBOARD {
                    self.stop_repeat();
                }
                if device == Capabilities::POINTER {
                    self.dispose_cursor_timer();
                }
                self.backend.release_input_device(device);
            }
            if delta.added.contains(device) {
                if let Err(err) = self.backend.create_input_device(device) {
                    warn!("⚠️ Could not create {:?} device: {}", device, err);
                }
            }
        }
    }

    fn deliver(&mut self, routed: Option<Routed>) {
        let Some(Routed { window, event }) = routed else {
            return;
        };
        match self.windows.get_mut(&window) {
            Some(target) => target.events().input(event),
            None => trace!("Dropping input for vanished window {}", window),
        }
    }

    fn deliver_all(&mut self, events: Vec<Routed>) {
        for routed in events {
            self.deliver(Some(routed));
        }
    }

    pub fn pointer_event(&mut self, event: PointerEvent) {
        let routed = match event {
            PointerEvent::Enter {
                serial,
                surface,
                position,
            } => {
                let routed = self.input.pointer_enter(serial, surface, position);
                self.refresh_cursor();
                routed
            }
            PointerEvent::Leave { serial } => self.input.pointer_leave(serial),
            PointerEvent::Motion { time, position } => self.input.pointer_motion(time, position),
            PointerEvent::Button {
                serial,
                time,
                button,
                pressed,
            } => self.input.pointer_button(serial, time, button, pressed),
            PointerEvent::Axis { time, axis, value } => self.input.pointer_axis(time, axis, value),
        };
        self.deliver(routed);
    }

    pub fn keyboard_event(&mut self, event: KeyboardEvent) {
        match event {
            KeyboardEvent::Keymap { fd, size } => self.input.keymap(fd, size),
            KeyboardEvent::Enter { serial, surface } => self.input.keyboard_enter(serial, surface),
            KeyboardEvent::Leave { serial } => {
                let repeat = self.input.keyboard_leave(serial);
                self.apply_repeat(repeat);
            }
            KeyboardEvent::Key {
                serial,
                time,
                key,
                pressed,
            } => {
                let outcome = self.input.key(serial, time, key, pressed);
                self.deliver_all(outcome.events);
                self.apply_repeat(outcome.repeat);
            }
            KeyboardEvent::Modifiers {
                serial,
                depressed,
                latched,
                locked,
                group,
            } => self
                .input
                .modifiers_changed(serial, depressed, latched, locked, group),
            KeyboardEvent::RepeatInfo { rate, delay } => self.input.repeat_info(rate, delay),
        }
    }

    fn apply_repeat(&mut self, command: RepeatCommand) {
        match command {
            RepeatCommand::Keep => {}
            RepeatCommand::Stop => self.stop_repeat(),
            RepeatCommand::Arm(interval) => {
                self.stop_repeat();
                match self
                    .timers
                    .start(interval, TimerPriority::Input, |platform: &mut Self| {
                        platform.repeat_tick()
                    }) {
                    Ok(id) => self.repeat_timer = Some(id),
                    Err(err) => warn!("⚠️ Key repeat not armed: {}", err),
                }
            }
        }
    }

    fn repeat_tick(&mut self) {
        let outcome = self.input.repeat_tick();
        self.deliver_all(outcome.events);
        self.apply_repeat(outcome.repeat);
    }

    fn stop_repeat(&mut self) {
        if let Some(id) = self.repeat_timer.take() {
            self.timers.dispose(id);
        }
    }

    pub fn touch_event(&mut self, event: TouchEvent) {
        let routed = match event {
            TouchEvent::Down {
                serial,
                time,
                surface,
                id,
                position,
            } => self.input.touch_down(serial, time, surface, id, position),
            TouchEvent::Up { serial, time, id } => self.input.touch_up(serial, time, id),
            TouchEvent::Motion { time, id, position } => self.input.touch_motion(time, id, position),
            TouchEvent::Cancel => self.input.touch_cancel(),
        };
        self.deliver(routed);
    }

    pub fn gesture_event(&mut self, event: GestureEvent) {
        match event {
            GestureEvent::PinchBegin { serial, surface }
            | GestureEvent::SwipeBegin { serial, surface } => self.input.gesture_begin(serial, surface),
            GestureEvent::PinchEnd { serial } | GestureEvent::SwipeEnd { serial } => {
                self.input.gesture_end(serial)
            }
            GestureEvent::PinchUpdate {
                time,
                dx,
                dy,
                rotation,
                ..
            } => {
                let events = self.input.pinch_update(time, dx, dy, rotation);
                self.deliver_all(events);
            }
            GestureEvent::SwipeUpdate { time, dx, dy } => {
                let routed = self.input.swipe_update(time, dx, dy);
                self.deliver(routed);
            }
        }
    }

    // Text input

    pub fn text_input_event(&mut self, event: TextInputEvent) {
        match event {
            TextInputEvent::Enter { surface } => self.text_input.enter(surface),
            TextInputEvent::Leave => self.text_input.leave(),
            TextInputEvent::PreeditString {
                text,
                cursor_begin,
                cursor_end,
            } => self.text_input.preedit_string(text, cursor_begin, cursor_end),
            TextInputEvent::CommitString { text } => self.text_input.commit_string(text),
            TextInputEvent::DeleteSurroundingText {
                before_length,
                after_length,
            } => self
                .text_input
                .delete_surrounding_text(before_length, after_length),
            TextInputEvent::Done { serial } => {
                let routed = self.text_input.done(serial, self.input.keyboard_focus());
                self.deliver_all(routed);
            }
        }
    }

    /// Names the window whose text field has focus, or turns text input off
    pub fn set_text_input_client(&mut self, client: Option<TextInputClient>) -> Result<()> {
        if let Some(client) = client {
            self.window_mut(client.window)?;
        }
        let requests = self.text_input.set_client(client);
        self.send_text_input(requests);
        Ok(())
    }

    /// Tells the input method where the caret is, in surface coordinates
    pub fn set_text_input_cursor_rect(&mut self, rect: PixelRect) {
        let requests = self.text_input.set_cursor_rect(rect);
        self.send_text_input(requests);
    }

    pub fn set_text_input_options(&mut self, options: &TextInputOptions) {
        let requests = self.text_input.set_options(options);
        self.send_text_input(requests);
    }

    pub fn reset_text_input(&mut self) {
        let requests = self.text_input.reset();
        self.send_text_input(requests);
    }

    fn send_text_input(&mut self, requests: Vec<TextInputRequest>) {
        for request in requests {
            self.backend.text_input_request(request);
        }
    }

    // Cursor

    /// Shows a theme cursor; `None` or a shape the theme lacks shows the arrow
    pub fn set_cursor(&mut self, shape: Option<CursorShape>) {
        let cursor = shape.and_then(|shape| self.backend.load_theme_cursor(shape));
        let backend = &mut self.backend;
        let commands = self
            .input
            .set_cursor(cursor, || backend.load_theme_cursor(CursorShape::Arrow));
        self.run_cursor_commands(commands);
    }

    /// Shows a cursor decoded from PNG bytes, falling back to the arrow
    pub fn set_bitmap_cursor(&mut self, png: &[u8], hotspot: PixelPoint) {
        let cursor = decode_png_cursor(png)
            .and_then(|pixels| self.backend.create_bitmap_cursor(&pixels, hotspot));
        let cursor = match cursor {
            Ok(cursor) => Some(cursor),
            Err(err) => {
                warn!("⚠️ Bitmap cursor unavailable: {}", err);
                None
            }
        };
        let backend = &mut self.backend;
        let commands = self
            .input
            .set_cursor(cursor, || backend.load_theme_cursor(CursorShape::Arrow));
        self.run_cursor_commands(commands);
    }

    /// Re-attaches the current cursor after a pointer enter
    fn refresh_cursor(&mut self) {
        match self.input.current_cursor_image() {
            Some(image) => self
                .backend
                .show_cursor(self.input.pointer_enter_serial(), Some(&image)),
            None => self.set_cursor(None),
        }
    }

    fn run_cursor_commands(&mut self, commands: Vec<CursorCommand>) {
        for command in commands {
            match command {
                CursorCommand::Show(image) => {
                    self.backend
                        .show_cursor(self.input.pointer_enter_serial(), Some(&image));
                }
                CursorCommand::Arm(delay) => {
                    self.dispose_cursor_timer();
                    match self
                        .timers
                        .start(delay, TimerPriority::Render, |platform: &mut Self| {
                            platform.cursor_tick()
                        }) {
                        Ok(id) => self.cursor_timer = Some(id),
                        Err(err) => warn!("⚠️ Cursor animation not armed: {}", err),
                    }
                }
                CursorCommand::Disarm => self.dispose_cursor_timer(),
            }
        }
    }

    fn cursor_tick(&mut self) {
        let commands = self.input.cursor_tick();
        self.run_cursor_commands(commands);
    }

    fn dispose_cursor_timer(&mut self) {
        if let Some(id) = self.cursor_timer.take() {
            self.timers.dispose(id);
        }
    }

    // Outputs

    pub fn output_event(&mut self, output: u32, event: OutputEvent) {
        match event {
            OutputEvent::Geometry { x, y } => self.screens.geometry(output, x, y),
            OutputEvent::Mode {
                width,
                height,
                current,
                preferred,
            } => self.screens.mode(output, width, height, current, preferred),
            OutputEvent::Scale(factor) => self.screens.scale(output, factor),
            OutputEvent::Done => {
                if self.screens.done(output).is_some() {
                    let affected: Vec<WindowId> = self
                        .windows
                        .values()
                        .filter(|window| window.outputs().contains(&output))
                        .map(Window::id)
                        .collect();
                    for id in affected {
                        self.update_scaling(id);
                    }
                }
            }
        }
    }

    /// Scales a window to the densest screen it is on
    fn update_scaling(&mut self, id: WindowId) {
        let Some(window) = self.windows.get_mut(&id) else {
            return;
        };
        let scaling = window
            .outputs()
            .iter()
            .filter_map(|output| self.screens.get(*output))
            .map(|screen| screen.scaling)
            .fold(None, |best: Option<f64>, scaling| {
                Some(best.map_or(scaling, |best| best.max(scaling)))
            });
        if let Some(scaling) = scaling {
            window.set_scaling(&mut self.backend, scaling);
        }
    }

    // Data transfer

    pub fn data_device_event(&mut self, event: DataDeviceEvent) {
        match event {
            DataDeviceEvent::DataOffer(offer) => self.clipboard.offer_announced(&mut self.backend, offer),
            DataDeviceEvent::Offer { offer, mime_type } => self.clipboard.offer_mime(offer, mime_type),
            DataDeviceEvent::SourceActions { offer, actions } => {
                self.clipboard.offer_source_actions(offer, actions)
            }
            DataDeviceEvent::Action { offer, action } => self.clipboard.offer_action(offer, action),
            DataDeviceEvent::Selection(offer) => self.clipboard.selection_changed(&mut self.backend, offer),
            DataDeviceEvent::Enter {
                serial,
                surface,
                position,
                offer,
            } => {
                let Some(window) = surface.filter(|w| self.windows.contains_key(w)) else {
                    trace!("Drag entered a foreign surface");
                    return;
                };
                self.clipboard
                    .drag_enter(&mut self.backend, window, serial, position, offer);
                self.raise_drag(DragEventKind::Enter, None);
            }
            DataDeviceEvent::Motion { position, .. } => {
                if self.clipboard.drag_motion(position).is_some() {
                    self.raise_drag(DragEventKind::Over, None);
                }
            }
            DataDeviceEvent::Leave => {
                let allowed = self.drag_allowed();
                let formats = self.drag_formats();
                if let Some(target) = self.clipboard.drag_leave(&mut self.backend) {
                    let event = DragEvent {
                        kind: DragEventKind::Leave,
                        position: target.position,
                        formats,
                        allowed,
                        modifiers: self.input.modifiers(),
                        data: None,
                    };
                    if let Some(window) = self.windows.get_mut(&target.window) {
                        window.events().drag(event);
                    }
                }
            }
            DataDeviceEvent::Drop => {
                let data = self.clipboard.drop_data(&mut self.backend);
                let action = self.raise_drag(DragEventKind::Drop, Some(data));
                self.clipboard.finish_drop(&mut self.backend, action);
            }
        }
    }

    fn drag_allowed(&self) -> DndAction {
        self.clipboard
            .drag_target()
            .and_then(|target| target.offer)
            .map(|offer| self.clipboard.offer_source_actions_of(offer))
            .unwrap_or_default()
    }

    fn drag_formats(&self) -> Vec<DataFormat> {
        self.clipboard
            .drag_target()
            .and_then(|target| target.offer)
            .map(|offer| self.clipboard.offer_formats(offer))
            .unwrap_or_default()
    }

    /// Asks the hovered window what it accepts and, short of a drop, tells the compositor
    fn raise_drag(&mut self, kind: DragEventKind, data: Option<DropData>) -> DndAction {
        let Some(target) = self.clipboard.drag_target().copied() else {
            return DndAction::empty();
        };
        let allowed = self.drag_allowed();
        let event = DragEvent {
            kind,
            position: target.position,
            formats: self.drag_formats(),
            allowed,
            modifiers: self.input.modifiers(),
            data,
        };
        let answer = match self.windows.get_mut(&target.window) {
            Some(window) => window.events().drag(event),
            None => DndAction::empty(),
        };
        let action = answer & allowed;
        if kind != DragEventKind::Drop {
            self.clipboard.answer_drag(&mut self.backend, action);
        }
        action
    }

    pub fn source_event(&mut self, event: SourceEvent) {
        self.clipboard.source_event(&mut self.backend, event);
    }

    /// Handles data source events the backend collected during dispatch
    pub fn pump_source_events(&mut self) {
        for event in self.backend.take_source_events() {
            self.clipboard.source_event(&mut self.backend, event);
        }
    }

    pub fn set_clipboard(&mut self, payload: Payload) -> Result<()> {
        let serial = self.input.keyboard_enter_serial();
        self.clipboard
            .set_selection(&mut self.backend, payload, serial)
            .map(|_| ())
    }

    pub fn set_clipboard_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.set_clipboard(Payload::Text(text.into()))
    }

    pub fn set_clipboard_files(&mut self, uris: Vec<String>) -> Result<()> {
        self.set_clipboard(Payload::Uris(uris))
    }

    pub fn clear_clipboard(&mut self) {
        let serial = self.input.keyboard_enter_serial();
        self.clipboard.clear_selection(&mut self.backend, serial);
    }

    pub fn clipboard_formats(&self) -> Vec<DataFormat> {
        self.clipboard.selection_formats()
    }

    pub fn clipboard_text(&mut self) -> Option<String> {
        self.clipboard.selection_text(&mut self.backend)
    }

    pub fn clipboard_files(&mut self) -> Option<Vec<String>> {
        self.clipboard.selection_files(&mut self.backend)
    }

    pub fn clipboard_data(&mut self, mime_type: &str) -> Option<Vec<u8>> {
        self.clipboard.selection_data(&mut self.backend, mime_type)
    }

    /// Starts dragging `payload` out of `origin` with the last input serial
    pub fn start_drag(&mut self, origin: WindowId, payload: Payload, allowed: DndAction) -> Result<DragCompletion> {
        if !self.windows.contains_key(&origin) {
            return Err(PlatformError::contract(format!("unknown window {}", origin)));
        }
        let serial = self.input.last_serial();
        self.clipboard
            .start_drag(&mut self.backend, payload, allowed, origin, serial)
    }

    // Windows

    fn allocate_window(&mut self) -> WindowId {
        let id = WindowId(self.next_window);
        self.next_window += 1;
        id
    }

    fn initial_size(&self) -> PixelSize {
        let window = &self.config.window;
        match self.screens.primary() {
            Some(screen) if !screen.bounds.size().is_empty() => {
                let [fx, fy] = window.initial_screen_fraction;
                let logical = screen
                    .bounds
                    .size()
                    .scaled(1.0 / screen.scaling, 1.0 / screen.scaling);
                logical.scaled(fx, fy)
            }
            _ => PixelSize::new(window.default_width, window.default_height),
        }
    }

    pub fn create_toplevel(&mut self, events: Box<dyn WindowEvents>, options: ToplevelOptions) -> Result<WindowId> {
        let id = self.allocate_window();
        let size = options.size.unwrap_or_else(|| self.initial_size());
        let decorations = self.registry.is_bound(GlobalKind::DecorationManager).then(|| {
            if self.config.window.server_side_decorations {
                DecorationMode::ServerSide
            } else {
                DecorationMode::ClientSide
            }
        });
        let setup = ToplevelSetup {
            title: options.title,
            app_id: self.config.general.app_id.clone(),
            parent: options.parent,
            decorations,
            export: self.registry.is_bound(GlobalKind::Exporter),
        };

        self.backend.create_surface(id)?;
        if let Err(err) = self.backend.create_toplevel(id, &setup) {
            self.backend.destroy_surface(id);
            return Err(err);
        }
        let role = Role::Toplevel(ToplevelStateMachine::new());
        self.windows.insert(id, Window::new(id, role, events, size));
        // The bufferless commit asks the compositor for the first configure
        self.backend.commit(id);
        info!("🪟 Created toplevel {} \"{}\" ({}x{})", id, setup.title, size.width, size.height);
        Ok(id)
    }

    pub fn create_popup(&mut self, parent: WindowId, events: Box<dyn WindowEvents>, positioner: Positioner) -> Result<WindowId> {
        if !positioner.is_valid() {
            return Err(PlatformError::contract("popup positioner needs a size and anchor rectangle"));
        }
        if !self.windows.contains_key(&parent) {
            return Err(PlatformError::contract(format!("unknown popup parent {}", parent)));
        }
        let id = self.allocate_window();
        self.backend.create_surface(id)?;
        if let Err(err) = self.backend.create_popup(id, parent, &positioner) {
            self.backend.destroy_surface(id);
            return Err(err);
        }
        let role = Role::Popup(PopupState::new(parent, positioner));
        self.windows
            .insert(id, Window::new(id, role, events, positioner.size));
        self.backend.popup_grab(id, self.input.last_serial());
        self.backend.commit(id);
        info!("🪟 Created popup {} for {}", id, parent);
        Ok(id)
    }

    /// Moves a popup; ignored until both it and its parent have configured
    pub fn update_popup(&mut self, id: WindowId, positioner: Positioner) -> Result<()> {
        let parent = self
            .window(id)
            .and_then(Window::parent)
            .ok_or_else(|| PlatformError::contract(format!("{} is not a popup", id)))?;
        let parent_configured = self.window(parent).is_some_and(Window::is_configured);
        let window = self.window_mut(id)?;
        let token = window
            .popup_mut()
            .and_then(|popup| popup.update(positioner, parent_configured));
        match token {
            Some(token) => self.backend.reposition_popup(id, &positioner, token),
            None => debug!("Popup {} geometry stored until configured", id),
        }
        Ok(())
    }

    pub fn set_gpu_handle(&mut self, id: WindowId, gpu: Box<dyn GpuWindowHandle>) -> Result<()> {
        self.window_mut(id)?.set_gpu_handle(gpu);
        Ok(())
    }

    pub fn native_handles(&self, id: WindowId) -> Option<NativeHandles> {
        self.backend.native_handles(id)
    }

    pub fn export_handle(&self, id: WindowId) -> Option<&str> {
        self.window(id).and_then(Window::export_handle)
    }

    /// Application-initiated resize
    pub fn resize(&mut self, id: WindowId, size: PixelSize) -> Result<()> {
        let window = self.windows.get_mut(&id).ok_or_else(|| PlatformError::contract(format!("unknown window {}", id)))?;
        window.request_resize(size);
        let constraints = *window.constraints();
        if !constraints.resizable {
            window.set_constraints(&mut self.backend, constraints);
        }
        Ok(())
    }

    pub fn invalidate(&mut self, id: WindowId, region: PixelRect) -> Result<()> {
        let window = self.windows.get_mut(&id).ok_or_else(|| PlatformError::contract(format!("unknown window {}", id)))?;
        window.invalidate(&mut self.backend, region);
        Ok(())
    }

    fn toplevel_request(&mut self, id: WindowId, request: ToplevelRequest) -> Result<()> {
        let window = self.window_mut(id)?;
        if !window.is_toplevel() {
            return Err(PlatformError::contract(format!("{} is not a toplevel", id)));
        }
        self.backend.toplevel_request(id, request);
        Ok(())
    }

    pub fn set_title(&mut self, id: WindowId, title: impl Into<String>) -> Result<()> {
        self.toplevel_request(id, ToplevelRequest::SetTitle(title.into()))
    }

    pub fn set_parent(&mut self, id: WindowId, parent: Option<WindowId>) -> Result<()> {
        self.toplevel_request(id, ToplevelRequest::SetParent(parent))
    }

    pub fn set_constraints(&mut self, id: WindowId, constraints: WindowConstraints) -> Result<()> {
        let window = self.windows.get_mut(&id).ok_or_else(|| PlatformError::contract(format!("unknown window {}", id)))?;
        window.set_constraints(&mut self.backend, constraints);
        Ok(())
    }

    pub fn set_can_resize(&mut self, id: WindowId, resizable: bool) -> Result<()> {
        let constraints = WindowConstraints {
            resizable,
            ..*self.window_mut(id)?.constraints()
        };
        self.set_constraints(id, constraints)
    }

    pub fn set_window_state(&mut self, id: WindowId, state: WindowState) -> Result<()> {
        let window = self.windows.get_mut(&id).ok_or_else(|| PlatformError::contract(format!("unknown window {}", id)))?;
        window.set_window_state(&mut self.backend, state);
        Ok(())
    }

    pub fn begin_move(&mut self, id: WindowId) -> Result<()> {
        let serial = self.input.last_serial();
        self.toplevel_request(id, ToplevelRequest::Move { serial })
    }

    pub fn begin_resize(&mut self, id: WindowId, edge: ResizeEdge) -> Result<()> {
        let serial = self.input.last_serial();
        self.toplevel_request(id, ToplevelRequest::Resize { serial, edge })
    }

    pub fn request_decorations(&mut self, id: WindowId, mode: DecorationMode) -> Result<()> {
        self.toplevel_request(id, ToplevelRequest::SetDecorationMode(mode))
    }

    pub fn window_event(&mut self, id: WindowId, event: SurfaceEvent) {
        let Some(window) = self.windows.get_mut(&id) else {
            trace!("Event for destroyed window {}: {:?}", id, event);
            return;
        };
        match event {
            SurfaceEvent::Enter { output } => {
                if window.output_entered(output) {
                    self.update_scaling(id);
                }
            }
            SurfaceEvent::Leave { output } => {
                if window.output_left(output) {
                    self.update_scaling(id);
                }
            }
            SurfaceEvent::Configure { serial } => window.surface_configure(&mut self.backend, serial),
            SurfaceEvent::ToplevelConfigure { size, states } => window.toplevel_configure(size, states),
            SurfaceEvent::ToplevelClose => {
                if window.events().closing() {
                    self.destroy_window(id);
                } else {
                    debug!("Window {} vetoed close", id);
                }
            }
            SurfaceEvent::PopupConfigure { rect } => window.popup_configure(rect),
            SurfaceEvent::PopupDone => {
                debug!("Popup {} dismissed", id);
                self.destroy_window(id);
            }
            SurfaceEvent::Repositioned { token } => trace!("Popup {} repositioned ({})", id, token),
            SurfaceEvent::FrameDone { time } => window.frame_done(&mut self.backend, time),
            SurfaceEvent::DecorationConfigure(mode) => window.decorations_configured(mode),
            SurfaceEvent::Exported(handle) => window.set_export_handle(handle),
        }
    }

    /// Destroys a window after its popups: role object first, then the surface
    pub fn destroy_window(&mut self, id: WindowId) {
        let children: Vec<WindowId> = self
            .windows
            .values()
            .filter(|window| window.parent() == Some(id))
            .map(Window::id)
            .collect();
        for child in children {
            self.destroy_window(child);
        }

        let Some(mut window) = self.windows.remove(&id) else {
            return;
        };
        window.teardown();
        self.input.forget_window(id);
        if self.text_input.forget_window(id) {
            let requests = self.text_input.set_client(None);
            self.send_text_input(requests);
        }
        if !self.input.is_repeating() {
            self.stop_repeat();
        }
        if self.clipboard.drag_target().is_some_and(|drag| drag.window == id) {
            self.clipboard.drag_leave(&mut self.backend);
        }

        self.backend.destroy_role(id);
        self.backend.destroy_surface(id);
        window.events().closed();
        info!("🪟 Window {} destroyed", id);
    }
}

impl<B: Backend> LoopState for Platform<B> {
    fn shutdown(&mut self, cause: Option<&PlatformError>) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if let Some(err) = cause {
            error!("💥 Platform shutting down: {}", err);
        }

        self.stop_repeat();
        self.dispose_cursor_timer();
        for id in self.window_ids() {
            self.destroy_window(id);
        }
        self.clipboard.shutdown(&mut self.backend);
        if let Err(err) = self.backend.flush() {
            debug!("Flush during shutdown failed: {}", err);
        }
        info!("👋 Platform shut down");
    }
}
