//! wayland-client backend
//!
//! Owns every protocol object and maps the platform's requests onto them.
//! Events come back through the `Dispatch` implementations in [`dispatch`],
//! which translate them into the platform's event enums.
//!
//! Data sources live on a private event queue. A clipboard read of our own
//! selection round-trips that queue alone, so the `send` request for the
//! read can be served while the main queue is blocked inside the read.

mod dispatch;
mod shm;

pub use dispatch::SourceCollector;

use crate::clipboard::{DndAction, OfferId, SourceEvent, SourceId};
use crate::config::SkylightConfig;
use crate::error::{PlatformError, Result};
use crate::event_loop::{DisplayEventLoop, DisplaySource, FlushStatus, PendingRead, Timers};
use crate::geometry::{PixelPoint, PixelRect};
use crate::input::cursor::{BitmapPixels, Cursor, CursorBuffer, CursorImage, CursorShape};
use crate::input::text_input::{ContentHints, ContentPurpose, TextInputRequest};
use crate::input::Capabilities;
use crate::platform::{Backend, NativeHandles, Platform};
use crate::registry::GlobalKind;
use crate::window::{
    DecorationMode, Positioner, ToplevelRequest, ToplevelSetup, WindowId,
};
use log::{debug, info, warn};
use raw_window_handle::{
    RawDisplayHandle, RawWindowHandle, WaylandDisplayHandle, WaylandWindowHandle,
};
use std::collections::HashMap;
use std::ffi::c_void;
use std::os::fd::{AsFd, OwnedFd};
use std::ptr::NonNull;
use std::rc::Rc;
use wayland_backend::client::{ReadEventsGuard, WaylandError};
use wayland_client::protocol::{
    wl_buffer::WlBuffer, wl_compositor::WlCompositor, wl_data_device::WlDataDevice,
    wl_data_device_manager::{self, WlDataDeviceManager},
    wl_data_offer::WlDataOffer, wl_data_source::WlDataSource, wl_keyboard::WlKeyboard,
    wl_output::WlOutput, wl_pointer::WlPointer, wl_registry::WlRegistry, wl_seat::WlSeat,
    wl_shm::WlShm, wl_surface::WlSurface, wl_touch::WlTouch,
};
use wayland_client::{Connection, EventQueue, Proxy, QueueHandle};
use wayland_cursor::CursorTheme;
use wayland_protocols::wp::pointer_gestures::zv1::client::{
    zwp_pointer_gesture_pinch_v1::ZwpPointerGesturePinchV1,
    zwp_pointer_gesture_swipe_v1::ZwpPointerGestureSwipeV1,
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
    zxdg_exported_v2::ZxdgExportedV2, zxdg_exporter_v2::ZxdgExporterV2,
};
use wayland_protocols::xdg::shell::client::{
    xdg_popup::XdgPopup,
    xdg_positioner::{self, XdgPositioner},
    xdg_surface::XdgSurface,
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::XdgWmBase,
};

/// Loop state of a platform driven by a live compositor
pub type State = Platform<WaylandBackend>;

/// Protocol objects backing one window
struct SurfaceObjects {
    surface: WlSurface,
    xdg_surface: Option<XdgSurface>,
    role: Option<RoleObjects>,
}

enum RoleObjects {
    Toplevel {
        toplevel: XdgToplevel,
        decoration: Option<ZxdgToplevelDecorationV1>,
        exported: Option<ZxdgExportedV2>,
    },
    Popup(XdgPopup),
}

/// Globals bound from the registry
#[derive(Default)]
struct Globals {
    compositor: Option<WlCompositor>,
    shm: Option<WlShm>,
    seat: Option<WlSeat>,
    data_device_manager: Option<WlDataDeviceManager>,
    wm_base: Option<XdgWmBase>,
    decoration_manager: Option<ZxdgDecorationManagerV1>,
    exporter: Option<ZxdgExporterV2>,
    gestures: Option<ZwpPointerGesturesV1>,
    text_input_manager: Option<ZwpTextInputManagerV3>,
    outputs: HashMap<u32, WlOutput>,
}

/// Seat sub-devices currently alive
#[derive(Default)]
struct SeatDevices {
    pointer: Option<WlPointer>,
    keyboard: Option<WlKeyboard>,
    touch: Option<WlTouch>,
    pinch: Option<ZwpPointerGesturePinchV1>,
    swipe: Option<ZwpPointerGestureSwipeV1>,
    data_device: Option<WlDataDevice>,
    text_input: Option<ZwpTextInputV3>,
}

pub struct WaylandBackend {
    conn: Connection,
    qh: QueueHandle<State>,
    registry: WlRegistry,
    globals: Globals,
    devices: SeatDevices,

    surfaces: HashMap<WindowId, SurfaceObjects>,

    source_queue: EventQueue<SourceCollector>,
    source_qh: QueueHandle<SourceCollector>,
    collector: SourceCollector,
    sources: HashMap<SourceId, WlDataSource>,
    offers: HashMap<OfferId, WlDataOffer>,

    cursor_surface: Option<WlSurface>,
    cursor_theme: Option<CursorTheme>,
    cursor_name: String,
    cursor_size: u32,
    theme_cursors: HashMap<CursorShape, Option<Rc<Cursor>>>,
    buffers: HashMap<u64, WlBuffer>,
    next_buffer: u64,
}

fn transport(err: impl std::fmt::Display) -> PlatformError {
    PlatformError::Transport(err.to_string())
}

impl WaylandBackend {
    fn new(conn: Connection, qh: QueueHandle<State>, config: &SkylightConfig) -> Self {
        let registry = conn.display().get_registry(&qh, ());
        let source_queue = conn.new_event_queue();
        let source_qh = source_queue.handle();
        Self {
            conn,
            qh,
            registry,
            globals: Globals::default(),
            devices: SeatDevices::default(),
            surfaces: HashMap::new(),
            source_queue,
            source_qh,
            collector: SourceCollector::default(),
            sources: HashMap::new(),
            offers: HashMap::new(),
            cursor_surface: None,
            cursor_theme: None,
            cursor_name: config.cursor.resolved_theme(),
            cursor_size: config.cursor.resolved_size().max(1),
            theme_cursors: HashMap::new(),
            buffers: HashMap::new(),
            next_buffer: 1,
        }
    }

    fn surface(&self, window: WindowId) -> Option<&WlSurface> {
        self.surfaces.get(&window).map(|objects| &objects.surface)
    }

    fn xdg_surface(&self, window: WindowId) -> Option<&XdgSurface> {
        self.surfaces
            .get(&window)
            .and_then(|objects| objects.xdg_surface.as_ref())
    }

    fn toplevel(&self, window: WindowId) -> Option<&XdgToplevel> {
        match self.surfaces.get(&window)?.role.as_ref()? {
            RoleObjects::Toplevel { toplevel, .. } => Some(toplevel),
            RoleObjects::Popup(_) => None,
        }
    }

    fn popup(&self, window: WindowId) -> Option<&XdgPopup> {
        match self.surfaces.get(&window)?.role.as_ref()? {
            RoleObjects::Popup(popup) => Some(popup),
            RoleObjects::Toplevel { .. } => None,
        }
    }

    /// The data device needs both the seat and the manager, whichever binds last
    fn ensure_data_device(&mut self) {
        if self.devices.data_device.is_some() {
            return;
        }
        if let (Some(manager), Some(seat)) = (
            self.globals.data_device_manager.as_ref(),
            self.globals.seat.as_ref(),
        ) {
            self.devices.data_device = Some(manager.get_data_device(seat, &self.qh, ()));
            debug!("📋 Data device created");
        }
    }

    /// One text input per seat, created once both the seat and the manager exist
    fn ensure_text_input(&mut self) {
        if self.devices.text_input.is_some() {
            return;
        }
        if let (Some(manager), Some(seat)) = (
            self.globals.text_input_manager.as_ref(),
            self.globals.seat.as_ref(),
        ) {
            self.devices.text_input = Some(manager.get_text_input(seat, &self.qh, ()));
            debug!("⌨️ Text input created");
        }
    }

    fn destroy_text_input(&mut self) {
        if let Some(text_input) = self.devices.text_input.take() {
            text_input.destroy();
        }
    }

    fn create_gestures(&mut self) {
        let (Some(gestures), Some(pointer)) =
            (self.globals.gestures.as_ref(), self.devices.pointer.as_ref())
        else {
            return;
        };
        self.devices.pinch = Some(gestures.get_pinch_gesture(pointer, &self.qh, ()));
        self.devices.swipe = Some(gestures.get_swipe_gesture(pointer, &self.qh, ()));
    }

    fn destroy_gestures(&mut self) {
        if let Some(pinch) = self.devices.pinch.take() {
            pinch.destroy();
        }
        if let Some(swipe) = self.devices.swipe.take() {
            swipe.destroy();
        }
    }

    fn register_buffer(&mut self, buffer: WlBuffer) -> CursorBuffer {
        let key = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(key, buffer);
        CursorBuffer(key)
    }

    fn load_theme(&mut self) -> Option<&mut CursorTheme> {
        if self.cursor_theme.is_none() {
            let shm = self.globals.shm.clone()?;
            match CursorTheme::load_from_name(&self.conn, shm, &self.cursor_name, self.cursor_size) {
                Ok(theme) => {
                    info!("🖱️ Cursor theme {} ({}px) loaded", self.cursor_name, self.cursor_size);
                    self.cursor_theme = Some(theme);
                }
                Err(err) => {
                    warn!("⚠️ Cursor theme {} unavailable: {}", self.cursor_name, err);
                    return None;
                }
            }
        }
        self.cursor_theme.as_mut()
    }

    fn ensure_cursor_surface(&mut self) -> Option<WlSurface> {
        if self.cursor_surface.is_none() {
            let compositor = self.globals.compositor.as_ref()?;
            self.cursor_surface = Some(compositor.create_surface(&self.qh, ()));
        }
        self.cursor_surface.clone()
    }
}

fn positioner_request(positioner: &XdgPositioner, geometry: &Positioner) {
    positioner.set_size(geometry.size.width as i32, geometry.size.height as i32);
    let anchor = geometry.anchor_rect;
    positioner.set_anchor_rect(anchor.x, anchor.y, anchor.width as i32, anchor.height as i32);
    if let Ok(edge) = xdg_positioner::Anchor::try_from(geometry.anchor.protocol_value()) {
        positioner.set_anchor(edge);
    }
    if let Ok(gravity) = xdg_positioner::Gravity::try_from(geometry.gravity.protocol_value()) {
        positioner.set_gravity(gravity);
    }
    positioner.set_offset(geometry.offset.x, geometry.offset.y);
    positioner.set_constraint_adjustment(xdg_positioner::ConstraintAdjustment::from_bits_truncate(
        geometry.constraints.bits(),
    ).into());
}

fn wire_actions(actions: DndAction) -> wl_data_device_manager::DndAction {
    wl_data_device_manager::DndAction::from_bits_truncate(actions.bits())
}

fn wire_hints(hints: ContentHints) -> zwp_text_input_v3::ContentHint {
    zwp_text_input_v3::ContentHint::from_bits_truncate(hints.bits())
}

fn wire_purpose(purpose: ContentPurpose) -> zwp_text_input_v3::ContentPurpose {
    use zwp_text_input_v3::ContentPurpose as Wire;
    match purpose {
        ContentPurpose::Normal => Wire::Normal,
        ContentPurpose::Alpha => Wire::Alpha,
        ContentPurpose::Digits => Wire::Digits,
        ContentPurpose::Number => Wire::Number,
        ContentPurpose::Phone => Wire::Phone,
        ContentPurpose::Url => Wire::Url,
        ContentPurpose::Email => Wire::Email,
        ContentPurpose::Name => Wire::Name,
        ContentPurpose::Password => Wire::Password,
        ContentPurpose::Pin => Wire::Pin,
    }
}

fn wire_decoration(mode: DecorationMode) -> zxdg_toplevel_decoration_v1::Mode {
    match mode {
        DecorationMode::ClientSide => zxdg_toplevel_decoration_v1::Mode::ClientSide,
        DecorationMode::ServerSide => zxdg_toplevel_decoration_v1::Mode::ServerSide,
    }
}

impl Backend for WaylandBackend {
    fn bind_global(&mut self, name: u32, kind: GlobalKind, version: u32) -> Result<()> {
        let registry = &self.registry;
        let qh = &self.qh;
        match kind {
            GlobalKind::Compositor => {
                self.globals.compositor = Some(registry.bind(name, version, qh, ()));
            }
            GlobalKind::Shm => self.globals.shm = Some(registry.bind(name, version, qh, ())),
            GlobalKind::Seat => {
                self.globals.seat = Some(registry.bind(name, version, qh, ()));
                self.ensure_data_device();
                self.ensure_text_input();
            }
            GlobalKind::DataDeviceManager => {
                self.globals.data_device_manager = Some(registry.bind(name, version, qh, ()));
                self.ensure_data_device();
            }
            GlobalKind::WmBase => self.globals.wm_base = Some(registry.bind(name, version, qh, ())),
            GlobalKind::Output => {
                let output: WlOutput = registry.bind(name, version, qh, name);
                self.globals.outputs.insert(name, output);
            }
            GlobalKind::DecorationManager => {
                self.globals.decoration_manager = Some(registry.bind(name, version, qh, ()));
            }
            GlobalKind::Exporter => self.globals.exporter = Some(registry.bind(name, version, qh, ())),
            GlobalKind::PointerGestures => {
                self.globals.gestures = Some(registry.bind(name, version, qh, ()));
                self.create_gestures();
            }
            GlobalKind::TextInputManager => {
                self.globals.text_input_manager = Some(registry.bind(name, version, qh, ()));
                self.ensure_text_input();
            }
        }
        Ok(())
    }

    fn unbind_global(&mut self, name: u32, kind: GlobalKind) {
        match kind {
            GlobalKind::Output => {
                if let Some(output) = self.globals.outputs.remove(&name) {
                    if output.version() >= 3 {
                        output.release();
                    }
                }
            }
            GlobalKind::Seat => {
                self.destroy_text_input();
                if let Some(device) = self.devices.data_device.take() {
                    if device.version() >= 2 {
                        device.release();
                    }
                }
                if let Some(seat) = self.globals.seat.take() {
                    if seat.version() >= 5 {
                        seat.release();
                    }
                }
            }
            GlobalKind::DataDeviceManager => {
                self.globals.data_device_manager = None;
                if let Some(device) = self.devices.data_device.take() {
                    if device.version() >= 2 {
                        device.release();
                    }
                }
            }
            GlobalKind::DecorationManager => {
                if let Some(manager) = self.globals.decoration_manager.take() {
                    manager.destroy();
                }
            }
            GlobalKind::Exporter => {
                if let Some(exporter) = self.globals.exporter.take() {
                    exporter.destroy();
                }
            }
            GlobalKind::PointerGestures => {
                self.destroy_gestures();
                self.globals.gestures = None;
            }
            GlobalKind::TextInputManager => {
                self.destroy_text_input();
                if let Some(manager) = self.globals.text_input_manager.take() {
                    manager.destroy();
                }
            }
            GlobalKind::Compositor => self.globals.compositor = None,
            GlobalKind::Shm => self.globals.shm = None,
            GlobalKind::WmBase => self.globals.wm_base = None,
        }
    }

    fn create_input_device(&mut self, device: Capabilities) -> Result<()> {
        let seat = self
            .globals
            .seat
            .as_ref()
            .ok_or(PlatformError::MissingGlobal("wl_seat"))?;
        if device == Capabilities::POINTER {
            self.devices.pointer = Some(seat.get_pointer(&self.qh, ()));
            self.create_gestures();
        } else if device == Capabilities::KEYBOARD {
            self.devices.keyboard = Some(seat.get_keyboard(&self.qh, ()));
        } else if device == Capabilities::TOUCH {
            self.devices.touch = Some(seat.get_touch(&self.qh, ()));
        }
        debug!("🎮 Created {:?} device", device);
        Ok(())
    }

    fn release_input_device(&mut self, device: Capabilities) {
        if device == Capabilities::POINTER {
            self.destroy_gestures();
            if let Some(pointer) = self.devices.pointer.take() {
                if pointer.version() >= 3 {
                    pointer.release();
                }
            }
        } else if device == Capabilities::KEYBOARD {
            if let Some(keyboard) = self.devices.keyboard.take() {
                if keyboard.version() >= 3 {
                    keyboard.release();
                }
            }
        } else if device == Capabilities::TOUCH {
            if let Some(touch) = self.devices.touch.take() {
                if touch.version() >= 3 {
                    touch.release();
                }
            }
        }
        debug!("🎮 Released {:?} device", device);
    }

    fn pong(&mut self, serial: u32) {
        if let Some(wm_base) = self.globals.wm_base.as_ref() {
            wm_base.pong(serial);
        }
    }

    fn text_input_request(&mut self, request: TextInputRequest) {
        let Some(text_input) = self.devices.text_input.as_ref() else {
            return;
        };
        match request {
            TextInputRequest::Enable => text_input.enable(),
            TextInputRequest::Disable => text_input.disable(),
            TextInputRequest::SetCursorRectangle(rect) => {
                text_input.set_cursor_rectangle(rect.x, rect.y, rect.width as i32, rect.height as i32)
            }
            TextInputRequest::SetContentType { hints, purpose } => {
                text_input.set_content_type(wire_hints(hints), wire_purpose(purpose))
            }
            TextInputRequest::Commit => text_input.commit(),
        }
    }

    fn show_cursor(&mut self, serial: u32, image: Option<&CursorImage>) {
        let Some(pointer) = self.devices.pointer.clone() else {
            return;
        };
        let Some(image) = image else {
            pointer.set_cursor(serial, None, 0, 0);
            return;
        };
        let Some(buffer) = self.buffers.get(&image.buffer.0).cloned() else {
            warn!("⚠️ Unknown cursor buffer {:?}", image.buffer);
            return;
        };
        let Some(surface) = self.ensure_cursor_surface() else {
            return;
        };
        pointer.set_cursor(serial, Some(&surface), image.hotspot.x, image.hotspot.y);
        surface.attach(Some(&buffer), 0, 0);
        surface.damage(0, 0, image.size.width as i32, image.size.height as i32);
        surface.commit();
    }

    fn load_theme_cursor(&mut self, shape: CursorShape) -> Option<Rc<Cursor>> {
        if let Some(cached) = self.theme_cursors.get(&shape) {
            return cached.clone();
        }

        let mut frames: Vec<(WlBuffer, CursorImage)> = Vec::new();
        if let Some(theme) = self.load_theme() {
            let name = shape
                .theme_names()
                .iter()
                .copied()
                .find(|name| theme.get_cursor(name).is_some());
            let cursor = match name {
                Some(name) => theme.get_cursor(name),
                None => None,
            };
            if let Some(cursor) = cursor {
                for index in 0..cursor.image_count() {
                    let image = &cursor[index];
                    let (width, height) = image.dimensions();
                    let (hx, hy) = image.hotspot();
                    let buffer: WlBuffer = (**image).clone();
                    frames.push((
                        buffer,
                        CursorImage {
                            buffer: CursorBuffer(0),
                            size: crate::geometry::PixelSize::new(width, height),
                            hotspot: PixelPoint::new(hx as i32, hy as i32),
                            delay: std::time::Duration::from_millis(image.delay() as u64),
                        },
                    ));
                }
            }
        }

        let images: Vec<CursorImage> = frames
            .into_iter()
            .map(|(buffer, image)| CursorImage {
                buffer: self.register_buffer(buffer),
                ..image
            })
            .collect();
        let cursor = Cursor::new(images).ok();
        if cursor.is_none() {
            debug!("🖱️ Theme {} has no cursor for {:?}", self.cursor_name, shape);
        }
        self.theme_cursors.insert(shape, cursor.clone());
        cursor
    }

    fn create_bitmap_cursor(&mut self, pixels: &BitmapPixels, hotspot: PixelPoint) -> Result<Rc<Cursor>> {
        let shm = self
            .globals
            .shm
            .clone()
            .ok_or(PlatformError::MissingGlobal("wl_shm"))?;
        // TODO: release bitmap cursor buffers once no Cursor refers to them
        let buffer = shm::bitmap_buffer(&shm, pixels, &self.qh)?;
        let image = CursorImage {
            buffer: self.register_buffer(buffer),
            size: pixels.size,
            hotspot,
            delay: std::time::Duration::ZERO,
        };
        Cursor::new(vec![image])
    }

    fn create_data_source(&mut self, source: SourceId, mime_types: &[String], actions: DndAction) -> Result<()> {
        let manager = self
            .globals
            .data_device_manager
            .as_ref()
            .ok_or_else(|| PlatformError::unavailable("data source", "no wl_data_device_manager"))?;
        let wl_source = manager.create_data_source(&self.source_qh, source);
        for mime_type in mime_types {
            wl_source.offer(mime_type.clone());
        }
        if !actions.is_empty() && wl_source.version() >= 3 {
            wl_source.set_actions(wire_actions(actions));
        }
        self.sources.insert(source, wl_source);
        Ok(())
    }

    fn destroy_data_source(&mut self, source: SourceId) {
        if let Some(wl_source) = self.sources.remove(&source) {
            wl_source.destroy();
        }
    }

    fn set_selection(&mut self, source: Option<SourceId>, serial: u32) {
        let Some(device) = self.devices.data_device.as_ref() else {
            return;
        };
        let wl_source = source.and_then(|id| self.sources.get(&id));
        device.set_selection(wl_source, serial);
    }

    fn start_drag(&mut self, source: SourceId, origin: WindowId, serial: u32) {
        let (Some(device), Some(surface)) = (self.devices.data_device.as_ref(), self.surface(origin)) else {
            return;
        };
        device.start_drag(self.sources.get(&source), surface, None, serial);
    }

    fn receive(&mut self, offer: OfferId, mime_type: &str, fd: OwnedFd) {
        if let Some(wl_offer) = self.offers.get(&offer) {
            wl_offer.receive(mime_type.to_string(), fd.as_fd());
        }
        // The request carries a duplicate; our end closes here
        drop(fd);
    }

    fn accept_offer(&mut self, offer: OfferId, serial: u32, mime_type: Option<&str>) {
        if let Some(wl_offer) = self.offers.get(&offer) {
            wl_offer.accept(serial, mime_type.map(str::to_string));
        }
    }

    fn set_offer_actions(&mut self, offer: OfferId, actions: DndAction, preferred: DndAction) {
        if let Some(wl_offer) = self.offers.get(&offer).filter(|o| o.version() >= 3) {
            wl_offer.set_actions(wire_actions(actions), wire_actions(preferred));
        }
    }

    fn finish_offer(&mut self, offer: OfferId) {
        if let Some(wl_offer) = self.offers.get(&offer).filter(|o| o.version() >= 3) {
            wl_offer.finish();
        }
    }

    fn destroy_offer(&mut self, offer: OfferId) {
        if let Some(wl_offer) = self.offers.remove(&offer) {
            wl_offer.destroy();
        }
    }

    fn roundtrip(&mut self) -> Result<Vec<SourceEvent>> {
        self.source_queue
            .roundtrip(&mut self.collector)
            .map_err(transport)?;
        Ok(self.collector.take())
    }

    fn take_source_events(&mut self) -> Vec<SourceEvent> {
        if let Err(err) = self.source_queue.dispatch_pending(&mut self.collector) {
            warn!("⚠️ Data source dispatch failed: {}", err);
        }
        self.collector.take()
    }

    fn create_surface(&mut self, window: WindowId) -> Result<()> {
        let compositor = self
            .globals
            .compositor
            .as_ref()
            .ok_or(PlatformError::MissingGlobal("wl_compositor"))?;
        let surface = compositor.create_surface(&self.qh, window);
        self.surfaces.insert(
            window,
            SurfaceObjects {
                surface,
                xdg_surface: None,
                role: None,
            },
        );
        Ok(())
    }

    fn create_toplevel(&mut self, window: WindowId, setup: &ToplevelSetup) -> Result<()> {
        let wm_base = self
            .globals
            .wm_base
            .as_ref()
            .ok_or(PlatformError::MissingGlobal("xdg_wm_base"))?;
        let parent = setup.parent.and_then(|parent| self.toplevel(parent)).cloned();
        let objects = self
            .surfaces
            .get_mut(&window)
            .ok_or_else(|| PlatformError::contract(format!("no surface for {}", window)))?;

        let xdg_surface = wm_base.get_xdg_surface(&objects.surface, &self.qh, window);
        let toplevel = xdg_surface.get_toplevel(&self.qh, window);
        toplevel.set_title(setup.title.clone());
        if let Some(app_id) = &setup.app_id {
            toplevel.set_app_id(app_id.clone());
        }
        if parent.is_some() {
            toplevel.set_parent(parent.as_ref());
        }

        let decoration = match (setup.decorations, self.globals.decoration_manager.as_ref()) {
            (Some(mode), Some(manager)) => {
                let decoration = manager.get_toplevel_decoration(&toplevel, &self.qh, window);
                decoration.set_mode(wire_decoration(mode));
                Some(decoration)
            }
            _ => None,
        };
        let exported = match (setup.export, self.globals.exporter.as_ref()) {
            (true, Some(exporter)) => Some(exporter.export_toplevel(&objects.surface, &self.qh, window)),
            _ => None,
        };

        objects.xdg_surface = Some(xdg_surface);
        objects.role = Some(RoleObjects::Toplevel {
            toplevel,
            decoration,
            exported,
        });
        Ok(())
    }

    fn create_popup(&mut self, window: WindowId, parent: WindowId, geometry: &Positioner) -> Result<()> {
        let wm_base = self
            .globals
            .wm_base
            .as_ref()
            .ok_or(PlatformError::MissingGlobal("xdg_wm_base"))?;
        let parent_surface = self
            .xdg_surface(parent)
            .cloned()
            .ok_or_else(|| PlatformError::contract(format!("popup parent {} has no role", parent)))?;
        let objects = self
            .surfaces
            .get_mut(&window)
            .ok_or_else(|| PlatformError::contract(format!("no surface for {}", window)))?;

        let positioner = wm_base.create_positioner(&self.qh, ());
        positioner_request(&positioner, geometry);
        let xdg_surface = wm_base.get_xdg_surface(&objects.surface, &self.qh, window);
        let popup = xdg_surface.get_popup(Some(&parent_surface), &positioner, &self.qh, window);
        positioner.destroy();

        objects.xdg_surface = Some(xdg_surface);
        objects.role = Some(RoleObjects::Popup(popup));
        Ok(())
    }

    fn popup_grab(&mut self, window: WindowId, serial: u32) {
        if let (Some(popup), Some(seat)) = (self.popup(window), self.globals.seat.as_ref()) {
            popup.grab(seat, serial);
        }
    }

    fn reposition_popup(&mut self, window: WindowId, geometry: &Positioner, token: u32) {
        let (Some(popup), Some(wm_base)) = (self.popup(window), self.globals.wm_base.as_ref()) else {
            return;
        };
        if popup.version() < 3 {
            debug!("Popup {} cannot be repositioned at xdg_wm_base v{}", window, popup.version());
            return;
        }
        let positioner = wm_base.create_positioner(&self.qh, ());
        positioner_request(&positioner, geometry);
        popup.reposition(&positioner, token);
        positioner.destroy();
    }

    fn toplevel_request(&mut self, window: WindowId, request: ToplevelRequest) {
        let Some(toplevel) = self.toplevel(window) else {
            return;
        };
        match request {
            ToplevelRequest::SetTitle(title) => toplevel.set_title(title),
            ToplevelRequest::SetAppId(app_id) => toplevel.set_app_id(app_id),
            ToplevelRequest::SetMinSize(size) => {
                toplevel.set_min_size(size.width as i32, size.height as i32)
            }
            ToplevelRequest::SetMaxSize(size) => {
                toplevel.set_max_size(size.width as i32, size.height as i32)
            }
            ToplevelRequest::SetMaximized => toplevel.set_maximized(),
            ToplevelRequest::UnsetMaximized => toplevel.unset_maximized(),
            ToplevelRequest::SetFullscreen => toplevel.set_fullscreen(None),
            ToplevelRequest::UnsetFullscreen => toplevel.unset_fullscreen(),
            ToplevelRequest::SetMinimized => toplevel.set_minimized(),
            ToplevelRequest::Move { serial } => {
                if let Some(seat) = self.globals.seat.as_ref() {
                    toplevel._move(seat, serial);
                }
            }
            ToplevelRequest::Resize { serial, edge } => {
                let Some(seat) = self.globals.seat.as_ref() else {
                    return;
                };
                if let Ok(edge) = xdg_toplevel::ResizeEdge::try_from(edge.protocol_value()) {
                    toplevel.resize(seat, serial, edge);
                }
            }
            ToplevelRequest::SetParent(parent) => {
                let parent = parent.and_then(|parent| self.toplevel(parent));
                toplevel.set_parent(parent);
            }
            ToplevelRequest::SetDecorationMode(mode) => {
                if let Some(RoleObjects::Toplevel {
                    decoration: Some(decoration),
                    ..
                }) = self.surfaces.get(&window).and_then(|o| o.role.as_ref())
                {
                    decoration.set_mode(wire_decoration(mode));
                }
            }
        }
    }

    fn ack_configure(&mut self, window: WindowId, serial: u32) {
        if let Some(xdg_surface) = self.xdg_surface(window) {
            xdg_surface.ack_configure(serial);
        }
    }

    fn request_frame(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.frame(&self.qh, window);
        }
    }

    fn damage(&mut self, window: WindowId, region: PixelRect) {
        if let Some(surface) = self.surface(window) {
            surface.damage(region.x, region.y, region.width as i32, region.height as i32);
        }
    }

    fn set_buffer_scale(&mut self, window: WindowId, scale: i32) {
        if let Some(surface) = self.surface(window).filter(|s| s.version() >= 3) {
            surface.set_buffer_scale(scale);
        }
    }

    fn commit(&mut self, window: WindowId) {
        if let Some(surface) = self.surface(window) {
            surface.commit();
        }
    }

    fn destroy_role(&mut self, window: WindowId) {
        let Some(objects) = self.surfaces.get_mut(&window) else {
            return;
        };
        match objects.role.take() {
            Some(RoleObjects::Toplevel {
                toplevel,
                decoration,
                exported,
            }) => {
                if let Some(decoration) = decoration {
                    decoration.destroy();
                }
                if let Some(exported) = exported {
                    exported.destroy();
                }
                toplevel.destroy();
            }
            Some(RoleObjects::Popup(popup)) => popup.destroy(),
            None => {}
        }
        if let Some(xdg_surface) = objects.xdg_surface.take() {
            xdg_surface.destroy();
        }
    }

    fn destroy_surface(&mut self, window: WindowId) {
        if let Some(objects) = self.surfaces.remove(&window) {
            objects.surface.destroy();
        }
    }

    fn native_handles(&self, window: WindowId) -> Option<NativeHandles> {
        let surface = NonNull::new(self.surface(window)?.id().as_ptr().cast::<c_void>())?;
        let display = NonNull::new(self.conn.backend().display_ptr().cast::<c_void>())?;
        Some(NativeHandles {
            window: RawWindowHandle::Wayland(WaylandWindowHandle::new(surface)),
            display: RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display)),
        })
    }

    fn flush(&mut self) -> Result<()> {
        match self.conn.flush() {
            Ok(()) => Ok(()),
            Err(WaylandError::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(transport(err)),
        }
    }
}

impl std::fmt::Debug for WaylandBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaylandBackend")
            .field("surfaces", &self.surfaces.len())
            .field("sources", &self.sources.len())
            .field("offers", &self.offers.len())
            .field("outputs", &self.globals.outputs.len())
            .finish()
    }
}

/// The main event queue as the display loop sees it
pub struct WaylandSource {
    conn: Connection,
    queue: EventQueue<State>,
}

pub struct WaylandRead(ReadEventsGuard);

impl PendingRead for WaylandRead {
    fn read(self) -> Result<usize> {
        match self.0.read() {
            Ok(count) => Ok(count),
            Err(WaylandError::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => Err(transport(err)),
        }
    }
}

impl DisplaySource<State> for WaylandSource {
    type Read = WaylandRead;

    fn prepare_read(&mut self) -> Option<WaylandRead> {
        self.queue.prepare_read().map(WaylandRead)
    }

    fn dispatch_pending(&mut self, state: &mut State) -> Result<usize> {
        let dispatched = self.queue.dispatch_pending(state).map_err(transport)?;
        state.pump_source_events();
        Ok(dispatched)
    }

    fn flush(&mut self) -> Result<FlushStatus> {
        match self.conn.flush() {
            Ok(()) => Ok(FlushStatus::Flushed),
            Err(WaylandError::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
                Ok(FlushStatus::WouldBlock)
            }
            Err(err) => Err(transport(err)),
        }
    }

    fn duplicate_fd(&self) -> Result<OwnedFd> {
        Ok(self.conn.backend().poll_fd().try_clone_to_owned()?)
    }
}

/// Connects to `$WAYLAND_DISPLAY` and binds the globals
///
/// Two round-trips run before returning: the first binds globals, the second
/// collects the initial output and seat state they announce.
pub fn connect(config: SkylightConfig) -> Result<(DisplayEventLoop<State, WaylandSource>, State)> {
    let conn = Connection::connect_to_env().map_err(|err| PlatformError::Connect(err.to_string()))?;
    info!("🔗 Connected to the compositor");

    let mut queue = conn.new_event_queue::<State>();
    let backend = WaylandBackend::new(conn.clone(), queue.handle(), &config);
    let timers = Timers::new();
    let mut state = Platform::new(backend, config, timers.clone());

    queue.roundtrip(&mut state).map_err(transport)?;
    state.check_globals()?;
    queue.roundtrip(&mut state).map_err(transport)?;

    let source = WaylandSource { conn, queue };
    let event_loop = DisplayEventLoop::new(source, timers)?;
    Ok((event_loop, state))
}
