//! Surface and shell-role state for one window
//!
//! A [`Window`] owns a protocol surface plus its toplevel or popup role and
//! runs the configure handshake:
//! - role configures only stage a pending size and state set
//! - the surface configure applies them (GPU resize, then `resized`), and only then acks
//! - application resizes go through the same apply step without an ack
//!
//! All protocol requests go through [`Backend`], so the handshake is testable
//! without a compositor.

pub mod frame;
pub mod popup;
pub mod toplevel;

pub use frame::FramePacer;
pub use popup::{ConstraintAdjustment, PopupEdge, PopupState, Positioner};
pub use toplevel::{
    DecorationMode, ResizeEdge, StateChange, ToplevelRequest, ToplevelSetup, ToplevelStateMachine,
    ToplevelStates, WindowState,
};

use crate::clipboard::{DndAction, DragEvent};
use crate::geometry::{PixelPoint, PixelRect, PixelSize};
use crate::input::InputEvent;
use crate::platform::Backend;
use log::{debug, trace};
use std::fmt;
use std::time::Duration;

/// Client-side window key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a window's client size changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResizeReason {
    /// The compositor configured a new size
    Layout,
    /// The application asked for it
    Application,
    DpiChange,
}

/// Toolkit callbacks, invoked synchronously on the loop thread
pub trait WindowEvents {
    fn input(&mut self, event: InputEvent);

    fn paint(&mut self, _region: PixelRect) {}

    fn resized(&mut self, _size: PixelSize, _reason: ResizeReason) {}

    fn scaling_changed(&mut self, _scaling: f64) {}

    /// Return false to veto a compositor close request
    fn closing(&mut self) -> bool {
        true
    }

    fn closed(&mut self) {}

    fn state_changed(&mut self, _state: WindowState) {}

    fn activated(&mut self) {}

    fn deactivated(&mut self) {}

    fn position_changed(&mut self, _position: PixelPoint) {}

    /// Frame heartbeat with the time since the previous frame
    fn render_tick(&mut self, _delta: Duration) {}

    fn decorations_changed(&mut self, _client_side: bool) {}

    /// Drag over this window; the answer is the action it would accept
    fn drag(&mut self, _event: DragEvent) -> DndAction {
        DndAction::empty()
    }
}

/// Opaque GPU surface bound to the window's native handle
pub trait GpuWindowHandle {
    /// Called with the buffer size in physical pixels before `resized` is raised
    fn resize(&mut self, size: PixelSize);
}

/// Size limits and resizability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConstraints {
    pub min_size: Option<PixelSize>,
    pub max_size: Option<PixelSize>,
    pub resizable: bool,
}

impl Default for WindowConstraints {
    fn default() -> Self {
        Self {
            min_size: None,
            max_size: None,
            resizable: true,
        }
    }
}

impl WindowConstraints {
    /// Limits a compositor-proposed size; a fixed-size window stays at `current`
    pub fn clamp(&self, size: PixelSize, current: PixelSize) -> PixelSize {
        if !self.resizable {
            return current;
        }
        self.clamp_to_limits(size)
    }

    /// Applies the min/max limits only
    pub fn clamp_to_limits(&self, size: PixelSize) -> PixelSize {
        let mut width = size.width;
        let mut height = size.height;
        if let Some(min) = self.min_size {
            width = width.max(min.width);
            height = height.max(min.height);
        }
        if let Some(max) = self.max_size {
            if max.width > 0 {
                width = width.min(max.width);
            }
            if max.height > 0 {
                height = height.min(max.height);
            }
        }
        PixelSize::new(width, height)
    }

    /// Shell requests expressing these limits for a window of `current` size
    pub fn requests(&self, current: PixelSize) -> [ToplevelRequest; 2] {
        if !self.resizable {
            return [
                ToplevelRequest::SetMinSize(current),
                ToplevelRequest::SetMaxSize(current),
            ];
        }
        [
            ToplevelRequest::SetMinSize(self.min_size.unwrap_or_default()),
            ToplevelRequest::SetMaxSize(self.max_size.unwrap_or_default()),
        ]
    }
}

#[derive(Debug)]
pub enum Role {
    Toplevel(ToplevelStateMachine),
    Popup(PopupState),
}

pub struct Window {
    id: WindowId,
    role: Role,
    events: Box<dyn WindowEvents>,
    gpu: Option<Box<dyn GpuWindowHandle>>,

    pending_size: Option<PixelSize>,
    client_size: PixelSize,
    pending_states: Option<ToplevelStates>,
    configure_serial: Option<u32>,
    configures: u64,

    scaling: f64,
    outputs: Vec<u32>,
    frame: FramePacer,
    constraints: WindowConstraints,
    decorations: Option<DecorationMode>,
    export_handle: Option<String>,
}

impl Window {
    pub fn new(id: WindowId, role: Role, events: Box<dyn WindowEvents>, size: PixelSize) -> Self {
        Self {
            id,
            role,
            events,
            gpu: None,
            pending_size: None,
            client_size: size,
            pending_states: None,
            configure_serial: None,
            configures: 0,
            scaling: 1.0,
            outputs: Vec::new(),
            frame: FramePacer::new(),
            constraints: WindowConstraints::default(),
            decorations: None,
            export_handle: None,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn events(&mut self) -> &mut dyn WindowEvents {
        self.events.as_mut()
    }

    pub fn is_toplevel(&self) -> bool {
        matches!(self.role, Role::Toplevel(_))
    }

    pub fn parent(&self) -> Option<WindowId> {
        match &self.role {
            Role::Popup(popup) => Some(popup.parent()),
            Role::Toplevel(_) => None,
        }
    }

    pub fn client_size(&self) -> PixelSize {
        self.client_size
    }

    pub fn pending_size(&self) -> Option<PixelSize> {
        self.pending_size
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Integer factor the surface's buffers are rendered at
    pub fn buffer_scale(&self) -> i32 {
        self.scaling.ceil().max(1.0) as i32
    }

    /// Client size in physical pixels
    pub fn buffer_size(&self) -> PixelSize {
        let scale = self.buffer_scale() as f64;
        self.client_size.scaled(scale, scale)
    }

    pub fn window_state(&self) -> WindowState {
        match &self.role {
            Role::Toplevel(toplevel) => toplevel.state(),
            Role::Popup(_) => WindowState::Normal,
        }
    }

    pub fn is_active(&self) -> bool {
        match &self.role {
            Role::Toplevel(toplevel) => toplevel.is_active(),
            Role::Popup(_) => false,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configure_serial.is_some()
    }

    /// Number of surface configures handled (and acknowledged)
    pub fn configure_count(&self) -> u64 {
        self.configures
    }

    pub fn frame_pending(&self) -> bool {
        self.frame.is_pending()
    }

    pub fn constraints(&self) -> &WindowConstraints {
        &self.constraints
    }

    pub fn decorations(&self) -> Option<DecorationMode> {
        self.decorations
    }

    pub fn export_handle(&self) -> Option<&str> {
        self.export_handle.as_deref()
    }

    pub fn outputs(&self) -> &[u32] {
        &self.outputs
    }

    pub fn set_gpu_handle(&mut self, mut gpu: Box<dyn GpuWindowHandle>) {
        gpu.resize(self.buffer_size());
        self.gpu = Some(gpu);
    }

    // Configure handshake

    /// Stages a toplevel configure; `None` means the client picks the size
    pub fn toplevel_configure(&mut self, size: Option<PixelSize>, states: ToplevelStates) {
        if let Some(size) = size {
            self.pending_size = Some(self.constraints.clamp(size, self.client_size));
        }
        self.pending_states = Some(states);
        trace!("Window {} staged toplevel configure {:?} {:?}", self.id, size, states);
    }

    /// Stages a popup configure and reports a placement change
    pub fn popup_configure(&mut self, rect: PixelRect) {
        let Role::Popup(popup) = &mut self.role else {
            return;
        };
        if let Some(position) = popup.configure(rect) {
            self.events.position_changed(position);
        }
        if let Some(size) = PixelSize::from_protocol(rect.width as i32, rect.height as i32) {
            self.pending_size = Some(size);
        }
    }

    /// Commits the pending size: GPU handle first, then the toolkit notification
    pub fn apply_pending(&mut self, reason: ResizeReason) -> bool {
        let Some(size) = self.pending_size.take() else {
            return false;
        };
        if size.is_empty() || size == self.client_size {
            return false;
        }
        self.client_size = size;
        let buffer_size = self.buffer_size();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.resize(buffer_size);
        }
        self.events.resized(size, reason);
        debug!("Window {} resized to {}x{}", self.id, size.width, size.height);
        true
    }

    /// Handles `xdg_surface.configure`: apply, then ack, then paint the first frame
    pub fn surface_configure<B: Backend>(&mut self, backend: &mut B, serial: u32) {
        let change = match (&mut self.role, self.pending_states.take()) {
            (Role::Toplevel(toplevel), Some(states)) => toplevel.configure(states),
            (Role::Popup(popup), _) => {
                popup.mark_configured();
                StateChange::default()
            }
            _ => StateChange::default(),
        };
        self.notify_state(change);

        self.apply_pending(ResizeReason::Layout);
        backend.ack_configure(self.id, serial);
        self.configures += 1;
        trace!("Window {} acked configure {}", self.id, serial);

        let first = self.configure_serial.replace(serial).is_none();
        if first {
            let full = PixelRect::new(0, 0, self.client_size.width, self.client_size.height);
            self.invalidate(backend, full);
        }
    }

    fn notify_state(&mut self, change: StateChange) {
        if let Some(state) = change.state {
            self.events.state_changed(state);
        }
        match change.activated {
            Some(true) => self.events.activated(),
            Some(false) => self.events.deactivated(),
            None => {}
        }
    }

    /// Application-initiated resize through the same apply step
    ///
    /// A fixed-size window may still be resized by the application; the
    /// caller re-pins its limits afterwards.
    pub fn request_resize(&mut self, size: PixelSize) -> bool {
        self.pending_size = Some(self.constraints.clamp_to_limits(size));
        self.apply_pending(ResizeReason::Application)
    }

    // Painting

    /// Paints `region`, keeps one frame callback outstanding, and commits
    pub fn invalidate<B: Backend>(&mut self, backend: &mut B, region: PixelRect) {
        self.events.paint(region);
        backend.damage(self.id, region);
        if self.frame.request() {
            backend.request_frame(self.id);
        }
        backend.commit(self.id);
    }

    pub fn frame_done<B: Backend>(&mut self, backend: &mut B, time_ms: u32) {
        let delta = self.frame.done(time_ms);
        if self.frame.request() {
            backend.request_frame(self.id);
        }
        self.events.render_tick(delta);
        backend.commit(self.id);
    }

    // Outputs and scaling

    pub fn output_entered(&mut self, output: u32) -> bool {
        if self.outputs.contains(&output) {
            return false;
        }
        self.outputs.push(output);
        true
    }

    pub fn output_left(&mut self, output: u32) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|o| *o != output);
        self.outputs.len() != before
    }

    pub fn set_scaling<B: Backend>(&mut self, backend: &mut B, scaling: f64) {
        if scaling <= 0.0 || scaling == self.scaling {
            return;
        }
        self.scaling = scaling;
        backend.set_buffer_scale(self.id, self.buffer_scale());
        let buffer_size = self.buffer_size();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.resize(buffer_size);
        }
        self.events.scaling_changed(scaling);
        debug!("Window {} scaling is now {}", self.id, scaling);
    }

    // Toplevel chrome

    pub fn toplevel_mut(&mut self) -> Option<&mut ToplevelStateMachine> {
        match &mut self.role {
            Role::Toplevel(toplevel) => Some(toplevel),
            Role::Popup(_) => None,
        }
    }

    pub fn popup_mut(&mut self) -> Option<&mut PopupState> {
        match &mut self.role {
            Role::Popup(popup) => Some(popup),
            Role::Toplevel(_) => None,
        }
    }

    pub fn set_window_state<B: Backend>(&mut self, backend: &mut B, state: WindowState) {
        let Role::Toplevel(toplevel) = &mut self.role else {
            return;
        };
        let (requests, change) = toplevel.request(state);
        for request in requests {
            backend.toplevel_request(self.id, request);
        }
        self.notify_state(change);
    }

    pub fn set_constraints<B: Backend>(&mut self, backend: &mut B, constraints: WindowConstraints) {
        self.constraints = constraints;
        if self.is_toplevel() {
            for request in constraints.requests(self.client_size) {
                backend.toplevel_request(self.id, request);
            }
        }
    }

    pub fn decorations_configured(&mut self, mode: DecorationMode) {
        if self.decorations == Some(mode) {
            return;
        }
        self.decorations = Some(mode);
        self.events
            .decorations_changed(mode == DecorationMode::ClientSide);
    }

    pub fn set_export_handle(&mut self, handle: String) {
        debug!("Window {} exported as {}", self.id, handle);
        self.export_handle = Some(handle);
    }

    /// Drops the outstanding frame callback and role state ahead of teardown
    pub fn teardown(&mut self) {
        self.frame.reset();
        if let Role::Popup(popup) = &mut self.role {
            popup.dismiss();
        }
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("client_size", &self.client_size)
            .field("pending_size", &self.pending_size)
            .field("scaling", &self.scaling)
            .finish_non_exhaustive()
    }
}
