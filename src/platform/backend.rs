//! Protocol requests issued by the platform components

use crate::clipboard::{DndAction, OfferId, SourceEvent, SourceId};
use crate::error::Result;
use crate::geometry::{PixelPoint, PixelRect};
use crate::input::cursor::{BitmapPixels, Cursor, CursorImage, CursorShape};
use crate::input::text_input::TextInputRequest;
use crate::input::Capabilities;
use crate::registry::GlobalKind;
use crate::window::{Positioner, ToplevelRequest, ToplevelSetup, WindowId};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::os::fd::OwnedFd;
use std::rc::Rc;

/// Native handles a GPU context needs to create a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHandles {
    pub window: RawWindowHandle,
    pub display: RawDisplayHandle,
}

/// Every request the platform sends to the compositor
///
/// Requests on objects that do not exist (an unbound optional global, a
/// destroyed window) are ignored by implementations.
pub trait Backend: 'static {
    // Globals and seat

    fn bind_global(&mut self, name: u32, kind: GlobalKind, version: u32) -> Result<()>;

    fn unbind_global(&mut self, name: u32, kind: GlobalKind);

    /// Creates the pointer, keyboard or touch object named by a single capability bit
    fn create_input_device(&mut self, device: Capabilities) -> Result<()>;

    fn release_input_device(&mut self, device: Capabilities);

    fn pong(&mut self, serial: u32);

    /// Sends a request on the seat's text input, when one exists
    fn text_input_request(&mut self, request: TextInputRequest);

    // Cursors

    /// Attaches `image` to the cursor surface, or hides the cursor with `None`
    fn show_cursor(&mut self, serial: u32, image: Option<&CursorImage>);

    fn load_theme_cursor(&mut self, shape: CursorShape) -> Option<Rc<Cursor>>;

    fn create_bitmap_cursor(&mut self, pixels: &BitmapPixels, hotspot: PixelPoint) -> Result<Rc<Cursor>>;

    // Data transfer

    fn create_data_source(&mut self, source: SourceId, mime_types: &[String], actions: DndAction) -> Result<()>;

    fn destroy_data_source(&mut self, source: SourceId);

    fn set_selection(&mut self, source: Option<SourceId>, serial: u32);

    fn start_drag(&mut self, source: SourceId, origin: WindowId, serial: u32);

    /// Asks the offer's owner to write `mime_type` into `fd`; the descriptor is closed after sending
    fn receive(&mut self, offer: OfferId, mime_type: &str, fd: OwnedFd);

    fn accept_offer(&mut self, offer: OfferId, serial: u32, mime_type: Option<&str>);

    fn set_offer_actions(&mut self, offer: OfferId, actions: DndAction, preferred: DndAction);

    fn finish_offer(&mut self, offer: OfferId);

    fn destroy_offer(&mut self, offer: OfferId);

    /// Blocks until the compositor has processed every request sent so far,
    /// returning the data source events that arrived meanwhile
    fn roundtrip(&mut self) -> Result<Vec<SourceEvent>>;

    /// Data source events received during normal dispatch
    fn take_source_events(&mut self) -> Vec<SourceEvent> {
        Vec::new()
    }

    // Surfaces

    fn create_surface(&mut self, window: WindowId) -> Result<()>;

    fn create_toplevel(&mut self, window: WindowId, setup: &ToplevelSetup) -> Result<()>;

    fn create_popup(&mut self, window: WindowId, parent: WindowId, positioner: &Positioner) -> Result<()>;

    fn popup_grab(&mut self, window: WindowId, serial: u32);

    fn reposition_popup(&mut self, window: WindowId, positioner: &Positioner, token: u32);

    fn toplevel_request(&mut self, window: WindowId, request: ToplevelRequest);

    fn ack_configure(&mut self, window: WindowId, serial: u32);

    fn request_frame(&mut self, window: WindowId);

    fn damage(&mut self, window: WindowId, region: PixelRect);

    fn set_buffer_scale(&mut self, window: WindowId, scale: i32);

    fn commit(&mut self, window: WindowId);

    /// Destroys the toplevel or popup role object (and its decoration/export companions)
    fn destroy_role(&mut self, window: WindowId);

    fn destroy_surface(&mut self, window: WindowId);

    fn native_handles(&self, window: WindowId) -> Option<NativeHandles>;

    fn flush(&mut self) -> Result<()>;
}
