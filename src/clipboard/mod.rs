//! Clipboard and drag-and-drop data transfer
//!
//! # Protocol Flow
//!
//! ## Copy/Paste:
//! 1. A data source is created with every mime type the payload answers to
//! 2. `set_selection` hands it to the compositor with the keyboard-enter serial
//! 3. When any client pastes, the compositor asks the source to `send` into a pipe
//!
//! ## Paste:
//! 1. The compositor announces a data offer and its mime types
//! 2. A `selection` event makes it the current clipboard offer
//! 3. Reading opens a pipe, issues `receive`, round-trips, and reads to end-of-file
//!
//! ## Drag and Drop:
//! 1. `start_drag` creates a source advertising the allowed actions
//! 2. Targets see enter/motion/leave/drop and answer with the action they accept
//! 3. The source settles its [`DragCompletion`] on `dnd_finished` or `cancelled`

pub mod mime;
pub mod pipe;

pub use mime::{mime_types, DataFormat, Payload};

use crate::error::{PlatformError, Result};
use crate::geometry::Point;
use crate::input::Modifiers;
use crate::platform::Backend;
use crate::window::WindowId;
use bitflags::bitflags;
use log::{debug, info, trace, warn};
use pipe::PendingWrite;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

bitflags! {
    /// Drag-and-drop actions, bit-compatible with `wl_data_device_manager.dnd_action`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DndAction: u32 {
        const COPY = 1;
        const MOVE = 2;
        const ASK = 4;
    }
}

impl DndAction {
    /// The single action to propose as preferred out of an allowed set
    pub fn preferred(self) -> DndAction {
        [DndAction::COPY, DndAction::MOVE, DndAction::ASK]
            .into_iter()
            .find(|action| self.contains(*action))
            .unwrap_or_else(DndAction::empty)
    }
}

/// Client-side key of an outbound data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u32);

/// Backend-assigned key of an inbound data offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OfferId(pub u32);

/// Events addressed to our own data sources
#[derive(Debug)]
pub enum SourceEvent {
    Target { source: SourceId, mime_type: Option<String> },
    Send { source: SourceId, mime_type: String, fd: OwnedFd },
    Cancelled { source: SourceId },
    DndDropPerformed { source: SourceId },
    DndFinished { source: SourceId },
    Action { source: SourceId, action: DndAction },
}

#[derive(Debug, Default)]
struct CompletionSlot {
    result: Option<DndAction>,
    waker: Option<Waker>,
}

/// Resolves to the action the drop target settled on; empty when cancelled
#[derive(Debug, Clone, Default)]
pub struct DragCompletion {
    slot: Rc<RefCell<CompletionSlot>>,
}

impl DragCompletion {
    fn settle(&self, action: DndAction) {
        let mut slot = self.slot.borrow_mut();
        if slot.result.is_some() {
            return;
        }
        slot.result = Some(action);
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
    }

    pub fn try_result(&self) -> Option<DndAction> {
        self.slot.borrow().result
    }

    pub fn is_settled(&self) -> bool {
        self.try_result().is_some()
    }
}

impl Future for DragCompletion {
    type Output = DndAction;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<DndAction> {
        let mut slot = self.slot.borrow_mut();
        match slot.result {
            Some(action) => Poll::Ready(action),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[derive(Debug)]
struct OutboundSource {
    payload: Payload,
    action: DndAction,
    completion: Option<DragCompletion>,
}

#[derive(Debug, Default)]
struct InboundOffer {
    mime_types: Vec<String>,
    source_actions: DndAction,
    action: DndAction,
    cache: HashMap<String, Vec<u8>>,
}

/// Phase of a drag passing over one of our windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragEventKind {
    Enter,
    Over,
    Leave,
    Drop,
}

/// Content of an accepted drop, read before the drop event is delivered
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DropData {
    pub text: Option<String>,
    pub files: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DragEvent {
    pub kind: DragEventKind,
    pub position: Point,
    pub formats: Vec<DataFormat>,
    /// Actions the drag source allows
    pub allowed: DndAction,
    pub modifiers: Modifiers,
    /// Present on `Drop` only
    pub data: Option<DropData>,
}

/// A drag currently hovering one of our windows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragTarget {
    pub window: WindowId,
    pub offer: Option<OfferId>,
    pub serial: u32,
    pub position: Point,
    pub action: DndAction,
}

/// Owns every offer and source of the seat's data device
#[derive(Debug)]
pub struct DataTransferBroker {
    read_timeout: Duration,
    max_transfer_bytes: usize,

    next_source: u32,
    sources: HashMap<SourceId, OutboundSource>,
    selection_source: Option<SourceId>,
    drag_source: Option<SourceId>,

    offers: HashMap<OfferId, InboundOffer>,
    announced: Option<OfferId>,
    selection: Option<OfferId>,
    drag: Option<DragTarget>,

    pending_writes: Vec<PendingWrite>,
    reading: bool,
}

impl DataTransferBroker {
    pub fn new(config: &crate::config::ClipboardConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            max_transfer_bytes: config.max_transfer_bytes,
            next_source: 1,
            sources: HashMap::new(),
            selection_source: None,
            drag_source: None,
            offers: HashMap::new(),
            announced: None,
            selection: None,
            drag: None,
            pending_writes: Vec::new(),
            reading: false,
        }
    }

    pub fn selection_offer(&self) -> Option<OfferId> {
        self.selection
    }

    pub fn drag_target(&self) -> Option<&DragTarget> {
        self.drag.as_ref()
    }

    pub fn live_offers(&self) -> usize {
        self.offers.len()
    }

    pub fn live_sources(&self) -> usize {
        self.sources.len()
    }

    // Outbound

    fn allocate_source(&mut self) -> SourceId {
        let id = SourceId(self.next_source);
        self.next_source = self.next_source.wrapping_add(1).max(1);
        id
    }

    /// Publishes `payload` as the clipboard selection
    pub fn set_selection<B: Backend>(&mut self, backend: &mut B, payload: Payload, serial: u32) -> Result<SourceId> {
        let id = self.allocate_source();
        let mime_types = payload.mime_types();
        backend.create_data_source(id, &mime_types, DndAction::empty())?;
        self.sources.insert(
            id,
            OutboundSource {
                payload,
                action: DndAction::empty(),
                completion: None,
            },
        );
        backend.set_selection(Some(id), serial);

        if let Some(previous) = self.selection_source.replace(id) {
            self.release_source(backend, previous, None);
        }
        info!("📋 Selection set to source {:?} with types: {:?}", id, mime_types);
        Ok(id)
    }

    /// Withdraws our selection and forgets the current clipboard offer
    pub fn clear_selection<B: Backend>(&mut self, backend: &mut B, serial: u32) {
        backend.set_selection(None, serial);
        if let Some(source) = self.selection_source.take() {
            self.release_source(backend, source, None);
        }
        if let Some(offer) = self.selection.take() {
            self.dispose_offer(backend, offer);
        }
        info!("📋 Cleared selection");
    }

    pub fn start_drag<B: Backend>(
        &mut self,
        backend: &mut B,
        payload: Payload,
        allowed: DndAction,
        origin: WindowId,
        serial: u32,
    ) -> Result<DragCompletion> {
        if allowed.is_empty() {
            return Err(PlatformError::contract("drag started with no allowed action"));
        }
        if let Some(previous) = self.drag_source.take() {
            self.release_source(backend, previous, Some(DndAction::empty()));
        }

        let id = self.allocate_source();
        backend.create_data_source(id, &payload.mime_types(), allowed)?;
        let completion = DragCompletion::default();
        self.sources.insert(
            id,
            OutboundSource {
                payload,
                action: DndAction::empty(),
                completion: Some(completion.clone()),
            },
        );
        self.drag_source = Some(id);
        backend.start_drag(id, origin, serial);
        info!("🖱️ Started drag with source {:?} from window {}", id, origin);
        Ok(completion)
    }

    fn release_source<B: Backend>(&mut self, backend: &mut B, id: SourceId, settle: Option<DndAction>) {
        let Some(source) = self.sources.remove(&id) else {
            return;
        };
        backend.destroy_data_source(id);
        if self.selection_source == Some(id) {
            self.selection_source = None;
        }
        if self.drag_source == Some(id) {
            self.drag_source = None;
        }
        if let (Some(completion), Some(action)) = (source.completion, settle) {
            completion.settle(action);
        }
        debug!("📋 Released data source {:?}", id);
    }

    pub fn source_event<B: Backend>(&mut self, backend: &mut B, event: SourceEvent) {
        match event {
            SourceEvent::Target { source, mime_type } => {
                trace!("🎯 Drag target for {:?} accepts {:?}", source, mime_type);
            }
            SourceEvent::Send { source, mime_type, fd } => self.serve(source, &mime_type, fd),
            SourceEvent::Cancelled { source } => {
                debug!("🚫 Data source {:?} cancelled", source);
                self.release_source(backend, source, Some(DndAction::empty()));
            }
            SourceEvent::DndDropPerformed { source } => {
                let ask = self
                    .sources
                    .get(&source)
                    .is_some_and(|s| s.action == DndAction::ASK);
                if ask {
                    self.release_source(backend, source, Some(DndAction::ASK));
                }
            }
            SourceEvent::DndFinished { source } => {
                let action = self
                    .sources
                    .get(&source)
                    .map(|s| s.action)
                    .unwrap_or_default();
                info!("📦 Drop finished for {:?} with {:?}", source, action);
                self.release_source(backend, source, Some(action));
            }
            SourceEvent::Action { source, action } => {
                if let Some(source) = self.sources.get_mut(&source) {
                    source.action = action;
                }
            }
        }
    }

    fn serve(&mut self, source: SourceId, mime_type: &str, fd: OwnedFd) {
        let data = self
            .sources
            .get(&source)
            .and_then(|s| s.payload.encode(mime_type));
        let Some(data) = data else {
            debug!("📋 No data for {} on {:?}, closing empty", mime_type, source);
            return;
        };
        debug!("📋 Sending {} bytes of {} from {:?}", data.len(), mime_type, source);

        if self.reading {
            match PendingWrite::new(fd, data) {
                Ok(write) => self.pending_writes.push(write),
                Err(err) => warn!("⚠️ Could not queue transfer write: {}", err),
            }
        } else {
            pipe::write_all_blocking(fd, &data);
        }
    }

    // Inbound

    fn dispose_offer<B: Backend>(&mut self, backend: &mut B, id: OfferId) {
        if self.offers.remove(&id).is_some() {
            backend.destroy_offer(id);
            trace!("📋 Disposed offer {:?}", id);
        }
        if self.announced == Some(id) {
            self.announced = None;
        }
        if self.selection == Some(id) {
            self.selection = None;
        }
        if let Some(drag) = self.drag.as_mut() {
            if drag.offer == Some(id) {
                drag.offer = None;
            }
        }
    }

    fn in_use(&self, id: OfferId) -> bool {
        self.selection == Some(id) || self.drag.is_some_and(|d| d.offer == Some(id))
    }

    /// A new offer supersedes any announced offer that was never adopted
    pub fn offer_announced<B: Backend>(&mut self, backend: &mut B, id: OfferId) {
        if let Some(previous) = self.announced.take() {
            if !self.in_use(previous) {
                self.dispose_offer(backend, previous);
            }
        }
        self.offers.insert(id, InboundOffer::default());
        self.announced = Some(id);
    }

    pub fn offer_mime(&mut self, id: OfferId, mime_type: String) {
        if let Some(offer) = self.offers.get_mut(&id) {
            if !offer.mime_types.contains(&mime_type) {
                offer.mime_types.push(mime_type);
            }
        }
    }

    pub fn offer_source_actions(&mut self, id: OfferId, actions: DndAction) {
        if let Some(offer) = self.offers.get_mut(&id) {
            offer.source_actions = actions;
        }
    }

    pub fn offer_action(&mut self, id: OfferId, action: DndAction) {
        if let Some(offer) = self.offers.get_mut(&id) {
            offer.action = action;
        }
    }

    pub fn selection_changed<B: Backend>(&mut self, backend: &mut B, id: Option<OfferId>) {
        if self.announced == id {
            self.announced = None;
        }
        let previous = std::mem::replace(&mut self.selection, id);
        if let Some(previous) = previous.filter(|p| Some(*p) != id) {
            if !self.in_use(previous) {
                self.dispose_offer(backend, previous);
            }
        }
        debug!("📋 Selection offer is now {:?}", id);
    }

    pub fn offer_formats(&self, id: OfferId) -> Vec<DataFormat> {
        self.offers
            .get(&id)
            .map(|offer| mime::formats_of(&offer.mime_types))
            .unwrap_or_default()
    }

    pub fn offer_source_actions_of(&self, id: OfferId) -> DndAction {
        self.offers
            .get(&id)
            .map(|offer| offer.source_actions)
            .unwrap_or_default()
    }

    pub fn selection_formats(&self) -> Vec<DataFormat> {
        self.selection
            .map(|id| self.offer_formats(id))
            .unwrap_or_default()
    }

    /// Reads one mime type of an offer; `None` when unavailable
    pub fn read<B: Backend>(&mut self, backend: &mut B, id: OfferId, mime_type: &str) -> Option<Vec<u8>> {
        let offer = self.offers.get(&id)?;
        if !offer.mime_types.iter().any(|m| m == mime_type) {
            return None;
        }
        if let Some(cached) = offer.cache.get(mime_type) {
            return Some(cached.clone());
        }

        let (read_end, write_end) = match pipe::pipe() {
            Ok(ends) => ends,
            Err(err) => {
                warn!("⚠️ {}; dropping offer {:?}", err, id);
                self.dispose_offer(backend, id);
                return None;
            }
        };
        backend.receive(id, mime_type, write_end);

        self.reading = true;
        match backend.roundtrip() {
            Ok(events) => {
                for event in events {
                    self.source_event(backend, event);
                }
            }
            Err(err) => {
                warn!("⚠️ Round-trip for offer {:?} failed: {}", id, err);
                self.reading = false;
                self.pending_writes.clear();
                return None;
            }
        }

        let writes = &mut self.pending_writes;
        let outcome = pipe::read_bounded(read_end, self.read_timeout, self.max_transfer_bytes, || {
            writes.retain_mut(|write| !write.pump());
            !writes.is_empty()
        });
        self.pending_writes.clear();
        self.reading = false;

        let data = outcome.into_data()?;
        debug!("📋 Read {} bytes of {} from offer {:?}", data.len(), mime_type, id);
        if let Some(offer) = self.offers.get_mut(&id) {
            offer.cache.insert(mime_type.to_string(), data.clone());
        }
        Some(data)
    }

    pub fn read_text<B: Backend>(&mut self, backend: &mut B, id: OfferId) -> Option<String> {
        let mime_type = mime::text_mime(&self.offers.get(&id)?.mime_types)?;
        self.read(backend, id, mime_type)
            .map(|bytes| mime::decode_text(&bytes))
    }

    pub fn read_files<B: Backend>(&mut self, backend: &mut B, id: OfferId) -> Option<Vec<String>> {
        self.read(backend, id, mime_types::TEXT_URI_LIST)
            .map(|bytes| mime::decode_uri_list(&bytes))
    }

    pub fn selection_text<B: Backend>(&mut self, backend: &mut B) -> Option<String> {
        let id = self.selection?;
        self.read_text(backend, id)
    }

    pub fn selection_files<B: Backend>(&mut self, backend: &mut B) -> Option<Vec<String>> {
        let id = self.selection?;
        self.read_files(backend, id)
    }

    pub fn selection_data<B: Backend>(&mut self, backend: &mut B, mime_type: &str) -> Option<Vec<u8>> {
        let id = self.selection?;
        self.read(backend, id, mime_type)
    }

    // Drag target

    pub fn drag_enter<B: Backend>(
        &mut self,
        backend: &mut B,
        window: WindowId,
        serial: u32,
        position: Point,
        offer: Option<OfferId>,
    ) {
        if let Some(previous) = self.drag.take().and_then(|d| d.offer) {
            if Some(previous) != offer && self.selection != Some(previous) {
                self.dispose_offer(backend, previous);
            }
        }
        if self.announced == offer {
            self.announced = None;
        }
        self.drag = Some(DragTarget {
            window,
            offer,
            serial,
            position,
            action: DndAction::empty(),
        });
    }

    pub fn drag_motion(&mut self, position: Point) -> Option<&DragTarget> {
        let drag = self.drag.as_mut()?;
        drag.position = position;
        Some(drag)
    }

    /// Pushes the target's chosen action back to the offer
    pub fn answer_drag<B: Backend>(&mut self, backend: &mut B, action: DndAction) {
        let Some(drag) = self.drag.as_mut() else {
            return;
        };
        drag.action = action;
        let Some(id) = drag.offer else {
            return;
        };
        let mime_type = self
            .offers
            .get(&id)
            .and_then(|offer| offer.mime_types.first())
            .filter(|_| !action.is_empty());
        backend.accept_offer(id, drag.serial, mime_type.map(String::as_str));
        backend.set_offer_actions(id, action, action.preferred());
    }

    pub fn drag_leave<B: Backend>(&mut self, backend: &mut B) -> Option<DragTarget> {
        let drag = self.drag.take()?;
        if let Some(offer) = drag.offer {
            if self.selection != Some(offer) {
                self.dispose_offer(backend, offer);
            }
        }
        Some(drag)
    }

    /// Reads the text and file formats of the hovering offer
    pub fn drop_data<B: Backend>(&mut self, backend: &mut B) -> DropData {
        let Some(id) = self.drag.and_then(|d| d.offer) else {
            return DropData::default();
        };
        let formats = self.offer_formats(id);
        DropData {
            text: formats
                .contains(&DataFormat::Text)
                .then(|| self.read_text(backend, id))
                .flatten(),
            files: formats
                .contains(&DataFormat::FileNames)
                .then(|| self.read_files(backend, id))
                .flatten(),
        }
    }

    /// Completes a drop with the action the target performed
    pub fn finish_drop<B: Backend>(&mut self, backend: &mut B, action: DndAction) {
        let Some(drag) = self.drag.take() else {
            return;
        };
        if let Some(offer) = drag.offer {
            if !action.is_empty() {
                backend.finish_offer(offer);
            }
            self.dispose_offer(backend, offer);
        }
        info!("📦 Drop on window {} completed with {:?}", drag.window, action);
    }

    /// Releases every offer and source, settling outstanding drags as cancelled
    pub fn shutdown<B: Backend>(&mut self, backend: &mut B) {
        let sources: Vec<SourceId> = self.sources.keys().copied().collect();
        for source in sources {
            self.release_source(backend, source, Some(DndAction::empty()));
        }
        let offers: Vec<OfferId> = self.offers.keys().copied().collect();
        for offer in offers {
            self.dispose_offer(backend, offer);
        }
        self.drag = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_action_is_single() {
        assert_eq!((DndAction::MOVE | DndAction::COPY).preferred(), DndAction::COPY);
        assert_eq!((DndAction::MOVE | DndAction::ASK).preferred(), DndAction::MOVE);
        assert_eq!(DndAction::empty().preferred(), DndAction::empty());
    }

    #[test]
    fn test_completion_settles_once() {
        let completion = DragCompletion::default();
        let observer = completion.clone();
        assert_eq!(observer.try_result(), None);

        completion.settle(DndAction::MOVE);
        completion.settle(DndAction::empty());
        assert_eq!(observer.try_result(), Some(DndAction::MOVE));
        assert!(observer.is_settled());
    }
}
