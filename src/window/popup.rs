//! Popup placement and lifetime

use super::WindowId;
use crate::geometry::{PixelPoint, PixelRect, PixelSize};
use bitflags::bitflags;

/// Anchor point on the anchor rectangle, or gravity direction of the popup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum PopupEdge {
    #[default]
    None,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    BottomLeft,
    TopRight,
    BottomRight,
}

impl PopupEdge {
    /// Shared wire value of `xdg_positioner.anchor` and `xdg_positioner.gravity`
    pub fn protocol_value(self) -> u32 {
        match self {
            PopupEdge::None => 0,
            PopupEdge::Top => 1,
            PopupEdge::Bottom => 2,
            PopupEdge::Left => 3,
            PopupEdge::Right => 4,
            PopupEdge::TopLeft => 5,
            PopupEdge::BottomLeft => 6,
            PopupEdge::TopRight => 7,
            PopupEdge::BottomRight => 8,
        }
    }
}

bitflags! {
    /// How the compositor may move a popup that would be cut off
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConstraintAdjustment: u32 {
        const SLIDE_X = 1;
        const SLIDE_Y = 2;
        const FLIP_X = 4;
        const FLIP_Y = 8;
        const RESIZE_X = 16;
        const RESIZE_Y = 32;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Positioner {
    pub size: PixelSize,
    /// Relative to the parent's window geometry
    pub anchor_rect: PixelRect,
    pub anchor: PopupEdge,
    pub gravity: PopupEdge,
    pub offset: PixelPoint,
    pub constraints: ConstraintAdjustment,
}

impl Positioner {
    /// A positioner needs a non-empty popup size and anchor rectangle
    pub fn is_valid(&self) -> bool {
        !self.size.is_empty() && !self.anchor_rect.size().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PopupState {
    parent: WindowId,
    positioner: Positioner,
    position: Option<PixelPoint>,
    configured: bool,
    next_token: u32,
    dismissed: bool,
}

impl PopupState {
    pub fn new(parent: WindowId, positioner: Positioner) -> Self {
        Self {
            parent,
            positioner,
            position: None,
            configured: false,
            next_token: 1,
            dismissed: false,
        }
    }

    pub fn parent(&self) -> WindowId {
        self.parent
    }

    pub fn positioner(&self) -> &Positioner {
        &self.positioner
    }

    pub fn position(&self) -> Option<PixelPoint> {
        self.position
    }

    pub fn mark_configured(&mut self) {
        self.configured = true;
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    /// Records the compositor-chosen placement; returns the new position when it moved
    pub fn configure(&mut self, rect: PixelRect) -> Option<PixelPoint> {
        let position = rect.origin();
        if self.position == Some(position) {
            return None;
        }
        self.position = Some(position);
        Some(position)
    }

    /// Stores a new geometry; returns a reposition token once both sides have configured
    pub fn update(&mut self, positioner: Positioner, parent_configured: bool) -> Option<u32> {
        self.positioner = positioner;
        if !(self.configured && parent_configured) {
            return None;
        }
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positioner(width: u32) -> Positioner {
        Positioner {
            size: PixelSize::new(width, 100),
            anchor_rect: PixelRect::new(10, 10, 1, 1),
            anchor: PopupEdge::BottomLeft,
            gravity: PopupEdge::BottomRight,
            ..Default::default()
        }
    }

    #[test]
    fn test_reposition_waits_for_both_configures() {
        let mut popup = PopupState::new(WindowId(1), positioner(200));
        assert_eq!(popup.update(positioner(300), true), None);

        popup.mark_configured();
        assert_eq!(popup.update(positioner(400), false), None);
        assert_eq!(popup.update(positioner(500), true), Some(1));
        assert_eq!(popup.update(positioner(600), true), Some(2));
        assert_eq!(popup.positioner().size.width, 600);
    }

    #[test]
    fn test_configure_reports_moves_only() {
        let mut popup = PopupState::new(WindowId(1), positioner(200));
        let rect = PixelRect::new(5, 6, 200, 100);
        assert_eq!(popup.configure(rect), Some(PixelPoint::new(5, 6)));
        assert_eq!(popup.configure(rect), None);
    }

    #[test]
    fn test_positioner_validity() {
        assert!(positioner(10).is_valid());
        assert!(!Positioner::default().is_valid());
    }
}
