//! Screen/output registry
//!
//! Output properties arrive piecemeal (geometry, mode, scale) and are only
//! exposed once the compositor closes the batch with `done`. Later batches
//! replace the committed screen atomically.

use crate::geometry::{PixelPoint, PixelRect};
use log::{debug, info};
use std::collections::BTreeMap;

/// One physical output as exposed to the toolkit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputScreen {
    pub bounds: PixelRect,
    pub scaling: f64,
    pub is_preferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenChange {
    Added(u32),
    Changed(u32),
}

#[derive(Debug, Clone, Copy)]
struct PendingOutput {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    scale: i32,
    preferred: bool,
}

impl Default for PendingOutput {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            scale: 1,
            preferred: false,
        }
    }
}

/// Screens keyed by the output's registry name
#[derive(Debug, Default)]
pub struct ScreenRegistry {
    pending: BTreeMap<u32, PendingOutput>,
    screens: BTreeMap<u32, OutputScreen>,
}

impl ScreenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output(&mut self, name: u32) {
        self.pending.insert(name, PendingOutput::default());
    }

    /// Returns true if the output had been exposed as a screen
    pub fn remove_output(&mut self, name: u32) -> bool {
        self.pending.remove(&name);
        let removed = self.screens.remove(&name).is_some();
        if removed {
            info!("🖥️ Screen {} removed", name);
        }
        removed
    }

    pub fn geometry(&mut self, name: u32, x: i32, y: i32) {
        if let Some(pending) = self.pending.get_mut(&name) {
            pending.x = x;
            pending.y = y;
        }
    }

    /// Only the current mode defines the screen size
    pub fn mode(&mut self, name: u32, width: i32, height: i32, current: bool, preferred: bool) {
        if !current {
            return;
        }
        if let Some(pending) = self.pending.get_mut(&name) {
            pending.width = width.max(0) as u32;
            pending.height = height.max(0) as u32;
            pending.preferred = preferred;
        }
    }

    pub fn scale(&mut self, name: u32, factor: i32) {
        if let Some(pending) = self.pending.get_mut(&name) {
            pending.scale = factor.max(1);
        }
    }

    /// Commits the accumulated properties of `name`
    pub fn done(&mut self, name: u32) -> Option<ScreenChange> {
        let pending = *self.pending.get(&name)?;
        let screen = OutputScreen {
            bounds: PixelRect::new(pending.x, pending.y, pending.width, pending.height),
            scaling: pending.scale as f64,
            is_preferred: pending.preferred,
        };

        match self.screens.insert(name, screen) {
            None => {
                info!(
                    "🖥️ Screen {} ready: {}x{}+{}+{} @{}x",
                    name, pending.width, pending.height, pending.x, pending.y, pending.scale
                );
                Some(ScreenChange::Added(name))
            }
            Some(previous) if previous != screen => {
                debug!("🖥️ Screen {} changed: {:?}", name, screen);
                Some(ScreenChange::Changed(name))
            }
            Some(_) => None,
        }
    }

    /// Committed screen for an output; `None` before its first `done`
    pub fn get(&self, name: u32) -> Option<&OutputScreen> {
        self.screens.get(&name)
    }

    pub fn all(&self) -> impl Iterator<Item = &OutputScreen> {
        self.screens.values()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    /// Screen whose bounds contain the origin, else the first announced
    pub fn primary(&self) -> Option<&OutputScreen> {
        self.screen_from_point(PixelPoint::new(0, 0))
            .or_else(|| self.screens.values().next())
    }

    pub fn screen_from_point(&self, point: PixelPoint) -> Option<&OutputScreen> {
        self.screens.values().find(|screen| screen.bounds.contains(point))
    }

    /// Screen with the largest overlap; falls back to the one containing the rect's origin
    pub fn screen_from_rect(&self, rect: PixelRect) -> Option<&OutputScreen> {
        self.screens
            .values()
            .map(|screen| (screen.bounds.overlap_area(&rect), screen))
            .filter(|(area, _)| *area > 0)
            .max_by_key(|(area, _)| *area)
            .map(|(_, screen)| screen)
            .or_else(|| self.screen_from_point(rect.origin()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announce(screens: &mut ScreenRegistry, name: u32, x: i32, width: i32, scale: i32) {
        screens.add_output(name);
        screens.geometry(name, x, 0);
        screens.mode(name, width, 1080, true, true);
        screens.scale(name, scale);
    }

    #[test]
    fn test_screen_hidden_until_done() {
        let mut screens = ScreenRegistry::new();
        announce(&mut screens, 7, 0, 1920, 1);
        assert!(screens.get(7).is_none());
        assert!(screens.is_empty());

        assert_eq!(screens.done(7), Some(ScreenChange::Added(7)));
        let screen = screens.get(7).unwrap();
        assert_eq!(screen.bounds, PixelRect::new(0, 0, 1920, 1080));
        assert_eq!(screen.scaling, 1.0);
        assert!(screen.is_preferred);
    }

    #[test]
    fn test_changes_commit_atomically() {
        let mut screens = ScreenRegistry::new();
        announce(&mut screens, 7, 0, 1920, 1);
        screens.done(7);

        screens.scale(7, 2);
        assert_eq!(screens.get(7).unwrap().scaling, 1.0);
        assert_eq!(screens.done(7), Some(ScreenChange::Changed(7)));
        assert_eq!(screens.get(7).unwrap().scaling, 2.0);

        // Identical batch
        assert_eq!(screens.done(7), None);
    }

    #[test]
    fn test_non_current_modes_ignored() {
        let mut screens = ScreenRegistry::new();
        screens.add_output(1);
        screens.mode(1, 3840, 2160, true, false);
        screens.mode(1, 1280, 720, false, true);
        screens.done(1);
        assert_eq!(screens.get(1).unwrap().bounds.width, 3840);
        assert!(!screens.get(1).unwrap().is_preferred);
    }

    #[test]
    fn test_lookup_by_point_and_rect() {
        let mut screens = ScreenRegistry::new();
        announce(&mut screens, 1, 0, 1920, 1);
        announce(&mut screens, 2, 1920, 2560, 2);
        screens.done(1);
        screens.done(2);

        assert_eq!(screens.primary().unwrap().bounds.x, 0);
        assert_eq!(
            screens.screen_from_point(PixelPoint::new(2000, 10)).unwrap().scaling,
            2.0
        );
        let straddling = PixelRect::new(1800, 0, 400, 300);
        assert_eq!(screens.screen_from_rect(straddling).unwrap().bounds.x, 1920);

        assert!(screens.remove_output(2));
        assert_eq!(screens.len(), 1);
        assert!(!screens.remove_output(2));
    }
}
