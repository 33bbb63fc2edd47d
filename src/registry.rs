//! Global registry bookkeeping
//!
//! Tracks every global the compositor advertises and decides which ones get
//! bound. Singleton interfaces are bound at most once per advertisement;
//! outputs are bound every time one appears. The actual bind requests are
//! issued by the backend from the returned [`RegistryAction`]s.

use log::{debug, info, warn};
use std::collections::HashMap;

/// Interfaces the platform knows how to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalKind {
    Compositor,
    Shm,
    Seat,
    DataDeviceManager,
    WmBase,
    Output,
    DecorationManager,
    Exporter,
    PointerGestures,
    TextInputManager,
}

impl GlobalKind {
    pub const ALL: [GlobalKind; 10] = [
        GlobalKind::Compositor,
        GlobalKind::Shm,
        GlobalKind::Seat,
        GlobalKind::DataDeviceManager,
        GlobalKind::WmBase,
        GlobalKind::Output,
        GlobalKind::DecorationManager,
        GlobalKind::Exporter,
        GlobalKind::PointerGestures,
        GlobalKind::TextInputManager,
    ];

    pub fn from_interface(interface: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.interface() == interface)
    }

    pub fn interface(self) -> &'static str {
        match self {
            GlobalKind::Compositor => "wl_compositor",
            GlobalKind::Shm => "wl_shm",
            GlobalKind::Seat => "wl_seat",
            GlobalKind::DataDeviceManager => "wl_data_device_manager",
            GlobalKind::WmBase => "xdg_wm_base",
            GlobalKind::Output => "wl_output",
            GlobalKind::DecorationManager => "zxdg_decoration_manager_v1",
            GlobalKind::Exporter => "zxdg_exporter_v2",
            GlobalKind::PointerGestures => "zwp_pointer_gestures_v1",
            GlobalKind::TextInputManager => "zwp_text_input_manager_v3",
        }
    }

    /// Highest interface version the platform speaks
    pub fn supported_version(self) -> u32 {
        match self {
            GlobalKind::Compositor => 4,
            GlobalKind::Shm => 1,
            GlobalKind::Seat => 7,
            GlobalKind::DataDeviceManager => 3,
            GlobalKind::WmBase => 4,
            GlobalKind::Output => 2,
            GlobalKind::DecorationManager => 1,
            GlobalKind::Exporter => 1,
            GlobalKind::PointerGestures => 1,
            GlobalKind::TextInputManager => 1,
        }
    }

    /// Windows cannot be driven without these
    pub fn is_required(self) -> bool {
        matches!(
            self,
            GlobalKind::Compositor | GlobalKind::Shm | GlobalKind::WmBase
        )
    }

    pub fn is_singleton(self) -> bool {
        self != GlobalKind::Output
    }
}

/// A compositor-advertised global, keyed by its registry name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalObject {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryAction {
    /// Bind `name` at `version` (never above the advertised version)
    Bind {
        name: u32,
        kind: GlobalKind,
        version: u32,
    },
    /// A bound singleton disappeared; its handle must be released
    Unbind { name: u32, kind: GlobalKind },
    OutputRemoved { name: u32 },
}

#[derive(Debug, Default)]
pub struct GlobalRegistry {
    globals: HashMap<u32, GlobalObject>,
    bound: HashMap<GlobalKind, u32>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an advertised global and returns the bind to perform, if any
    pub fn announce(&mut self, name: u32, interface: &str, version: u32) -> Option<RegistryAction> {
        debug!("🌐 Global {} advertised: {} v{}", name, interface, version);
        self.globals.insert(
            name,
            GlobalObject {
                name,
                interface: interface.to_string(),
                version,
            },
        );

        let kind = GlobalKind::from_interface(interface)?;
        if kind.is_singleton() {
            if let Some(existing) = self.bound.get(&kind) {
                debug!(
                    "Ignoring second {} (name {}), already bound as {}",
                    interface, name, existing
                );
                return None;
            }
            self.bound.insert(kind, name);
        }

        let version = version.min(kind.supported_version());
        info!("🔗 Binding {} v{}", interface, version);
        Some(RegistryAction::Bind {
            name,
            kind,
            version,
        })
    }

    /// Forgets a global; a removed singleton may be bound again when re-advertised
    pub fn remove(&mut self, name: u32) -> Option<RegistryAction> {
        let global = self.globals.remove(&name)?;
        let kind = GlobalKind::from_interface(&global.interface)?;

        if kind == GlobalKind::Output {
            return Some(RegistryAction::OutputRemoved { name });
        }

        if self.bound.get(&kind) == Some(&name) {
            self.bound.remove(&kind);
            warn!("⚠️ Bound global {} (name {}) removed", global.interface, name);
            return Some(RegistryAction::Unbind { name, kind });
        }
        None
    }

    pub fn get(&self, name: u32) -> Option<&GlobalObject> {
        self.globals.get(&name)
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalObject> {
        self.globals.values()
    }

    pub fn is_bound(&self, kind: GlobalKind) -> bool {
        self.bound.contains_key(&kind)
    }

    pub fn bound_name(&self, kind: GlobalKind) -> Option<u32> {
        self.bound.get(&kind).copied()
    }

    /// Interfaces of required globals that have not been advertised
    pub fn missing_required(&self) -> Vec<&'static str> {
        GlobalKind::ALL
            .into_iter()
            .filter(|kind| kind.is_required() && !self.is_bound(*kind))
            .map(GlobalKind::interface)
            .collect()
    }

    /// Interfaces of optional singletons that have not been advertised
    pub fn missing_optional(&self) -> Vec<&'static str> {
        GlobalKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_required() && kind.is_singleton() && !self.is_bound(*kind))
            .map(GlobalKind::interface)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_version_is_clamped_to_advertised() {
        let mut registry = GlobalRegistry::new();
        assert_eq!(
            registry.announce(1, "wl_seat", 9),
            Some(RegistryAction::Bind {
                name: 1,
                kind: GlobalKind::Seat,
                version: 7
            })
        );
        assert_eq!(
            registry.announce(2, "wl_compositor", 3),
            Some(RegistryAction::Bind {
                name: 2,
                kind: GlobalKind::Compositor,
                version: 3
            })
        );
    }

    #[test]
    fn test_singleton_bound_once_until_removed() {
        let mut registry = GlobalRegistry::new();
        assert!(registry.announce(3, "wl_shm", 1).is_some());
        assert!(registry.announce(4, "wl_shm", 1).is_none());

        assert_eq!(
            registry.remove(3),
            Some(RegistryAction::Unbind {
                name: 3,
                kind: GlobalKind::Shm
            })
        );
        assert!(!registry.is_bound(GlobalKind::Shm));
        assert!(registry.announce(5, "wl_shm", 1).is_some());
        assert_eq!(registry.bound_name(GlobalKind::Shm), Some(5));
    }

    #[test]
    fn test_outputs_always_bind() {
        let mut registry = GlobalRegistry::new();
        assert!(registry.announce(10, "wl_output", 4).is_some());
        assert!(registry.announce(11, "wl_output", 4).is_some());
        assert_eq!(
            registry.remove(10),
            Some(RegistryAction::OutputRemoved { name: 10 })
        );
        assert!(registry.remove(10).is_none());
    }

    #[test]
    fn test_unknown_interfaces_are_recorded_but_not_bound() {
        let mut registry = GlobalRegistry::new();
        assert!(registry.announce(20, "wp_viewporter", 1).is_none());
        assert_eq!(registry.get(20).map(|g| g.interface.as_str()), Some("wp_viewporter"));
        assert!(registry.remove(20).is_none());
    }

    #[test]
    fn test_missing_globals() {
        let mut registry = GlobalRegistry::new();
        registry.announce(1, "wl_compositor", 4);
        registry.announce(2, "xdg_wm_base", 2);
        assert_eq!(registry.missing_required(), vec!["wl_shm"]);
        assert!(registry.missing_optional().contains(&"zxdg_exporter_v2"));
        assert!(registry
            .missing_optional()
            .contains(&"zwp_text_input_manager_v3"));
    }

    #[test]
    fn test_text_input_manager_binds_as_optional_singleton() {
        let mut registry = GlobalRegistry::new();
        assert_eq!(
            registry.announce(30, "zwp_text_input_manager_v3", 1),
            Some(RegistryAction::Bind {
                name: 30,
                kind: GlobalKind::TextInputManager,
                version: 1
            })
        );
        assert!(registry.announce(31, "zwp_text_input_manager_v3", 1).is_none());
        assert!(!GlobalKind::TextInputManager.is_required());
        assert!(registry.missing_required().contains(&"wl_compositor"));
    }
}
