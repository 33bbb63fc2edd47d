//! Keymap and compose engine
//!
//! Wraps xkbcommon: compiles the compositor-supplied keymap, resolves key
//! symbols and per-key text, tracks the effective modifier mask and runs
//! dead-key/multi-key compose sequences for the process locale.

use super::Modifiers;
use crate::error::{PlatformError, Result};
use log::{debug, info};
use memmap2::MmapOptions;
use std::ffi::OsStr;
use std::fs::File;
use std::os::fd::OwnedFd;
use xkbcommon::xkb;
use xkbcommon::xkb::compose;

/// Offset between evdev scancodes and xkb keycodes
pub const EVDEV_OFFSET: u32 = 8;

/// Layout-dependent queries the input device needs from a keymap
pub trait KeyboardLayout {
    /// Replaces the active keymap; on failure the previous one stays usable
    fn load_keymap(&mut self, fd: OwnedFd, size: u32) -> Result<()>;

    /// Whether a keymap has been compiled; key events are dropped until then
    fn is_ready(&self) -> bool;

    fn keysym(&self, keycode: u32) -> Option<u32>;

    fn key_repeats(&self, keycode: u32) -> bool;

    /// Feeds a modifier event and returns the Control/Alt/Shift/Meta subset
    fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) -> Modifiers;

    /// Text produced by a key press, after compose processing
    fn compose_text(&mut self, keysym: u32, keycode: u32) -> Option<String>;
}

/// Compose locale, read from `LC_ALL`, `LC_CTYPE`, `LANG` in that order
pub fn compose_locale() -> String {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "C".to_string())
}

/// Text a key produces on its own; a lone control character or DEL is not text
pub fn printable_text(text: String) -> Option<String> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (None, _) => None,
        (Some(c), None) if c < ' ' || c == '\u{7f}' => None,
        _ => Some(text),
    }
}

/// Result of feeding one symbol into the compose state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeOutcome {
    /// The symbol is not part of any sequence; use the key's own text
    Passthrough,
    /// A sequence is in progress
    Composing,
    /// A sequence finished with this text
    Composed(String),
    /// The sequence was aborted
    Cancelled,
}

pub struct ComposeEngine {
    state: compose::State,
}

impl ComposeEngine {
    pub fn from_locale(context: &xkb::Context, locale: &str) -> Option<Self> {
        match compose::Table::new_from_locale(context, OsStr::new(locale), compose::COMPILE_NO_FLAGS) {
            Ok(table) => Some(Self::from_table(&table)),
            Err(()) => {
                debug!("No compose table for locale {}", locale);
                None
            }
        }
    }

    /// Builds an engine from Compose-file text
    pub fn from_buffer(context: &xkb::Context, buffer: &str, locale: &str) -> Option<Self> {
        compose::Table::new_from_buffer(
            context,
            buffer.as_bytes(),
            locale,
            compose::FORMAT_TEXT_V1,
            compose::COMPILE_NO_FLAGS,
        )
        .ok()
        .map(|table| Self::from_table(&table))
    }

    fn from_table(table: &compose::Table) -> Self {
        Self {
            state: compose::State::new(table, compose::STATE_NO_FLAGS),
        }
    }

    pub fn feed(&mut self, keysym: u32) -> ComposeOutcome {
        self.state.feed(xkb::Keysym::from(keysym));
        match self.state.status() {
            compose::Status::Composed => {
                let text = self.state.utf8().unwrap_or_default();
                self.state.reset();
                ComposeOutcome::Composed(text)
            }
            compose::Status::Cancelled => {
                self.state.reset();
                ComposeOutcome::Cancelled
            }
            compose::Status::Composing => ComposeOutcome::Composing,
            compose::Status::Nothing => ComposeOutcome::Passthrough,
        }
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ModIndices {
    control: Option<u32>,
    alt: Option<u32>,
    shift: Option<u32>,
    meta: Option<u32>,
}

impl ModIndices {
    fn resolve(keymap: &xkb::Keymap) -> Self {
        let index = |name: &str| {
            let index = keymap.mod_get_index(name);
            (index != xkb::MOD_INVALID).then_some(index)
        };
        Self {
            control: index(xkb::MOD_NAME_CTRL),
            alt: index(xkb::MOD_NAME_ALT),
            shift: index(xkb::MOD_NAME_SHIFT),
            meta: index(xkb::MOD_NAME_LOGO),
        }
    }

    fn modifiers(&self, mask: xkb::ModMask) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        let pairs = [
            (self.control, Modifiers::CONTROL),
            (self.alt, Modifiers::ALT),
            (self.shift, Modifiers::SHIFT),
            (self.meta, Modifiers::META),
        ];
        for (index, flag) in pairs {
            if let Some(index) = index {
                if index < 32 && mask & (1 << index) != 0 {
                    modifiers |= flag;
                }
            }
        }
        modifiers
    }
}

struct CompiledKeymap {
    keymap: xkb::Keymap,
    state: xkb::State,
    mods: ModIndices,
}

/// xkbcommon-backed [`KeyboardLayout`]
pub struct XkbKeyboard {
    context: xkb::Context,
    compiled: Option<CompiledKeymap>,
    compose: Option<ComposeEngine>,
}

impl XkbKeyboard {
    pub fn new() -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            compiled: None,
            compose: None,
        }
    }

    /// Maps the keymap fd read-only, compiles it and releases the mapping
    pub fn load_keymap_fd(&mut self, fd: OwnedFd, size: u32) -> Result<()> {
        let text = {
            let file = File::from(fd);
            // SAFETY: private read-only mapping; the compositor does not
            // modify the keymap after sending it.
            let map = unsafe { MmapOptions::new().len(size as usize).map_copy_read_only(&file) }
                .map_err(|err| PlatformError::unavailable("keymap mapping", err))?;
            let end = map.iter().position(|&byte| byte == 0).unwrap_or(map.len());
            std::str::from_utf8(&map[..end])
                .map_err(|err| PlatformError::unavailable("keymap text", err))?
                .to_owned()
        };
        self.load_keymap_str(text)
    }

    /// Compiles `text`; the previous keymap stays in place if this fails
    pub fn load_keymap_str(&mut self, text: String) -> Result<()> {
        let keymap = xkb::Keymap::new_from_string(
            &self.context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| PlatformError::unavailable("keymap", "compilation failed"))?;

        let state = xkb::State::new(&keymap);
        let mods = ModIndices::resolve(&keymap);

        let locale = compose_locale();
        if let Some(compose) = ComposeEngine::from_locale(&self.context, &locale) {
            self.compose = Some(compose);
        }

        // Swap only once the new pair is complete
        self.compiled = Some(CompiledKeymap {
            keymap,
            state,
            mods,
        });
        info!("⌨️ Keymap compiled (compose locale {})", locale);
        Ok(())
    }

    pub fn set_compose(&mut self, compose: Option<ComposeEngine>) {
        self.compose = compose;
    }

    pub fn context(&self) -> &xkb::Context {
        &self.context
    }
}

impl Default for XkbKeyboard {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardLayout for XkbKeyboard {
    fn load_keymap(&mut self, fd: OwnedFd, size: u32) -> Result<()> {
        self.load_keymap_fd(fd, size)
    }

    fn is_ready(&self) -> bool {
        self.compiled.is_some()
    }

    fn keysym(&self, keycode: u32) -> Option<u32> {
        let compiled = self.compiled.as_ref()?;
        Some(u32::from(compiled.state.key_get_one_sym(keycode.into())))
    }

    fn key_repeats(&self, keycode: u32) -> bool {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.keymap.key_repeats(keycode.into()))
            .unwrap_or(false)
    }

    fn update_modifiers(&mut self, depressed: u32, latched: u32, locked: u32, group: u32) -> Modifiers {
        let Some(compiled) = self.compiled.as_mut() else {
            return Modifiers::empty();
        };
        compiled
            .state
            .update_mask(depressed, latched, locked, 0, 0, group);
        let mask = compiled.state.serialize_mods(xkb::STATE_MODS_EFFECTIVE);
        compiled.mods.modifiers(mask)
    }

    fn compose_text(&mut self, keysym: u32, keycode: u32) -> Option<String> {
        let outcome = match self.compose.as_mut() {
            Some(compose) => compose.feed(keysym),
            None => ComposeOutcome::Passthrough,
        };
        match outcome {
            ComposeOutcome::Composed(text) => Some(text).filter(|text| !text.is_empty()),
            ComposeOutcome::Cancelled | ComposeOutcome::Composing => None,
            ComposeOutcome::Passthrough => {
                let compiled = self.compiled.as_ref()?;
                printable_text(compiled.state.key_get_utf8(keycode.into()))
            }
        }
    }
}

impl std::fmt::Debug for XkbKeyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XkbKeyboard")
            .field("compiled", &self.compiled.is_some())
            .field("compose", &self.compose.is_some())
            .finish()
    }
}
