//! Configuration management for Skylight
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers keyboard repeat and scrolling defaults,
//! cursor theming, initial window geometry and clipboard transfer limits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration struct containing all Skylight settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SkylightConfig {
    /// Process-wide settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Keyboard repeat and pointer scrolling
    #[serde(default)]
    pub input: InputConfig,

    /// Cursor theme selection
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Initial window geometry and decorations
    #[serde(default)]
    pub window: WindowConfig,

    /// Clipboard and drag-and-drop transfers
    #[serde(default)]
    pub clipboard: ClipboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GeneralConfig {
    /// Application id announced on every toplevel
    #[serde(default)]
    pub app_id: Option<String>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Key repeat delay (milliseconds) until the compositor reports its own
    pub keyboard_repeat_delay: u32,

    /// Key repeat rate (keys per second); 0 disables repeat
    pub keyboard_repeat_rate: u32,

    /// Scale applied to protocol scroll deltas
    #[serde(default = "InputConfig::default_scroll_factor")]
    pub scroll_factor: f64,

    /// Invert scroll deltas so content follows the fingers
    #[serde(default = "InputConfig::default_natural_scrolling")]
    pub natural_scrolling: bool,

    /// Longest gap between two clicks of a double click (milliseconds)
    #[serde(default = "InputConfig::default_double_click_time")]
    pub double_click_time_ms: u32,

    /// Largest pointer travel between two clicks of a double click (width, height)
    #[serde(default = "InputConfig::default_double_click_size")]
    pub double_click_size: [u32; 2],

    /// Largest travel between two taps of a touch double tap (width, height)
    #[serde(default = "InputConfig::default_touch_double_click_size")]
    pub touch_double_click_size: [u32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorConfig {
    /// XCursor theme name; falls back to XCURSOR_THEME, then "default"
    #[serde(default)]
    pub theme: Option<String>,

    /// Nominal cursor size in pixels; falls back to XCURSOR_SIZE
    #[serde(default = "CursorConfig::default_size")]
    pub size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    /// Width used when no output has been announced yet
    pub default_width: u32,

    /// Height used when no output has been announced yet
    pub default_height: u32,

    /// Initial client size as a fraction of the first screen (width, height)
    #[serde(default = "WindowConfig::default_screen_fraction")]
    pub initial_screen_fraction: [f64; 2],

    /// Ask the compositor to draw decorations
    #[serde(default = "WindowConfig::default_server_side_decorations")]
    pub server_side_decorations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipboardConfig {
    /// Upper bound on a blocking inbound read (milliseconds)
    #[serde(default = "ClipboardConfig::default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Inbound transfers larger than this are truncated
    #[serde(default = "ClipboardConfig::default_max_transfer")]
    pub max_transfer_bytes: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            keyboard_repeat_delay: 600,
            keyboard_repeat_rate: 25,
            scroll_factor: Self::default_scroll_factor(),
            natural_scrolling: Self::default_natural_scrolling(),
            double_click_time_ms: Self::default_double_click_time(),
            double_click_size: Self::default_double_click_size(),
            touch_double_click_size: Self::default_touch_double_click_size(),
        }
    }
}

impl InputConfig {
    fn default_scroll_factor() -> f64 {
        0.1
    }
    fn default_natural_scrolling() -> bool {
        true
    }
    fn default_double_click_time() -> u32 {
        500
    }
    fn default_double_click_size() -> [u32; 2] {
        [2, 2]
    }
    fn default_touch_double_click_size() -> [u32; 2] {
        [16, 16]
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            theme: None,
            size: Self::default_size(),
        }
    }
}

impl CursorConfig {
    fn default_size() -> u32 {
        24
    }

    /// Theme name after environment fallbacks
    pub fn resolved_theme(&self) -> String {
        self.theme
            .clone()
            .or_else(|| std::env::var("XCURSOR_THEME").ok())
            .filter(|theme| !theme.is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Cursor size after environment fallbacks
    pub fn resolved_size(&self) -> u32 {
        if self.size != Self::default_size() {
            return self.size;
        }
        std::env::var("XCURSOR_SIZE")
            .ok()
            .and_then(|size| size.parse().ok())
            .unwrap_or(self.size)
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            default_width: 400,
            default_height: 600,
            initial_screen_fraction: Self::default_screen_fraction(),
            server_side_decorations: Self::default_server_side_decorations(),
        }
    }
}

impl WindowConfig {
    fn default_screen_fraction() -> [f64; 2] {
        [0.75, 0.7]
    }
    fn default_server_side_decorations() -> bool {
        true
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: Self::default_read_timeout(),
            max_transfer_bytes: Self::default_max_transfer(),
        }
    }
}

impl ClipboardConfig {
    fn default_read_timeout() -> u64 {
        5000
    }
    fn default_max_transfer() -> usize {
        64 * 1024 * 1024
    }
}

impl SkylightConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: SkylightConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.input.keyboard_repeat_rate == 0 && self.input.keyboard_repeat_delay != 0 {
            anyhow::bail!("Invalid keyboard_repeat_rate: 0 requires keyboard_repeat_delay = 0");
        }

        if !(self.input.scroll_factor > 0.0 && self.input.scroll_factor <= 100.0) {
            anyhow::bail!("Invalid scroll_factor: must be in (0.0, 100.0]");
        }

        if self.input.double_click_time_ms == 0 {
            anyhow::bail!("Invalid double_click_time_ms: must be non-zero");
        }

        if !(8..=256).contains(&self.cursor.size) {
            anyhow::bail!("Invalid cursor size {}: must be between 8 and 256", self.cursor.size);
        }

        if self.window.default_width == 0 || self.window.default_height == 0 {
            anyhow::bail!("Invalid default window size: both dimensions must be non-zero");
        }

        for fraction in self.window.initial_screen_fraction {
            if !(fraction > 0.0 && fraction <= 1.0) {
                anyhow::bail!("Invalid initial_screen_fraction {}: must be in (0.0, 1.0]", fraction);
            }
        }

        if self.clipboard.read_timeout_ms == 0 {
            anyhow::bail!("Invalid read_timeout_ms: must be non-zero");
        }

        if self.clipboard.max_transfer_bytes == 0 {
            anyhow::bail!("Invalid max_transfer_bytes: must be non-zero");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults override this config
    pub fn merge_partial(mut self, partial: SkylightConfig) -> Self {
        let default_config = SkylightConfig::default();

        if partial.general != default_config.general {
            self.general = partial.general;
        }
        if partial.input != default_config.input {
            self.input = partial.input;
        }
        if partial.cursor != default_config.cursor {
            self.cursor = partial.cursor;
        }
        if partial.window != default_config.window {
            self.window = partial.window;
        }
        if partial.clipboard != default_config.clipboard {
            self.clipboard = partial.clipboard;
        }

        self
    }
}
