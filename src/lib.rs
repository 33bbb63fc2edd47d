//! # Skylight
//!
//! Client-side Wayland platform layer for retained-mode UI toolkits.
//!
//! ## Architecture
//!
//! Skylight is built from small state machines driven by one loop thread:
//! - `event_loop`: Display event loop with timers and a cross-thread job queue
//! - `registry`: Global registry (binding and unbinding compositor globals)
//! - `screens`: Output screens and the primary screen
//! - `input`: Seat devices, keymaps, compose, key repeat, cursors and text input
//! - `clipboard`: Clipboard and drag-and-drop data transfer
//! - `window`: Toplevel and popup surfaces with configure handling
//! - `platform`: Wires the components to the compositor backend
//! - `wayland`: The wayland-client backend
//! - `config`: Configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use skylight::{wayland, CancellationToken, SkylightConfig, ToplevelOptions};
//! # struct Ui;
//! # impl skylight::WindowEvents for Ui {
//! #     fn input(&mut self, _event: skylight::InputEvent) {}
//! # }
//!
//! fn main() -> anyhow::Result<()> {
//!     let (event_loop, mut platform) = wayland::connect(SkylightConfig::default())?;
//!     platform.create_toplevel(Box::new(Ui), ToplevelOptions::default())?;
//!     let token = event_loop.cancellation_token();
//!     event_loop.run(&mut platform, &token)?;
//!     Ok(())
//! }
//! ```

pub mod clipboard;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod geometry;
pub mod input;
pub mod platform;
pub mod registry;
pub mod screens;
pub mod wayland;
pub mod window;

// Re-export main types for easy access
pub use clipboard::{DataFormat, DndAction, DragEvent, DragEventKind, Payload};
pub use config::SkylightConfig;
pub use error::{PlatformError, Result};
pub use event_loop::{CancellationToken, DisplayEventLoop, LoopSender};
pub use geometry::{PixelPoint, PixelRect, PixelSize, Point};
pub use input::cursor::CursorShape;
pub use input::text_input::{TextInputClient, TextInputOptions};
pub use input::InputEvent;
pub use platform::{Backend, NativeHandles, Platform, PlatformSettings, ToplevelOptions};
pub use window::{WindowEvents, WindowId, WindowState};

/// Version information for Skylight
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
