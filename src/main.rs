//! # Skylight demo client
//!
//! Opens one toplevel window on the running compositor and logs what the
//! platform layer delivers to it: input, resizes, scaling and state changes.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use skylight::window::ResizeReason;
use skylight::{
    wayland, CancellationToken, InputEvent, PixelSize, SkylightConfig, ToplevelOptions,
    WindowEvents, WindowState,
};

#[derive(Parser)]
#[command(name = "skylight")]
#[command(about = "Opens a Wayland window and logs the events the platform layer delivers")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/skylight/skylight.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Window title
    #[arg(short, long, default_value = "Skylight")]
    title: String,

    /// Application id reported to the compositor
    #[arg(long)]
    app_id: Option<String>,

    /// Initial client size as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    size: Option<PixelSize>,

    /// Print the clipboard text once connected
    #[arg(long)]
    print_clipboard: bool,
}

fn parse_size(value: &str) -> std::result::Result<PixelSize, String> {
    let (width, height) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value}"))?;
    let width: u32 = width.parse().map_err(|err| format!("bad width: {err}"))?;
    let height: u32 = height.parse().map_err(|err| format!("bad height: {err}"))?;
    if width == 0 || height == 0 {
        return Err("both dimensions must be non-zero".to_string());
    }
    Ok(PixelSize::new(width, height))
}

/// Logs everything it receives; closing it stops the loop
struct LoggingWindow {
    token: CancellationToken,
}

impl WindowEvents for LoggingWindow {
    fn input(&mut self, event: InputEvent) {
        match event {
            InputEvent::Pointer { .. } | InputEvent::Wheel { .. } | InputEvent::Gesture { .. } => {
                log::debug!("🖱️ {:?}", event)
            }
            InputEvent::Text { text, .. } => info!("⌨️ Text {:?}", text),
            InputEvent::Preedit { text, .. } => info!("⌨️ Preedit {:?}", text),
            other => info!("🎮 {:?}", other),
        }
    }

    fn resized(&mut self, size: PixelSize, reason: ResizeReason) {
        info!("🪟 Resized to {}x{} ({:?})", size.width, size.height, reason);
    }

    fn scaling_changed(&mut self, scaling: f64) {
        info!("🖥️ Scaling now {}", scaling);
    }

    fn state_changed(&mut self, state: WindowState) {
        info!("🪟 State {:?}", state);
    }

    fn closed(&mut self) {
        info!("🪟 Window closed");
        self.token.cancel();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // The configuration can also turn on debug logging, so read it first
    let loaded = SkylightConfig::load(&cli.config);
    let debug = cli.debug || loaded.as_ref().is_ok_and(|config| config.general.debug);

    // Initialize logging
    if debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Skylight");
    info!("📄 Version: {}", skylight::VERSION);

    let mut config = match loaded {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            info!("📝 Using default configuration");
            SkylightConfig::default()
        }
    };

    // Override config with CLI flags
    if cli.app_id.is_some() {
        config.general.app_id = cli.app_id.clone();
    }

    let (event_loop, mut platform) = wayland::connect(config)?;
    let token = event_loop.cancellation_token();

    let shutdown = token.clone();
    ctrlc::set_handler(move || {
        info!("🛑 Interrupted");
        shutdown.cancel();
    })?;

    if cli.print_clipboard {
        match platform.clipboard_text() {
            Some(text) => info!("📋 Clipboard: {:?}", text),
            None => info!("📋 Clipboard holds no text"),
        }
    }

    let window = platform.create_toplevel(
        Box::new(LoggingWindow {
            token: token.clone(),
        }),
        ToplevelOptions {
            title: cli.title.clone(),
            size: cli.size,
            parent: None,
        },
    )?;
    info!("✨ Window {} is up", window);

    event_loop.run(&mut platform, &token)?;

    info!("👋 Skylight shutting down");
    Ok(())
}
