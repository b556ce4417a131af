//! termbridge - bridges a shell to an interactive terminal surface
//!
//! termbridge binds one long-lived shell process to the hosting terminal:
//! shell output is relayed to the display surface untouched, keystrokes go
//! back to the shell, and the shell is kept in sync with the terminal's
//! grid whenever the window is resized.
//!
//! # Quick Start
//!
//! ```text
//! termbridge                 # Bridge the default shell
//! termbridge -s "bash -i"    # Bridge a custom command
//! termbridge --echo          # Loopback mode, no child process
//! ```
//!
//! Press Ctrl+Q to detach and quit.

mod config;
mod core;
mod ui;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config as FileConfig;
use crate::core::bridge::SessionBridge;
use crate::core::geometry::{CellMetrics, Geometry, GeometryTracker};
use crate::core::transport::{channel_pair, ProcessTransport};
use crate::ui::{ConsoleSurface, ConsoleViewport, InputEncoder};

/// Application configuration
struct Config {
    /// Shell command to bridge
    shell: Option<String>,
    /// Run against the in-process loopback instead of a child process
    echo: bool,
    /// Shell was explicitly set via command line
    shell_from_cli: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None, // From config.toml, or the platform default
            echo: false,
            shell_from_cli: false,
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd.exe";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "sh";

fn print_version() {
    eprintln!("termbridge {}", VERSION);
}

fn print_help() {
    eprintln!(
        "termbridge {} - bridges a shell to an interactive terminal surface",
        VERSION
    );
    eprintln!();
    eprintln!("Usage: termbridge [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  (default)             Shell from config.toml or the platform default");
    eprintln!("  -s, --shell <CMD>     Bridge a custom shell command");
    eprintln!("  -e, --echo            Loopback mode: typed input is echoed back");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  Ctrl+Q                Detach and quit");
    eprintln!();
    eprintln!("Config file: ~/.termbridge/config.toml");
    eprintln!("Log file:    ~/.termbridge/termbridge.log");
}

/// Parse command line arguments
fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut config = Config::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                config.shell = Some(args[i].clone());
                config.shell_from_cli = true;
            }
            "-e" | "--echo" => {
                config.echo = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
    }

    Ok(config)
}

fn log_level(name: &str) -> Level {
    match name {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Initialize logging to ~/.termbridge/termbridge.log (append mode).
fn init_logging(level: Level) {
    let log_path = config::home_dir()
        .map(|h| h.join(".termbridge").join("termbridge.log"))
        .unwrap_or_else(|| std::path::PathBuf::from("termbridge.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Restores the console on every exit path, error exits included.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn main() -> anyhow::Result<()> {
    let mut config = match parse_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let file_config = FileConfig::load();
    init_logging(log_level(&file_config.log_level));
    info!("termbridge starting...");

    // Merge config: command line args override config file
    if !config.shell_from_cli {
        if let Some(ref shell) = file_config.shell {
            config.shell = Some(shell.clone());
        }
    }
    if config.shell.is_none() {
        config.shell = Some(DEFAULT_SHELL.to_string());
    }

    let fallback = Geometry::new(file_config.fallback.columns, file_config.fallback.rows);

    if config.echo {
        run_echo_session(fallback)?;
    } else {
        run_shell_session(&config, fallback)?;
    }

    info!("termbridge exiting");
    Ok(())
}

fn new_tracker(fallback: Geometry) -> anyhow::Result<Arc<GeometryTracker>> {
    // The hosting terminal reports its grid directly, so one cell is the
    // measurement unit.
    let metrics = CellMetrics::new(1, 1).map_err(|e| anyhow::anyhow!(e))?;
    Ok(Arc::new(GeometryTracker::new(
        Box::new(ConsoleViewport::new(fallback)),
        metrics,
    )))
}

/// Bridge a spawned shell process to the console.
fn run_shell_session(config: &Config, fallback: Geometry) -> anyhow::Result<()> {
    let shell = config.shell.as_deref().unwrap_or(DEFAULT_SHELL);
    info!(shell, "starting shell session");

    let tracker = new_tracker(fallback)?;
    let transport = Arc::new(
        ProcessTransport::spawn(shell, tracker.recompute().ok())
            .map_err(|e| anyhow::anyhow!("failed to start {}: {}", shell, e))?,
    );

    let guard = RawModeGuard::enable()?;
    let (surface, input) = ConsoleSurface::new();
    let bridge = SessionBridge::start(transport.clone(), Box::new(surface), tracker.clone());

    let poll_timeout = Duration::from_millis(10);
    loop {
        if bridge.is_closed() {
            break;
        }
        if !transport.is_running() {
            // Drain whatever output is still queued before leaving.
            transport.dispatch_inbound();
            info!("shell exited");
            break;
        }

        if event::poll(poll_timeout)? {
            match event::read()? {
                Event::Key(key_event) => {
                    if key_event.kind == KeyEventKind::Release {
                        continue;
                    }
                    if is_quit_key(&key_event.code, &key_event.modifiers) {
                        info!("detach requested");
                        break;
                    }
                    let bytes = InputEncoder::encode(&key_event);
                    if !bytes.is_empty() {
                        input.feed(&bytes);
                    }
                }
                Event::Resize(_, _) => {
                    tracker.viewport_resized();
                }
                _ => {}
            }
        }

        transport.dispatch_inbound();
    }

    bridge.shutdown();
    drop(guard);
    Ok(())
}

/// Bridge the in-process loopback: everything typed comes straight back.
fn run_echo_session(fallback: Geometry) -> anyhow::Result<()> {
    info!("starting echo session");

    let tracker = new_tracker(fallback)?;
    let (transport, host) = channel_pair();
    let transport = Arc::new(transport);

    let guard = RawModeGuard::enable()?;
    let (surface, input) = ConsoleSurface::new();
    let bridge = SessionBridge::start(transport.clone(), Box::new(surface), tracker.clone());

    let poll_timeout = Duration::from_millis(10);
    loop {
        if bridge.is_closed() {
            break;
        }

        if event::poll(poll_timeout)? {
            match event::read()? {
                Event::Key(key_event) => {
                    if key_event.kind == KeyEventKind::Release {
                        continue;
                    }
                    if is_quit_key(&key_event.code, &key_event.modifiers) {
                        info!("detach requested");
                        break;
                    }
                    let bytes = InputEncoder::encode(&key_event);
                    if !bytes.is_empty() {
                        input.feed(&bytes);
                    }
                }
                Event::Resize(_, _) => {
                    tracker.viewport_resized();
                }
                _ => {}
            }
        }

        // Host side: echo session input back as output, CR as CRLF so
        // lines advance on the raw-mode console.
        for chunk in host.drain_sent() {
            if chunk == b"\r" {
                host.push(b"\r\n");
            } else {
                host.push(&chunk);
            }
        }
        transport.dispatch_inbound();
    }

    bridge.shutdown();
    drop(guard);
    Ok(())
}

fn is_quit_key(code: &KeyCode, modifiers: &KeyModifiers) -> bool {
    matches!(code, KeyCode::Char('q') | KeyCode::Char('Q'))
        && modifiers.contains(KeyModifiers::CONTROL)
}
