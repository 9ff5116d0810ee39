//! druid - terminal client for monome crow.
//!
//! Sets up file logging and the terminal, starts the crow connection
//! manager on a tokio runtime, and runs the UI loop on the main thread.

mod app;
mod ui;

use std::fs::File;
use std::io::{self, Write};
use std::panic;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use druid_tui::config::Cli;
use druid_tui::crow::{shutdown_channel, ConnectionManager, OutputWriter, SerialTransport};

use app::App;

/// Global flag to track if terminal is in raw mode (for panic cleanup)
static TERMINAL_RAW: AtomicBool = AtomicBool::new(false);

/// RAII guard for terminal state management.
/// Ensures terminal is restored to normal state when dropped, even on panic or early return.
struct TerminalGuard;

impl TerminalGuard {
    /// Initialize terminal for TUI mode (raw mode, alternate screen).
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        TERMINAL_RAW.store(true, Ordering::SeqCst);

        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            TERMINAL_RAW.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        TERMINAL_RAW.store(false, Ordering::SeqCst);
    }
}

/// Install a panic hook that restores terminal state before printing panic info.
fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        if TERMINAL_RAW.load(Ordering::SeqCst) {
            // Best effort cleanup - ignore errors
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen);
            let _ = io::stdout().flush();
        }
        default_hook(panic_info);
    }));
}

/// Log to a file; the terminal belongs to the UI.
fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "druid=debug,druid_tui=debug".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    Ok(())
}

/// Target frame duration (~60 FPS).
const FRAME_DURATION: Duration = Duration::from_millis(16);

/// How long to wait for the listener after quitting.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lines moved per PageUp/PageDown.
const PAGE_LINES: usize = 10;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Install panic hook FIRST for terminal safety
    install_panic_hook();
    init_logging(&cli.log_file)?;

    info!("Starting druid v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let writer = OutputWriter::new();
    let mut app = App::new(writer.clone(), cli.script.clone());

    let mut manager = ConnectionManager::new(
        SerialTransport::new(cli.serial_settings()),
        app::crow_pipeline(app.event_sender()).with_span(tracing::debug_span!("rx")),
        writer.clone(),
    )
    .with_events(app::connection_events(app.event_sender()))
    .with_policy(cli.reconnect_policy())
    .with_span(tracing::info_span!("crow", port = cli.port.as_deref().unwrap_or("auto")));

    let (trigger, shutdown) = shutdown_channel();
    let listener = runtime.spawn(async move { manager.listen(shutdown).await });

    let terminal_guard = TerminalGuard::new()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let result = run_app(&mut terminal, &mut app);

    // Stop the listener before restoring the terminal
    trigger.trigger();
    writer.detach();
    match runtime.block_on(async { tokio::time::timeout(SHUTDOWN_TIMEOUT, listener).await }) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Listener task failed: {}", e),
        Err(_) => warn!("Listener did not stop within {:?}", SHUTDOWN_TIMEOUT),
    }
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    terminal.show_cursor()?;
    drop(terminal_guard);

    if let Err(e) = result {
        tracing::error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        return Err(e);
    }

    info!("druid exited cleanly");
    Ok(())
}

/// Main application loop.
fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        // Poll crow events (non-blocking)
        app.poll_crow_events();

        // Only redraw if state has changed (dirty-flag optimization)
        if app.take_needs_redraw() {
            terminal.draw(|f| ui::render(f, app))?;
        }

        if app.should_quit {
            return Ok(());
        }

        // Poll for events with frame-rate limiting
        if event::poll(FRAME_DURATION)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
                Event::Resize(_, _) => app.mark_dirty(),
                _ => {}
            }
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => app.should_quit = true,
        KeyCode::Enter => app.submit(),
        KeyCode::PageUp => app.scroll_output_up(PAGE_LINES),
        KeyCode::PageDown => app.scroll_output_down(PAGE_LINES),
        _ => {
            app.input.input(key);
            app.mark_dirty();
        }
    }
}
