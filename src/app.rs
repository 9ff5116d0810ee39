//! Application state management.
//!
//! `App` owns everything the UI draws. The crow reader thread never touches
//! it directly: protocol callbacks forward [`CrowEvent`]s over an mpsc
//! channel that the main loop drains once per frame.
//!
//! ```text
//! reader thread                       UI thread
//! ┌──────────────┐   CrowEvent    ┌──────────────┐
//! │   Pipeline   │ ─────────────► │     App      │ ──► ui::render
//! │ (callbacks)  │    (mpsc)      │ (poll/frame) │
//! └──────────────┘                └──────┬───────┘
//!                                        │ OutputWriter
//!                                        ▼
//!                                      crow
//! ```

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use ratatui::style::{Color, Style};
use tracing::{debug, info, warn};
use tui_textarea::TextArea;

use druid_tui::crow::{
    ChannelHandler, ConnectionEvents, Dispatch, EventTree, OutputWriter, Pipeline,
};
use druid_tui::script::{self, Command, ScriptAction, HELP, INTRO, MARKER_PAUSE};

/// Lines kept in the output pane.
const OUTPUT_LIMIT: usize = 2000;

/// Lines kept in each capture pane.
const CAPTURE_LIMIT: usize = 64;

/// Prompt shown before the input field.
pub const PROMPT: &str = "> ";

// ===== Events From The Reader Thread =====

/// The three small panes above the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    Input1,
    Input2,
    Ii,
}

impl Capture {
    pub const ALL: [Capture; 3] = [Capture::Input1, Capture::Input2, Capture::Ii];

    fn index(self) -> usize {
        match self {
            Capture::Input1 => 0,
            Capture::Input2 => 1,
            Capture::Ii => 2,
        }
    }
}

/// Something the UI should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrowEvent {
    Connected(String),
    Disconnected(String),
    Capture(Capture, String),
    Output(String),
}

fn arg(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or_default()
}

fn capture_handler<F>(events: &Sender<CrowEvent>, pane: Capture, format: F) -> ChannelHandler
where
    F: Fn(&[String]) -> String + Send + Sync + 'static,
{
    let events = events.clone();
    Arc::new(move |_line: &str, _event: &str, args: &[String]| {
        let _ = events.send(CrowEvent::Capture(pane, format(args)));
    })
}

/// Protocol pipeline feeding the capture and output panes.
///
/// `stream` and `change` go to the input panes by channel, every `ii.*`
/// event goes to the ii pane, and free-form text goes to the output pane.
pub fn crow_pipeline(events: Sender<CrowEvent>) -> Pipeline {
    let input1 = capture_handler(&events, Capture::Input1, |args| {
        format!("\ninput[{}] = {}\n", arg(args, 0), arg(args, 1))
    });
    let input2 = capture_handler(&events, Capture::Input2, |args| {
        format!("input[{}] = {}\n", arg(args, 0), arg(args, 1))
    });

    let ii_events = events.clone();
    let tree = EventTree::new()
        .indexed("stream", vec![Some(input1.clone()), Some(input2.clone())])
        .indexed("change", vec![Some(input1), Some(input2)])
        .handler("ii", move |_line, event, args| {
            let text = format!("{}({})\n", event, args.join(", "));
            let _ = ii_events.send(CrowEvent::Capture(Capture::Ii, text));
            Dispatch::Handled
        });

    Pipeline::crow(tree, move |text| {
        let _ = events.send(CrowEvent::Output(text.to_string()));
    })
}

/// Connection callbacks that update the status line.
pub fn connection_events(events: Sender<CrowEvent>) -> ConnectionEvents {
    let on_disconnect = events.clone();
    ConnectionEvents::new()
        .on_connect(move |info| {
            let _ = events.send(CrowEvent::Connected(info.port.clone()));
        })
        .on_disconnect(move |reason| {
            let _ = on_disconnect.send(CrowEvent::Disconnected(reason.to_string()));
        })
}

// ===== Scrollback =====

/// Append-only text with a cap on the number of lines kept.
#[derive(Debug, Clone)]
pub struct Scrollback {
    text: String,
    limit: usize,
}

impl Scrollback {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);

        let lines = self.line_count();
        if lines > self.limit {
            let excess = lines - self.limit;
            if let Some((cut, _)) = self.text.match_indices('\n').nth(excess - 1) {
                self.text.drain(..=cut);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of display lines; a trailing newline opens an empty last line.
    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }
}

// ===== App =====

/// Main application state.
pub struct App<'a> {
    /// Flag to exit the application.
    pub should_quit: bool,

    /// Dirty flag - set when UI needs to be redrawn.
    needs_redraw: bool,

    /// Single-line REPL input.
    pub input: TextArea<'a>,

    /// REPL output, seeded with the intro banner.
    pub output: Scrollback,

    /// Lines scrolled back from the bottom of the output pane.
    pub output_scroll: usize,

    captures: [Scrollback; 3],

    /// Port of the open connection, if any.
    pub connected_port: Option<String>,

    /// Script used by `r` and `u` without a filename.
    pub default_script: PathBuf,

    writer: OutputWriter,
    events_tx: Sender<CrowEvent>,
    events_rx: Receiver<CrowEvent>,
}

fn new_input<'a>() -> TextArea<'a> {
    let mut input = TextArea::default();
    input.set_cursor_line_style(Style::default());
    input.set_style(Style::default().fg(Color::Rgb(0xf2, 0xf0, 0xec)));
    input
}

impl<'a> App<'a> {
    pub fn new(writer: OutputWriter, default_script: PathBuf) -> Self {
        let (events_tx, events_rx) = mpsc::channel();

        let mut output = Scrollback::new(OUTPUT_LIMIT);
        output.push(INTRO);

        Self {
            should_quit: false,
            needs_redraw: true, // Initial draw required
            input: new_input(),
            output,
            output_scroll: 0,
            captures: [
                Scrollback::new(CAPTURE_LIMIT),
                Scrollback::new(CAPTURE_LIMIT),
                Scrollback::new(CAPTURE_LIMIT),
            ],
            connected_port: None,
            default_script,
            writer,
            events_tx,
            events_rx,
        }
    }

    /// Sender for the pipeline and connection callbacks.
    pub fn event_sender(&self) -> Sender<CrowEvent> {
        self.events_tx.clone()
    }

    pub fn capture(&self, pane: Capture) -> &Scrollback {
        &self.captures[pane.index()]
    }

    // ===== Dirty Flag (Rendering Optimization) =====

    /// Mark UI as needing redraw.
    pub fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// Check if redraw is needed and reset the flag.
    pub fn take_needs_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    // ===== Crow Events =====

    /// Drain events from the reader thread (non-blocking).
    pub fn poll_crow_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                CrowEvent::Connected(port) => {
                    info!("Connected to crow on {}", port);
                    self.connected_port = Some(port);
                }
                CrowEvent::Disconnected(reason) => {
                    debug!("Disconnected: {}", reason);
                    self.connected_port = None;
                }
                CrowEvent::Capture(pane, text) => self.captures[pane.index()].push(&text),
                CrowEvent::Output(text) => self.output.push(&text),
            }
            self.mark_dirty();
        }
    }

    // ===== Output Pane =====

    pub fn show(&mut self, text: &str) {
        self.output.push(text);
        self.output_scroll = 0;
        self.mark_dirty();
    }

    pub fn scroll_output_up(&mut self, lines: usize) {
        let max = self.output.line_count().saturating_sub(1);
        self.output_scroll = (self.output_scroll + lines).min(max);
        self.mark_dirty();
    }

    pub fn scroll_output_down(&mut self, lines: usize) {
        self.output_scroll = self.output_scroll.saturating_sub(lines);
        self.mark_dirty();
    }

    // ===== Input =====

    /// Take the input line, echo it, and act on it.
    pub fn submit(&mut self) {
        let line = self.input.lines().join("");
        self.input = new_input();
        self.show(&format!("\n{}{}\n", PROMPT, line));

        match Command::parse(&line) {
            Command::Quit => {
                self.show("bye.\n");
                self.should_quit = true;
            }
            Command::Help => self.show(HELP),
            Command::PrintScript => {
                let result = script::print_script(&self.writer);
                self.report(result);
            }
            Command::Run(path) => self.transfer(path, ScriptAction::Run),
            Command::Upload(path) => self.transfer(path, ScriptAction::Upload),
            Command::Send(text) => {
                let result = script::send_line(&self.writer, &text);
                self.report(result);
            }
        }
    }

    fn report<E: std::fmt::Display>(&mut self, result: Result<(), E>) {
        if let Err(e) = result {
            warn!("Write failed: {}", e);
            self.show(&format!("{}\n", e));
        }
    }

    /// Send a script file in the background so the marker pauses don't
    /// stall the UI.
    fn transfer(&mut self, path: Option<PathBuf>, action: ScriptAction) {
        let path = path.unwrap_or_else(|| self.default_script.clone());

        if !self.writer.is_attached() {
            self.show("not connected\n");
            return;
        }

        let contents = match script::load_script(&path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("{:#}", e);
                self.show(&format!("{:#}\n", e));
                return;
            }
        };

        self.show(&format!("{} {}\n", action.verb(), path.display()));

        let writer = self.writer.clone();
        let events = self.events_tx.clone();
        let spawned = std::thread::Builder::new()
            .name("druid-script".to_string())
            .spawn(move || {
                if let Err(e) = script::send_script(&writer, &contents, action, MARKER_PAUSE) {
                    let _ = events.send(CrowEvent::Output(format!("{}\n", e)));
                }
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn script thread: {}", e);
            self.show(&format!("{}\n", e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn connected_app() -> (App<'static>, SharedBuf) {
        let buf = SharedBuf::default();
        let writer = OutputWriter::new();
        writer.attach(Box::new(buf.clone()));
        (App::new(writer, PathBuf::from("sketch.lua")), buf)
    }

    fn type_line(app: &mut App, text: &str) {
        app.input.insert_str(text);
        app.submit();
    }

    #[test]
    fn test_new_app_shows_intro() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        assert_eq!(app.output.as_str(), INTRO);
        assert!(app.take_needs_redraw());
        assert!(!app.take_needs_redraw());
        assert_eq!(app.connected_port, None);
    }

    #[test]
    fn test_pipeline_routes_to_panes() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        let pipeline = crow_pipeline(app.event_sender());

        let _ = pipeline.handle_packet(b"^^stream(1,2.5)^^change(2,3)");
        let _ = pipeline.handle_packet(b"^^ii.jf.trigger(1,5)");
        let _ = pipeline.handle_packet(b"hello");
        app.poll_crow_events();

        assert_eq!(app.capture(Capture::Input1).as_str(), "\ninput[1] = 2.5\n");
        assert_eq!(app.capture(Capture::Input2).as_str(), "input[2] = 3\n");
        assert_eq!(app.capture(Capture::Ii).as_str(), "ii.jf.trigger(1, 5)\n");
        assert_eq!(app.output.as_str(), format!("{}hello\n", INTRO));
    }

    #[test]
    fn test_unknown_channel_falls_through_to_output() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        let pipeline = crow_pipeline(app.event_sender());

        let _ = pipeline.handle_packet(b"^^stream(3,1.0)");
        app.poll_crow_events();

        assert_eq!(app.capture(Capture::Input1).as_str(), "");
        assert_eq!(app.output.as_str(), format!("{}^^stream(3,1.0)\n", INTRO));
    }

    #[test]
    fn test_connection_events_update_status() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        let events = app.event_sender();

        events
            .send(CrowEvent::Connected("/dev/ttyACM0".to_string()))
            .unwrap();
        app.poll_crow_events();
        assert_eq!(app.connected_port.as_deref(), Some("/dev/ttyACM0"));

        events
            .send(CrowEvent::Disconnected("device closed the connection".to_string()))
            .unwrap();
        app.poll_crow_events();
        assert_eq!(app.connected_port, None);
    }

    #[test]
    fn test_submit_sends_lua_and_echoes() {
        let (mut app, buf) = connected_app();
        type_line(&mut app, "output[1].volts = 3");

        assert_eq!(buf.contents(), "output[1].volts = 3\r\n");
        assert!(app.output.as_str().ends_with("\n> output[1].volts = 3\n"));
        assert!(app.input.lines().join("").is_empty());
    }

    #[test]
    fn test_submit_print_script() {
        let (mut app, buf) = connected_app();
        type_line(&mut app, "p");
        assert_eq!(buf.contents(), "^^p");
    }

    #[test]
    fn test_submit_help() {
        let (mut app, buf) = connected_app();
        type_line(&mut app, "h");
        assert!(app.output.as_str().ends_with(HELP));
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn test_submit_quit() {
        let (mut app, buf) = connected_app();
        type_line(&mut app, "q");
        assert!(app.should_quit);
        assert!(app.output.as_str().ends_with("bye.\n"));
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn test_submit_while_disconnected() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        type_line(&mut app, "print(1)");
        assert!(app.output.as_str().ends_with("not connected\n"));
        assert!(!app.should_quit);
    }

    #[test]
    fn test_run_missing_script_reports() {
        let (mut app, buf) = connected_app();
        type_line(&mut app, "r /nonexistent/lfo.lua");
        assert!(app.output.as_str().contains("Failed to read script"));
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn test_upload_sends_markers() {
        let path = std::env::temp_dir().join(format!("druid-upload-{}.lua", std::process::id()));
        std::fs::write(&path, "x = 1\n").unwrap();

        let (mut app, buf) = connected_app();
        type_line(&mut app, &format!("u {}", path.display()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !buf.contents().ends_with("^^w") && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        std::fs::remove_file(&path).unwrap();

        assert_eq!(buf.contents(), "^^sx = 1\n^^w");
    }

    #[test]
    fn test_scrollback_limit() {
        let mut lines = Scrollback::new(3);
        lines.push("a\nb\n");
        assert_eq!(lines.line_count(), 3);

        lines.push("c\nd\n");
        assert_eq!(lines.as_str(), "c\nd\n");
        assert_eq!(lines.line_count(), 3);
    }

    #[test]
    fn test_output_scroll_clamps() {
        let mut app = App::new(OutputWriter::new(), PathBuf::from("sketch.lua"));
        app.scroll_output_up(100);
        assert_eq!(app.output_scroll, app.output.line_count() - 1);

        app.scroll_output_down(100);
        assert_eq!(app.output_scroll, 0);
    }
}
