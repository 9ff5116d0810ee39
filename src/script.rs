//! REPL commands and script transfer.
//!
//! Input typed at the `> ` prompt is either one of the single-letter druid
//! commands or Lua that is forwarded to crow verbatim. Scripts are sent
//! between crow's script markers:
//!
//! ```text
//! ^^s  <script text>  ^^e   run without saving
//! ^^s  <script text>  ^^w   write to flash and run
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::crow::{CrowError, OutputWriter};

/// Banner shown when the client starts.
pub const INTRO: &str = "//// druid. q to quit. h for help\n\n";

/// Text shown for the `h` command.
pub const HELP: &str = "
 h            this menu
 r            runs 'sketch.lua'
 u            uploads 'sketch.lua'
 r <filename> run <filename>
 u <filename> upload <filename>
 p            print current userscript
 q            quit

";

/// Default script for `r` and `u` without a filename.
pub const DEFAULT_SCRIPT: &str = "sketch.lua";

/// Pause between script markers so crow can switch modes.
pub const MARKER_PAUSE: Duration = Duration::from_millis(200);

/// A line entered at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    /// Ask crow to print its current userscript.
    PrintScript,
    /// Run a script file; `None` means the default script.
    Run(Option<PathBuf>),
    /// Upload a script file; `None` means the default script.
    Upload(Option<PathBuf>),
    /// Lua sent as-is.
    Send(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        match input {
            "q" => return Command::Quit,
            "h" => return Command::Help,
            "p" => return Command::PrintScript,
            "r" => return Command::Run(None),
            "u" => return Command::Upload(None),
            _ => {}
        }

        match input.split_once(char::is_whitespace) {
            Some(("r", file)) if !file.trim().is_empty() => {
                Command::Run(Some(PathBuf::from(file.trim())))
            }
            Some(("u", file)) if !file.trim().is_empty() => {
                Command::Upload(Some(PathBuf::from(file.trim())))
            }
            _ => Command::Send(input.to_string()),
        }
    }
}

/// What crow does with a transferred script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    Run,
    Upload,
}

impl ScriptAction {
    fn end_marker(self) -> &'static str {
        match self {
            ScriptAction::Run => "^^e",
            ScriptAction::Upload => "^^w",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            ScriptAction::Run => "running",
            ScriptAction::Upload => "uploading",
        }
    }
}

/// Send a plain REPL line, terminated the way crow expects.
pub fn send_line(writer: &OutputWriter, line: &str) -> Result<(), CrowError> {
    writer.write_str(&format!("{}\r\n", line))
}

/// Ask crow to print its current userscript.
pub fn print_script(writer: &OutputWriter) -> Result<(), CrowError> {
    writer.write_str("^^p")
}

pub fn load_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))
}

/// Transfer `script` and finish with the marker for `action`.
///
/// Blocks for `pause` after each marker; call it off the UI thread.
pub fn send_script(
    writer: &OutputWriter,
    script: &str,
    action: ScriptAction,
    pause: Duration,
) -> Result<(), CrowError> {
    writer.write_str("^^s")?;
    std::thread::sleep(pause);
    writer.write_str(script)?;
    std::thread::sleep(pause);
    writer.write_str(action.end_marker())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn attached() -> (OutputWriter, SharedBuf) {
        let buf = SharedBuf::default();
        let writer = OutputWriter::new();
        writer.attach(Box::new(buf.clone()));
        (writer, buf)
    }

    fn written(buf: &SharedBuf) -> String {
        String::from_utf8(buf.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_parse_single_letter_commands() {
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("h"), Command::Help);
        assert_eq!(Command::parse("p"), Command::PrintScript);
        assert_eq!(Command::parse("r"), Command::Run(None));
        assert_eq!(Command::parse("u"), Command::Upload(None));
    }

    #[test]
    fn test_parse_file_commands() {
        assert_eq!(
            Command::parse("r lfos.lua"),
            Command::Run(Some(PathBuf::from("lfos.lua")))
        );
        assert_eq!(
            Command::parse("u  scripts/seq.lua "),
            Command::Upload(Some(PathBuf::from("scripts/seq.lua")))
        );
    }

    #[test]
    fn test_parse_lua_passthrough() {
        assert_eq!(
            Command::parse("output[1].volts = 3"),
            Command::Send("output[1].volts = 3".to_string())
        );
        assert_eq!(Command::parse("quit"), Command::Send("quit".to_string()));
        assert_eq!(Command::parse("r "), Command::Send("r ".to_string()));
        assert_eq!(Command::parse(""), Command::Send(String::new()));
    }

    #[test]
    fn test_send_line_appends_crlf() {
        let (writer, buf) = attached();
        send_line(&writer, "print(1)").unwrap();
        assert_eq!(written(&buf), "print(1)\r\n");
    }

    #[test]
    fn test_print_script() {
        let (writer, buf) = attached();
        print_script(&writer).unwrap();
        assert_eq!(written(&buf), "^^p");
    }

    #[test]
    fn test_send_script_markers() {
        let (writer, buf) = attached();
        send_script(&writer, "x = 1\n", ScriptAction::Run, Duration::ZERO).unwrap();
        assert_eq!(written(&buf), "^^sx = 1\n^^e");

        let (writer, buf) = attached();
        send_script(&writer, "x = 1\n", ScriptAction::Upload, Duration::ZERO).unwrap();
        assert_eq!(written(&buf), "^^sx = 1\n^^w");
    }

    #[test]
    fn test_send_script_detached() {
        let writer = OutputWriter::new();
        let result = send_script(&writer, "x", ScriptAction::Run, Duration::ZERO);
        assert!(matches!(result, Err(CrowError::NotConnected)));
    }

    #[test]
    fn test_load_missing_script() {
        let err = load_script(Path::new("/nonexistent/sketch.lua")).unwrap_err();
        assert!(err.to_string().contains("Failed to read script"));
    }
}
