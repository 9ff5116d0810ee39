//! Status line: connection state on the left, `druid////` on the right,
//! slashes in between.

use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::CAPTURE_COLOR;
use crate::app::App;

const TITLE: &str = "druid////";

/// Build a status line exactly `width` characters wide, truncating the
/// status text first when space runs out.
pub fn status_line(width: usize, status: &str) -> String {
    let lead = format!("// {} ", status);
    let title_len = TITLE.chars().count();

    if width <= title_len {
        return TITLE.chars().skip(title_len - width).collect();
    }

    let lead: String = lead.chars().take(width - title_len).collect();
    let fill = width - title_len - lead.chars().count();
    format!("{}{}{}", lead, "/".repeat(fill), TITLE)
}

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let status = match &app.connected_port {
        Some(port) => format!("connected {}", port),
        None => "searching for crow".to_string(),
    };

    let paragraph = Paragraph::new(status_line(area.width as usize, &status))
        .style(Style::default().fg(CAPTURE_COLOR));
    frame.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_line_fills_width() {
        let line = status_line(32, "connected x");
        assert_eq!(line, "// connected x ////////druid////");
        assert_eq!(line.chars().count(), 32);
    }

    #[test]
    fn test_status_line_narrow() {
        assert_eq!(status_line(9, "anything"), TITLE);
        assert_eq!(status_line(4, "anything"), "////");
        assert_eq!(status_line(12, "searching"), "// druid////");
    }
}
