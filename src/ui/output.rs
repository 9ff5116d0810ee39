//! REPL output pane.

use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::{tail_offset, OUTPUT_COLOR};
use crate::app::App;

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    // No wrapping: one buffer line per row keeps the tail math exact.
    let scroll = tail_offset(app.output.line_count(), area.height, app.output_scroll);

    let paragraph = Paragraph::new(app.output.as_str())
        .style(Style::default().fg(OUTPUT_COLOR))
        .scroll((scroll, 0));

    frame.render_widget(paragraph, area);
}
