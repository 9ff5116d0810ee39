//! Capture panes for input 1, input 2 and ii events.

use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::{tail_offset, CAPTURE_COLOR};
use crate::app::{App, Capture};

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let columns = Layout::horizontal([Constraint::Ratio(1, 3); 3]).split(area);

    for (pane, column) in Capture::ALL.into_iter().zip(columns.iter()) {
        let text = app.capture(pane);
        let scroll = tail_offset(text.line_count(), column.height, 0);
        let paragraph = Paragraph::new(text.as_str())
            .style(Style::default().fg(CAPTURE_COLOR))
            .scroll((scroll, 0));
        frame.render_widget(paragraph, *column);
    }
}
