//! UI rendering module.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ input 1  │ input 2  │ ii       │  captures (2 rows)
//! ├──────────┴──────────┴──────────┤
//! │ output                         │
//! │                                │
//! ├────────────────────────────────┤
//! │ ////// connected ////druid//// │  status
//! │ > _                            │  input
//! └────────────────────────────────┘
//! ```

mod captures;
mod output;
mod status;

use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use crate::app::{App, PROMPT};

const CAPTURE_HEIGHT: u16 = 2;

pub(crate) const CAPTURE_COLOR: Color = Color::Rgb(0x74, 0x73, 0x69);
pub(crate) const OUTPUT_COLOR: Color = Color::Rgb(0xd3, 0xd0, 0xc8);

/// Main render function - called every frame.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(CAPTURE_HEIGHT), // Captures
            Constraint::Min(0),                 // Output
            Constraint::Length(1),              // Status
            Constraint::Length(1),              // Input
        ])
        .split(frame.area());

    captures::render(frame, app, chunks[0]);
    output::render(frame, app, chunks[1]);
    status::render(frame, app, chunks[2]);
    render_input(frame, app, chunks[3]);
}

fn render_input(frame: &mut Frame, app: &App, area: Rect) {
    let [prompt_area, input_area] = Layout::horizontal([
        Constraint::Length(PROMPT.len() as u16),
        Constraint::Min(0),
    ])
    .areas(area);

    frame.render_widget(Paragraph::new(PROMPT), prompt_area);
    frame.render_widget(&app.input, input_area);
}

/// Vertical scroll that keeps the last `height` lines in view, moved up by
/// `back` lines.
pub(crate) fn tail_offset(total_lines: usize, height: u16, back: usize) -> u16 {
    let bottom = total_lines.saturating_sub(height as usize);
    bottom.saturating_sub(back).min(u16::MAX as usize) as u16
}
