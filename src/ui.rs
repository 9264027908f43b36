//! Terminal user interface with ratatui.
//!
//! One monitor screen: big heart-rate and SpO2 readouts that flash with each
//! beep, the active alarm mode, audio settings and a log of recent events.

use crate::app::App;
use crate::models::{AlarmMode, EngineEvent};
use num_format::{Locale, ToFormattedString};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

/// Colors for the UI.
pub struct UiColors {
    pub heart: Color,
    pub spo2: Color,
    pub flash_bg: Color,
    pub header_bg: Color,
    pub border: Color,
    pub muted: Color,
}

impl Default for UiColors {
    fn default() -> Self {
        Self {
            heart: Color::Green,
            spo2: Color::Cyan,
            flash_bg: Color::Rgb(40, 60, 40),
            header_bg: Color::DarkGray,
            border: Color::DarkGray,
            muted: Color::Gray,
        }
    }
}

fn mode_color(mode: AlarmMode) -> Color {
    match mode {
        AlarmMode::Normal => Color::Green,
        AlarmMode::Warning => Color::Yellow,
        AlarmMode::Critical | AlarmMode::Flatline => Color::Red,
        AlarmMode::Artifact => Color::Magenta,
        AlarmMode::Muted => Color::Gray,
    }
}

/// Render the main UI.
pub fn render(frame: &mut Frame, app: &App) {
    let colors = UiColors::default();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // Header
            Constraint::Length(7), // Readouts
            Constraint::Min(5),    // Event log
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0], &colors);
    render_readouts(frame, app, chunks[1], &colors);
    render_events(frame, app, chunks[2], &colors);
    render_footer(frame, app, chunks[3], &colors);

    if app.show_help {
        render_help_overlay(frame, &colors);
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect, colors: &UiColors) {
    let mode_style = Style::default()
        .fg(Color::Black)
        .bg(mode_color(app.mode))
        .add_modifier(Modifier::BOLD);

    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "VITALTONE ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!(" {} ", app.mode.to_string().to_uppercase()), mode_style),
        Span::raw(format!("  rhythm: {}  up: {}", app.rhythm, app.uptime())),
    ]))
    .block(
        Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(colors.border)),
    );

    frame.render_widget(header, area);
}

fn render_readouts(frame: &mut Frame, app: &App, area: Rect, colors: &UiColors) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(area);

    let flashing = app.is_flashing();
    let readout = |label: &str, value: String, unit: &str, color: Color| {
        let mut style = Style::default().fg(color).add_modifier(Modifier::BOLD);
        if flashing {
            style = style.bg(colors.flash_bg).add_modifier(Modifier::REVERSED);
        }
        Paragraph::new(vec![
            Line::from(Span::styled(label.to_string(), Style::default().fg(colors.muted))),
            Line::from(""),
            Line::from(vec![Span::styled(value, style), Span::raw(format!(" {unit}"))]),
        ])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(colors.border)),
        )
    };

    let heart_rate = if app.vitals.is_asystole() {
        "---".to_string()
    } else {
        format!("{:>3.0}", app.vitals.heart_rate)
    };
    frame.render_widget(readout("HR", heart_rate, "bpm", colors.heart), columns[0]);
    frame.render_widget(
        readout("SpO2", format!("{:>3.0}", app.vitals.spo2), "%", colors.spo2),
        columns[1],
    );

    let on_off = |on: bool| if on { "on" } else { "off" };
    let settings = &app.settings;
    let status = Paragraph::new(vec![
        Line::from(format!("muted:   {}", on_off(app.muted))),
        Line::from(format!(
            "alarms:  {}",
            if !settings.enable_alarms {
                "disabled"
            } else if settings.alarm_silenced {
                "silenced"
            } else {
                "armed"
            }
        )),
        Line::from(format!(
            "beeps:   {}   tone: {}",
            on_off(settings.enable_beeps),
            on_off(settings.enable_pulse_tone)
        )),
        Line::from(format!(
            "volume:  {:.0}%   backend: {:?}",
            settings.master_volume * 100.0,
            app.backend
        )),
        Line::from(format!("beeps played: {}", app.beeps.to_formatted_string(&Locale::en))),
    ])
    .block(
        Block::default()
            .title(" Audio ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(colors.border)),
    );
    frame.render_widget(status, columns[2]);
}

fn event_style(event: &EngineEvent) -> Style {
    match event {
        EngineEvent::ModeChanged { to, .. } => Style::default().fg(mode_color(*to)),
        EngineEvent::WarningBeep { .. } => Style::default().fg(Color::Yellow),
        EngineEvent::Escalated | EngineEvent::ChannelFault { .. } => Style::default().fg(Color::Red),
        EngineEvent::PauseDetected { .. } | EngineEvent::BeatDropped => {
            Style::default().fg(Color::Magenta)
        }
        _ => Style::default(),
    }
}

fn render_events(frame: &mut Frame, app: &App, area: Rect, colors: &UiColors) {
    let items: Vec<ListItem> = app
        .recent
        .iter()
        .map(|(at, event)| {
            let offset = at.saturating_duration_since(app.started).as_secs_f64();
            ListItem::new(Line::from(vec![
                Span::styled(format!("{offset:>8.1}s "), Style::default().fg(colors.muted)),
                Span::styled(event.to_string(), event_style(event)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Events ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(colors.border)),
    );
    frame.render_widget(list, area);
}

fn render_footer(frame: &mut Frame, _app: &App, area: Rect, colors: &UiColors) {
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
    let footer = Line::from(vec![
        key(" q"),
        Span::raw(":quit "),
        key("?"),
        Span::raw(":help "),
        key("↑↓"),
        Span::raw(":HR "),
        key("←→"),
        Span::raw(":SpO2 "),
        key("r"),
        Span::raw(":rhythm "),
        key("m"),
        Span::raw(":mute "),
        key("s"),
        Span::raw(":silence "),
        key("0"),
        Span::raw(":asystole"),
    ]);

    let footer_widget = Paragraph::new(footer).style(Style::default().bg(colors.header_bg));
    frame.render_widget(footer_widget, area);
}

fn render_help_overlay(frame: &mut Frame, colors: &UiColors) {
    let area = centered_rect(60, 70, frame.area());

    let help_text = vec![
        Line::from(Span::styled(
            "VITALTONE HELP",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Vitals:"),
        Line::from("  ↑/↓ k/j   Heart rate +/- 5 bpm"),
        Line::from("  ←/→ h/l   SpO2 -/+ 1%"),
        Line::from("  0         Toggle asystole"),
        Line::from("  r         Next rhythm preset"),
        Line::from("  p         Drop the next beats"),
        Line::from(""),
        Line::from("Audio:"),
        Line::from("  m         Mute all"),
        Line::from("  s         Silence alarms"),
        Line::from("  t         Toggle pulse tone"),
        Line::from("  b         Toggle beeps"),
        Line::from("  Space     Manual beep"),
        Line::from("  o         Manual pulse tone"),
        Line::from(""),
        Line::from("  q/Esc     Quit"),
        Line::from("  ?         Toggle help"),
        Line::from(""),
        Line::from("Press any key to close"),
    ];

    let help = Paragraph::new(help_text)
        .block(
            Block::default()
                .title(" Help ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(colors.border)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, area);
    frame.render_widget(help, area);
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
