use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Tabs},
    Frame,
};

use petri_viewer::gateway::TestStatus;
use petri_viewer::logs::LogEntry;

use super::{App, LogView, Panel};

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.show_logs {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),  // header
                Constraint::Min(10),    // main content (reduced)
                Constraint::Length(12), // logs panel
                Constraint::Length(3),  // status bar
            ])
            .split(f.area())
    } else {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // header
                Constraint::Min(0),    // main content
                Constraint::Length(3), // status bar
            ])
            .split(f.area())
    };

    draw_header(f, app, chunks[0]);
    if let Some(view) = &app.log_view {
        draw_test_log(f, view, chunks[1]);
    } else {
        draw_main(f, app, chunks[1]);
    }

    if app.show_logs {
        draw_logs_panel(f, app, chunks[2]);
        draw_status_bar(f, app, chunks[3]);
    } else {
        draw_status_bar(f, app, chunks[2]);
    }
}

fn draw_header(f: &mut Frame, app: &App, area: Rect) {
    let titles = vec!["Runs", "Tests", "Stats"];
    let selected = match app.active_panel {
        Panel::Runs => 0,
        Panel::Tests => 1,
        Panel::Stats => 2,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" petri-viewer dashboard "),
        )
        .select(selected)
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_main(f: &mut Frame, app: &App, area: Rect) {
    if app.active_panel == Panel::Stats {
        draw_stats_panel(f, app, area);
    } else {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        draw_runs_panel(f, app, chunks[0]);
        draw_tests_panel(f, app, chunks[1]);
    }
}

fn border_style(active: bool) -> Style {
    if active {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    let cells = titles.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    Row::new(cells).height(1)
}

fn row_style(selected: bool) -> Style {
    if selected {
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn draw_runs_panel(f: &mut Frame, app: &App, area: Rect) {
    let is_active = app.active_panel == Panel::Runs;

    let visible = area.height.saturating_sub(3) as usize;
    let offset = scroll_offset(app.selected_run, visible);

    let rows: Vec<Row> = app
        .runs
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, run)| {
            let cached = if app.store.has_run_details(&run.id) {
                Span::styled("*", Style::default().fg(Color::Cyan))
            } else {
                Span::raw(" ")
            };
            let failed_style = if run.has_failures() {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let pr = run.pr_number.map_or_else(String::new, |n| match &run.pr_title {
                Some(title) => format!("#{n} {title}"),
                None => format!("#{n}"),
            });

            Row::new(vec![
                Cell::from(cached),
                Cell::from(run.id.clone()),
                Cell::from(run.creation_time.format("%m-%d %H:%M").to_string()),
                Cell::from(truncate(&run.branch, 20)),
                Cell::from(Span::styled(
                    run.passed.to_string(),
                    Style::default().fg(Color::Green),
                )),
                Cell::from(Span::styled(run.failed.to_string(), failed_style)),
                Cell::from(pr),
            ])
            .style(row_style(is_active && i == app.selected_run))
        })
        .collect();

    let failing = app.runs.iter().filter(|r| r.has_failures()).count();

    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Length(10),
            Constraint::Length(11),
            Constraint::Length(20),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Min(10),
        ],
    )
    .header(header_row(&["", "Run", "Created", "Branch", "Pass", "Fail", "PR"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style(is_active))
            .title(format!(
                " Runs ({failing}/{} failing, {} cached) ",
                app.runs.len(),
                app.store.cached_run_count()
            )),
    );

    f.render_widget(table, area);
}

fn draw_tests_panel(f: &mut Frame, app: &App, area: Rect) {
    let is_active = app.active_panel == Panel::Tests;

    let title = match &app.shown_run {
        Some(run_id) => {
            let failed = app
                .tests
                .iter()
                .filter(|t| t.status == TestStatus::Failed)
                .count();
            format!(" Tests of run {run_id} ({failed}/{} failed) ", app.tests.len())
        }
        None => " Tests (Enter on a run) ".to_string(),
    };

    let visible = area.height.saturating_sub(3) as usize;
    let offset = scroll_offset(app.selected_test, visible);

    let rows: Vec<Row> = app
        .tests
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, test)| {
            Row::new(vec![
                Cell::from(status_colored(test.status)),
                Cell::from(test.name.clone()),
            ])
            .style(row_style(is_active && i == app.selected_test))
        })
        .collect();

    let table = Table::new(rows, [Constraint::Length(8), Constraint::Min(20)])
        .header(header_row(&["Status", "Test"]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style(is_active))
                .title(title),
        );

    f.render_widget(table, area);
}

fn draw_stats_panel(f: &mut Frame, app: &App, area: Rect) {
    if app.stats.is_empty() {
        let empty_msg = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(
                "No cached runs yet.",
                Style::default().fg(Color::Yellow),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Stats cover every run in the cache. Open runs or press 'a' to load all.",
                Style::default().fg(Color::DarkGray),
            )),
        ])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style(true))
                .title(" Stats "),
        );
        f.render_widget(empty_msg, area);
        return;
    }

    let visible = area.height.saturating_sub(3) as usize;
    let offset = scroll_offset(app.selected_stat, visible);

    let rows: Vec<Row> = app
        .stats
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, (name, stats))| {
            let rate = stats.pass_rate();
            Row::new(vec![
                Cell::from(Span::styled(format!("{rate:>5.1}%"), rate_color(rate))),
                Cell::from(Span::styled(rate_bar(rate, 10), rate_color(rate))),
                Cell::from(stats.passed.to_string()),
                Cell::from(Span::styled(
                    stats.failed.to_string(),
                    if stats.failed > 0 {
                        Style::default().fg(Color::Red)
                    } else {
                        Style::default().fg(Color::DarkGray)
                    },
                )),
                Cell::from(stats.unknown.to_string()),
                Cell::from(name.clone()),
            ])
            .style(row_style(i == app.selected_stat))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(7),
            Constraint::Length(10),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Min(20),
        ],
    )
    .header(header_row(&["Rate", "", "Pass", "Fail", "Unk", "Test"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style(true))
            .title(format!(
                " Stats ({} tests over {} cached runs) ",
                app.stats.len(),
                app.store.cached_run_count()
            )),
    );

    f.render_widget(table, area);
}

fn draw_test_log(f: &mut Frame, view: &LogView, area: Rect) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = if view.entries.is_empty() {
        vec![Line::from(Span::styled(
            "Log is empty.",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        view.entries
            .iter()
            .skip(view.scroll)
            .take(visible)
            .map(|entry| Line::from(Span::styled(entry.display_line(), entry_style(entry))))
            .collect()
    };

    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(
                " {} @ run {} ({}/{}) [Esc close] ",
                view.test,
                view.run_id,
                if view.entries.is_empty() { 0 } else { view.scroll + 1 },
                view.entries.len()
            )),
    );
    f.render_widget(widget, area);
}

fn draw_logs_panel(f: &mut Frame, app: &App, area: Rect) {
    let log_count = app.log_messages.len();
    let visible_lines = (area.height.saturating_sub(2)) as usize; // account for borders

    // Get the visible slice of logs
    let start = app.log_scroll.min(log_count.saturating_sub(1));
    let end = (start + visible_lines).min(log_count);

    let log_lines: Vec<Line> = if log_count == 0 {
        vec![Line::from(Span::styled(
            "No log output yet.",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        app.log_messages
            .iter()
            .skip(start)
            .take(end - start)
            .map(|msg| {
                let style = if msg.contains(" ERROR ") {
                    Style::default().fg(Color::Red)
                } else if msg.contains(" WARN ") {
                    Style::default().fg(Color::Yellow)
                } else if msg.contains(" DEBUG ") || msg.contains(" TRACE ") {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default().fg(Color::White)
                };
                Line::from(Span::styled(msg.clone(), style))
            })
            .collect()
    };

    let logs_widget = Paragraph::new(log_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta))
            .title(format!(
                " Logs ({}/{}) [PgUp/PgDn scroll, c clear] ",
                if log_count > 0 { start + 1 } else { 0 },
                log_count
            )),
    );

    f.render_widget(logs_widget, area);
}

fn draw_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let key = |k: &'static str| {
        Span::styled(
            k,
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
    };
    let help = Line::from(vec![
        key(" q"),
        Span::raw(" quit  "),
        key("Tab"),
        Span::raw(" switch  "),
        key("Enter"),
        Span::raw(" open  "),
        key("r"),
        Span::raw(" refresh  "),
        key("a"),
        Span::raw(" load all  "),
        key("v"),
        Span::raw(" logs  "),
        key("C"),
        Span::raw(" clear cache  "),
        key("X"),
        Span::raw(" cancel"),
    ]);

    let help_widget =
        Paragraph::new(help).block(Block::default().borders(Borders::ALL).title(" Keys "));

    let status_text = if let Some(p) = app.progress {
        Line::from(Span::styled(
            format!("Loading runs {}/{}", p.completed, p.total),
            Style::default().fg(Color::Yellow),
        ))
    } else if let Some((ref msg, _)) = app.status_message {
        Line::from(Span::styled(
            msg.clone(),
            Style::default().fg(Color::Yellow),
        ))
    } else if app.is_loading() {
        Line::from(Span::styled(
            "Loading...",
            Style::default().fg(Color::Yellow),
        ))
    } else {
        let queue = app.store.scheduler_snapshot();
        let secs = app.last_refresh.elapsed().as_secs();
        Line::from(Span::styled(
            format!(
                "Refreshed {}s ago (auto: {}s)  queue: {}h {}l {}p",
                secs,
                app.config.refresh_interval().as_secs(),
                queue.high,
                queue.low,
                queue.paused
            ),
            Style::default().fg(Color::DarkGray),
        ))
    };

    let status_widget =
        Paragraph::new(status_text).block(Block::default().borders(Borders::ALL).title(" Status "));

    f.render_widget(help_widget, chunks[0]);
    f.render_widget(status_widget, chunks[1]);
}

fn status_colored(status: TestStatus) -> Span<'static> {
    match status {
        TestStatus::Passed => Span::styled("passed", Style::default().fg(Color::Green)),
        TestStatus::Failed => Span::styled("failed", Style::default().fg(Color::Red)),
        TestStatus::Unknown => Span::styled("unknown", Style::default().fg(Color::DarkGray)),
    }
}

fn entry_style(entry: &LogEntry) -> Style {
    if entry.is_error() {
        Style::default().fg(Color::Red)
    } else if entry.is_warning() {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    }
}

/// First row to render so the selection stays visible
fn scroll_offset(selected: usize, visible: usize) -> usize {
    if visible == 0 {
        0
    } else {
        (selected + 1).saturating_sub(visible)
    }
}

/// Get color for a rate value
fn rate_color(rate: f64) -> Style {
    if rate >= 90.0 {
        Style::default().fg(Color::Green)
    } else if rate >= 70.0 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Red)
    }
}

/// Horizontal bar filled in proportion to a 0-100 rate
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn rate_bar(rate: f64, width: usize) -> String {
    let filled = ((rate.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    std::iter::repeat_n(symbols::block::FULL, filled)
        .chain(std::iter::repeat_n(symbols::block::ONE_EIGHTH, width - filled.min(width)))
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}
