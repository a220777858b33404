use std::collections::VecDeque;
use std::io;
use std::any::Any;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::PipelineError;

const EVENTS_MAX: usize = 8;
const LOGS_MAX: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Progress,
    Logs,
    Help,
}

#[derive(Debug)]
struct DashboardState {
    phase: String,
    status: String,
    position: Option<(usize, usize)>,
    written: u64,
    skipped: u64,
    failed: u64,
    last_item_ms: Option<u128>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    view: View,
    started: Instant,
    active: bool,
}

/// Full-screen progress view for one pipeline command. The command runs on a
/// worker thread while this thread draws.
pub struct Tui {
    kind: ProgressSinkKind,
    data_dir: Utf8PathBuf,
    state: Arc<Mutex<DashboardState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<DashboardState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let message = event.message.trim().to_string();
        match parse_phase(&message) {
            Some((phase, payload)) => {
                match phase {
                    "Write" if payload.ends_with("error") => state.failed += 1,
                    "Write" => state.written += 1,
                    "Skip" => state.skipped += 1,
                    _ => {}
                }
                if let Some(position) = parse_position(payload) {
                    state.position = Some(position);
                }
                state.phase = phase.to_string();
                state.status = payload.to_string();
            }
            None => state.status = message.clone(),
        }
        if let Some(elapsed) = event.elapsed {
            state.last_item_ms = Some(elapsed.as_millis());
        }

        let line = match event.elapsed {
            Some(elapsed) => format!("{message} ({} ms)", elapsed.as_millis()),
            None => message,
        };
        push_bounded(&mut state.events, line.clone(), EVENTS_MAX);
        push_bounded(&mut state.logs, format!("[{}] {line}", timestamp()), LOGS_MAX);
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind, data_dir: &Utf8Path) -> Self {
        Self {
            kind,
            data_dir: data_dir.to_path_buf(),
            state: Arc::new(Mutex::new(DashboardState {
                phase: "Start".to_string(),
                status: "starting".to_string(),
                position: None,
                written: 0,
                skipped: 0,
                failed: 0,
                last_item_ms: None,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                view: View::Progress,
                started: Instant::now(),
                active: false,
            })),
            log_scroll: 0,
        }
    }

    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, PipelineError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick))
                    .into_diagnostic()?;
            }

            if let Some(result) = poll_worker(&rx) {
                self.set_active(false);
                leave_screen()?;
                let result = match (result, handle.join()) {
                    (Err(PipelineError::WorkerStopped(_)), Err(payload)) => {
                        Err(PipelineError::WorkerStopped(panic_message(payload.as_ref())))
                    }
                    (result, _) => result,
                };
                return result.map_err(miette::Report::new);
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && self.handle_key(key)
            {
                break;
            }

            tick = tick.wrapping_add(1);
        }

        // The worker keeps running until the process exits; checkpoints make
        // the interrupted stage resumable.
        self.set_active(false);
        leave_screen()?;
        Err(miette::Report::msg("aborted"))
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Esc => return true,
            KeyCode::Char('q') => return !self.is_active(),
            KeyCode::Char('?') | KeyCode::F(1) => self.toggle_view(View::Help),
            KeyCode::Char('l') | KeyCode::F(4) => self.toggle_view(View::Logs),
            KeyCode::PageUp => self.scroll_logs(5),
            KeyCode::PageDown => self.scroll_logs(-5),
            _ => {}
        }
        false
    }

    fn toggle_view(&mut self, view: View) {
        if let Ok(mut state) = self.state.lock() {
            state.view = if state.view == view {
                View::Progress
            } else {
                view
            };
        }
    }

    fn scroll_logs(&mut self, delta: i32) {
        let next = (self.log_scroll as i32 + delta).max(0);
        self.log_scroll = next.min(u16::MAX as i32) as u16;
    }

    fn is_active(&self) -> bool {
        self.state.lock().map(|state| state.active).unwrap_or(false)
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
            }
        }
    }
}

fn leave_screen() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, tui: &Tui, state: &DashboardState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(tui, state, tick), chunks[0]);
    match state.view {
        View::Progress => {
            let main = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
                .split(chunks[1]);
            frame.render_widget(draw_status_panel(state), main[0]);
            frame.render_widget(draw_events_panel(state), main[1]);
        }
        View::Logs => frame.render_widget(draw_logs_view(state, tui.log_scroll), chunks[1]),
        View::Help => frame.render_widget(draw_help(), chunks[1]),
    }
    frame.render_widget(draw_footer(state), chunks[2]);
}

fn draw_header(tui: &Tui, state: &DashboardState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let title = Line::from(vec![
        Span::styled(
            "VIGROW",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Command: "),
        Span::styled(tui.kind.label(), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let data_line = Line::from(Span::styled(
        format!("Data dir: {}", tui.data_dir),
        Style::default().fg(Color::Gray),
    ));
    Paragraph::new(vec![title, data_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &DashboardState) -> Paragraph<'static> {
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let (bar, percent, counter) = match state.position {
        Some((index, total)) if total > 0 => {
            let percent = ((index * 100) / total).min(100) as u8;
            (progress_bar(percent), format!(" {percent:>3}%"), format!("{index}/{total}"))
        }
        _ => (progress_bar(0), String::new(), "--".to_string()),
    };
    let last_item = state
        .last_item_ms
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "--".to_string());

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Gray));
    let lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            label("Phase: "),
            Span::styled(format!("{:<8} ", state.phase), Style::default().fg(phase_color)),
            Span::raw(bar),
            Span::raw(percent),
        ]),
        Line::from(vec![label("Item: "), Span::raw(counter)]),
        Line::from(vec![
            label("Written: "),
            Span::styled(state.written.to_string(), Style::default().fg(Color::Green)),
            label("   Skipped: "),
            Span::raw(state.skipped.to_string()),
            label("   Failed: "),
            Span::styled(
                state.failed.to_string(),
                Style::default().fg(if state.failed > 0 {
                    Color::Red
                } else {
                    Color::Gray
                }),
            ),
        ]),
        Line::from(vec![label("Last item: "), Span::raw(last_item)]),
        Line::from(vec![
            label("Elapsed: "),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
        ]),
        Line::from(vec![label("Now: "), Span::raw(state.status.clone())]),
    ];

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::RIGHT))
        .wrap(Wrap { trim: true })
}

fn draw_events_panel(state: &DashboardState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "RECENT",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for event in state.events.iter().rev() {
        let color = if event.contains(" error") {
            Color::Red
        } else {
            Color::White
        };
        lines.push(Line::from(Span::styled(
            format!("- {event}"),
            Style::default().fg(color),
        )));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &DashboardState, scroll: u16) -> Paragraph<'static> {
    let visible = 20usize;
    let start = state.logs.len().saturating_sub(scroll as usize + visible);
    let mut lines = Vec::with_capacity(visible + 1);
    lines.push(Line::from(Span::styled(
        "LOGS (PgUp/PgDn)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_help() -> Paragraph<'static> {
    let lines = vec![
        Line::from("l / F4   toggle the log view"),
        Line::from("? / F1   toggle this help"),
        Line::from("PgUp/PgDn  scroll logs"),
        Line::from("q        quit once the command has finished"),
        Line::from("Esc      abort; rerun the command to resume from its checkpoint"),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: true })
}

fn draw_footer(state: &DashboardState) -> Paragraph<'static> {
    let text = if state.active {
        "running   l logs   ? help   Esc abort"
    } else {
        "finished   q quit"
    };
    Paragraph::new(Line::from(Span::styled(
        text,
        Style::default().fg(Color::Gray),
    )))
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (phase, payload) = rest.split_once(';')?;
    Some((phase.trim(), payload.trim()))
}

/// Reads the `[index/total]` marker the per-item stages put first.
fn parse_position(payload: &str) -> Option<(usize, usize)> {
    let inner = payload.strip_prefix('[')?.split(']').next()?;
    let (index, total) = inner.split_once('/')?;
    Some((index.trim().parse().ok()?, total.trim().parse().ok()?))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}

/// `None` while the worker is still running. A worker that hung up without
/// sending (it panicked) yields `WorkerStopped`.
fn poll_worker<R>(rx: &Receiver<Result<R, PipelineError>>) -> Option<Result<R, PipelineError>> {
    match rx.try_recv() {
        Ok(result) => Some(result),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => Some(Err(PipelineError::WorkerStopped(
            "worker thread exited".to_string(),
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}
