use std::collections::VecDeque;
use std::io;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
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

use crate::cancel::CancellationToken;
use crate::error::EsgfError;
use crate::progress::{FileEntry, FileState, Manifest, ProgressEvent, ProgressSink};

const EVENTS_MAX: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Fetch,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Fetch => "Fetch",
            Phase::Done => "Done",
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    events: VecDeque<String>,
    manifest: Option<Arc<Manifest>>,
    started: Instant,
    stopping: bool,
    datasets: usize,
}

pub struct Tui {
    state: Arc<Mutex<AppState>>,
    token: CancellationToken,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            } else if !message.starts_with("file=") {
                state.status = message.clone();
            }
            push_event(&mut state.events, &message);
        }
    }

    fn manifest(&self, manifest: Arc<Manifest>) {
        if let Ok(mut state) = self.state.lock() {
            state.datasets += 1;
            state.manifest = Some(manifest);
        }
    }
}

impl Tui {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: Phase::Resolve,
                events: VecDeque::new(),
                manifest: None,
                started: Instant::now(),
                stopping: false,
                datasets: 0,
            })),
            token,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q`, `Esc` or
    /// `Ctrl-C` fire the cancellation token; the screen stays up until the
    /// worker has cleaned up and returned.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, EsgfError> + Send + 'static,
        R: Send + 'static,
    {
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
        let outcome = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, &state, tick))
                    .into_diagnostic()?;
            }

            match rx.try_recv() {
                Ok(result) => break result.map_err(miette::Report::new),
                Err(TryRecvError::Disconnected) => {
                    break Err(miette::Report::msg("download worker exited unexpectedly"));
                }
                Err(TryRecvError::Empty) => {}
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    self.handle_key(key);
                }
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        outcome
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        let stop = match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
            _ => false,
        };
        if stop && !self.token.is_cancelled() {
            self.token.cancel();
            if let Ok(mut state) = self.state.lock() {
                let status = "interrupt received, discarding partial files".to_string();
                state.stopping = true;
                state.status = status.clone();
                push_event(&mut state.events, &status);
            }
        }
    }
}

fn draw_ui(frame: &mut ratatui::Frame, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(EVENTS_MAX as u16 + 2),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(state, tick), chunks[0]);
    frame.render_widget(draw_manifest(state, chunks[1].height), chunks[1]);
    frame.render_widget(draw_events(state), chunks[2]);
}

fn draw_header(state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let phase_color = if state.stopping {
        Color::Red
    } else if state.phase == Phase::Done {
        Color::Green
    } else {
        Color::Cyan
    };
    let elapsed = state.started.elapsed().as_secs();
    let header_line = Line::from(vec![
        Span::styled(
            "ESGF-DL",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Phase: "),
        Span::styled(state.phase.label(), Style::default().fg(phase_color)),
        Span::raw(format!(
            "   Datasets: {}   Elapsed: {:02}:{:02}   ",
            state.datasets,
            elapsed / 60,
            elapsed % 60
        )),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let hint = if state.stopping {
        "stopping..."
    } else {
        "q / Esc / Ctrl-C: stop"
    };
    let status_line = Line::from(vec![
        Span::styled(state.status.clone(), Style::default().fg(Color::Gray)),
        Span::raw("   "),
        Span::styled(hint, Style::default().fg(Color::DarkGray)),
    ]);
    Paragraph::new(vec![header_line, status_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_manifest(state: &AppState, height: u16) -> Paragraph<'static> {
    let Some(manifest) = &state.manifest else {
        return Paragraph::new(Line::from(Span::styled(
            "waiting for the first dataset",
            Style::default().fg(Color::DarkGray),
        )));
    };

    let mut lines = vec![Line::from(Span::styled(
        manifest.dataset_id().to_string(),
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    let rows = manifest.visible(Instant::now());
    let capacity = (height as usize).saturating_sub(2);
    let hidden = rows.len().saturating_sub(capacity);
    for entry in rows.iter().take(capacity) {
        lines.push(file_line(entry));
    }
    if hidden > 0 {
        lines.push(Line::from(Span::styled(
            format!("... {hidden} more"),
            Style::default().fg(Color::DarkGray),
        )));
    }
    Paragraph::new(lines)
}

fn file_line(entry: &FileEntry) -> Line<'static> {
    let (icon, color) = match &entry.state {
        FileState::Pending => (" ", Color::DarkGray),
        FileState::Transferring => (">", Color::Cyan),
        FileState::Complete => ("+", Color::Green),
        FileState::Skipped => ("=", Color::Green),
        FileState::Failed(_) => ("x", Color::Red),
        FileState::Cancelled => ("-", Color::Yellow),
    };
    let percent = entry
        .percent()
        .unwrap_or(if entry.state == FileState::Complete { 100 } else { 0 });
    let size = match entry.total {
        Some(total) => format!(
            "{} / {}",
            bytes_to_human(entry.transferred),
            bytes_to_human(total)
        ),
        None => bytes_to_human(entry.transferred),
    };
    let mut spans = vec![
        Span::styled(format!("{icon} "), Style::default().fg(color)),
        Span::styled(entry.filename.clone(), Style::default().fg(color)),
        Span::raw(" "),
        Span::raw(progress_bar(percent)),
        Span::raw(format!(" {percent:>3}% {size}")),
    ];
    if let FileState::Failed(detail) = &entry.state {
        spans.push(Span::styled(
            format!("  {detail}"),
            Style::default().fg(Color::Red),
        ));
    }
    Line::from(spans)
}

fn draw_events(state: &AppState) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "RECENT EVENTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for event in state.events.iter() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::TOP))
        .wrap(Wrap { trim: true })
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent.min(100) as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    if let Some(rest) = message.strip_prefix("phase=Resolve;") {
        return Some((Phase::Resolve, rest.trim()));
    }
    if let Some(rest) = message.strip_prefix("phase=Fetch;") {
        return Some((Phase::Fetch, rest.trim()));
    }
    if let Some(rest) = message.strip_prefix("phase=Done;") {
        return Some((Phase::Done, rest.trim()));
    }
    None
}

fn push_event(events: &mut VecDeque<String>, message: &str) {
    events.push_back(format!("[{}] {message}", timestamp()));
    while events.len() > EVENTS_MAX {
        events.pop_front();
    }
}

fn timestamp() -> String {
    let now = SystemTime::now();
    let secs = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let mins = (secs / 60) % 60;
    let hours = (secs / 3600) % 24;
    let seconds = secs % 60;
    format!("{hours:02}:{mins:02}:{seconds:02}")
}

fn bytes_to_human(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.1} GB", value / GB)
    } else if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use ratatui::backend::TestBackend;

    use super::*;

    #[test]
    fn phase_messages() {
        assert_eq!(
            parse_phase("phase=Fetch; 3 files, 3 workers"),
            Some((Phase::Fetch, "3 files, 3 workers"))
        );
        assert_eq!(parse_phase("file=x.nc status=complete"), None);
    }

    #[test]
    fn bar_and_sizes() {
        assert_eq!(progress_bar(50), format!("[{}{}]", "#".repeat(10), ".".repeat(10)));
        assert_eq!(bytes_to_human(512), "512 B");
        assert_eq!(bytes_to_human(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn sink_tracks_manifest_and_status() {
        let tui = Tui::new(CancellationToken::new());
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        sink.manifest(Arc::new(Manifest::new("ds|node", [("a.nc", None)])));
        sink.event(ProgressEvent::phase("Fetch", "1 files, 1 workers"));
        sink.event(ProgressEvent::message("file=a.nc status=complete"));

        let state = tui.state.lock().unwrap();
        assert_eq!(state.datasets, 1);
        assert_eq!(state.phase, Phase::Fetch);
        assert_eq!(state.status, "1 files, 1 workers");
        assert_eq!(state.events.len(), 2);
    }

    #[test]
    fn events_pane_shows_the_latest_timestamped_events() {
        let tui = Tui::new(CancellationToken::new());
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        for i in 0..EVENTS_MAX + 2 {
            sink.event(ProgressEvent::message(format!("event-{i}")));
        }

        let state = tui.state.lock().unwrap();
        assert_eq!(state.events.len(), EVENTS_MAX);
        assert!(state.events[0].ends_with("] event-2"));
        assert!(state.events.iter().all(|event| event.starts_with('[')));

        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        terminal.draw(|frame| draw_ui(frame, &state, 0)).unwrap();
        let screen: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(screen.contains(&format!("event-{}", EVENTS_MAX + 1)));
        assert!(!screen.contains("event-1 "));
    }

    #[test]
    fn stop_key_fires_token_once() {
        let token = CancellationToken::new();
        let mut tui = Tui::new(token.clone());
        tui.handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(token.is_cancelled());
        assert!(tui.state.lock().unwrap().stopping);
    }
}
