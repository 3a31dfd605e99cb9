//! Full-screen dashboard.
//!
//! Layout, top to bottom: the quotation header, a grid of hot-topic sections
//! (three per row, paged with Tab) and the player footer. Key presses are
//! translated into [`Command`]s for the refresh loop; nothing here mutates
//! dashboard state directly.

use crate::event::{Command, Event};
use crate::feeds::news::NewsItem;
use crate::player::{PlaybackPhase, PlayerView};
use crate::state::{SourceStatus, Update};
use crate::timer::format_time;
use crate::ui::styles::Palette;
use crate::ui::util::{display_width, quote_line, truncate, wrap};
use crossterm::{
    event::{Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MediaKeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Gauge, Paragraph},
};
use std::io;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

const SECTIONS_PER_PAGE: usize = 3;
const SEEK_STEP: f64 = 10.0;

/// UI state for the modern TUI mode
#[derive(Default)]
pub struct ModernUIState {
    pub last_update: Option<Update>,
    pub page: usize,
    pub should_exit: bool,
}

impl ModernUIState {
    fn page_count(&self) -> usize {
        self.last_update
            .as_ref()
            .map(|u| u.sections.len().div_ceil(SECTIONS_PER_PAGE))
            .unwrap_or(0)
            .max(1)
    }
}

#[derive(Debug, PartialEq)]
enum Action {
    Send(Command),
    NextPage,
    Quit,
}

fn map_key(key: KeyEvent) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let action = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Action::Quit,
        KeyCode::Char(' ') | KeyCode::Media(MediaKeyCode::PlayPause) => {
            Action::Send(Command::TogglePlay)
        }
        // media keys only arrive on terminals that report them
        KeyCode::Media(MediaKeyCode::Play) => Action::Send(Command::Play),
        KeyCode::Media(MediaKeyCode::Pause) => Action::Send(Command::Pause),
        KeyCode::Media(MediaKeyCode::TrackNext) => Action::Send(Command::Next),
        KeyCode::Char('n') => Action::Send(Command::Next),
        KeyCode::Left => Action::Send(Command::SeekBy(-SEEK_STEP)),
        KeyCode::Right => Action::Send(Command::SeekBy(SEEK_STEP)),
        KeyCode::Home => Action::Send(Command::Seek(0.0)),
        KeyCode::Char('t') => Action::Send(Command::ToggleTheme),
        KeyCode::Char('r') => Action::Send(Command::RefreshQuote),
        KeyCode::Char('R') => Action::Send(Command::RefreshNews),
        KeyCode::Tab => Action::NextPage,
        _ => return None,
    };
    Some(action)
}

/// Display the dashboard in modern TUI mode until the user quits or the loop ends.
pub async fn display_modern(
    mut updates: mpsc::Receiver<Update>,
    commands: mpsc::Sender<Event>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    enable_raw_mode().map_err(to_boxed_err)?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).map_err(to_boxed_err)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(to_boxed_err)?;
    let mut state = ModernUIState::default();

    // One OS thread polls crossterm and forwards events; it exits once the
    // receiver is gone.
    let (term_tx, mut term_rx) = mpsc::channel(32);
    thread::spawn(move || {
        loop {
            match crossterm::event::poll(Duration::from_millis(100)) {
                Ok(true) => {
                    if let Ok(ev) = crossterm::event::read()
                        && term_tx.blocking_send(ev).is_err()
                    {
                        break;
                    }
                }
                Ok(false) => {
                    if term_tx.is_closed() {
                        break;
                    }
                }
                Err(_) => thread::sleep(Duration::from_millis(100)),
            }
        }
    });

    let result = run_loop(&mut terminal, &mut state, &mut updates, &mut term_rx, &commands).await;

    disable_raw_mode().map_err(to_boxed_err)?;
    execute!(io::stdout(), LeaveAlternateScreen).map_err(to_boxed_err)?;
    result
}

async fn run_loop<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    state: &mut ModernUIState,
    updates: &mut mpsc::Receiver<Update>,
    term_rx: &mut mpsc::Receiver<TermEvent>,
    commands: &mpsc::Sender<Event>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    while !state.should_exit {
        tokio::select! {
            upd = updates.recv() => match upd {
                Some(upd) => state.last_update = Some(upd),
                None => state.should_exit = true,
            },
            ev = term_rx.recv() => match ev {
                Some(TermEvent::Key(key)) => match map_key(key) {
                    Some(Action::Send(cmd)) => {
                        let _ = commands.send(Event::Command(cmd)).await;
                    }
                    Some(Action::NextPage) => {
                        state.page = (state.page + 1) % state.page_count();
                    }
                    Some(Action::Quit) => {
                        let _ = commands.send(Event::Command(Command::Quit)).await;
                        state.should_exit = true;
                    }
                    None => {}
                },
                Some(_) => {}
                None => state.should_exit = true,
            },
        }
        terminal.draw(|f| draw(f, state)).map_err(to_boxed_err)?;
    }
    Ok(())
}

fn draw(f: &mut Frame, state: &ModernUIState) {
    let area = f.area();
    let Some(upd) = &state.last_update else {
        f.render_widget(Paragraph::new("starting…"), area);
        return;
    };
    let palette = Palette::for_theme(upd.theme);
    f.render_widget(Block::default().style(palette.base), area);

    let header_lines = header_lines(upd, area.width.saturating_sub(2) as usize, &palette);
    let header_height = (header_lines.len() as u16 + 2).min(area.height / 3).max(3);
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(header_height),
        Constraint::Min(3),
        Constraint::Length(5),
    ])
    .areas(area);

    let theme_label = format!(" fishpond · {:?} ", upd.theme).to_lowercase();
    f.render_widget(
        Paragraph::new(header_lines).block(Block::bordered().title(Span::styled(theme_label, palette.header))),
        header,
    );
    draw_news(f, body, upd, state.page, &palette);
    draw_player(f, footer, upd.player.as_ref(), &palette);
}

fn header_lines(upd: &Update, width: usize, palette: &Palette) -> Vec<Line<'static>> {
    let mut lines: Vec<Line> = match &upd.quote {
        Some(q) => wrap(&quote_line(q), width)
            .into_iter()
            .map(|l| Line::styled(l, palette.quote))
            .collect(),
        None => vec![Line::styled("…", palette.dim)],
    };
    match &upd.quote_status {
        SourceStatus::RetryPending { attempt, .. } => {
            lines.push(Line::styled(format!("retrying quotation (attempt {attempt})"), palette.dim))
        }
        SourceStatus::Failed(msg) => lines.push(Line::styled(msg.clone(), palette.error)),
        _ => {}
    }
    lines
}

fn news_status_line(status: &SourceStatus, palette: &Palette) -> Option<Line<'static>> {
    match status {
        SourceStatus::Loading => Some(Line::styled("loading hot topics…", palette.dim)),
        SourceStatus::RetryPending { attempt, reason } => Some(Line::styled(
            format!("hot topics failed ({reason}), retrying (attempt {attempt})"),
            palette.dim,
        )),
        SourceStatus::Failed(msg) => Some(Line::styled(msg.clone(), palette.error)),
        _ => None,
    }
}

/// One ranked headline; the title gives way so the hot score stays whole.
fn news_row(item: &NewsItem, index: usize, width: usize, palette: &Palette) -> Line<'static> {
    let rank = item.rank.unwrap_or(index as u32 + 1);
    let rank = format!("{rank:>2} ");
    let hot = item
        .hot_score
        .as_ref()
        .map(|h| format!(" {h}"))
        .unwrap_or_default();
    let room = width.saturating_sub(rank.len() + display_width(&hot));
    Line::from(vec![
        Span::styled(rank, palette.rank),
        Span::styled(truncate(&item.title, room), palette.base),
        Span::styled(hot, palette.hot),
    ])
}

fn draw_news(f: &mut Frame, area: Rect, upd: &Update, page: usize, palette: &Palette) {
    let mut area = area;
    if let Some(line) = news_status_line(&upd.news_status, palette) {
        let [status, rest] = Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(area);
        f.render_widget(Paragraph::new(line), status);
        area = rest;
    }
    if upd.sections.is_empty() {
        return;
    }

    let pages: Vec<_> = upd.sections.chunks(SECTIONS_PER_PAGE).collect();
    let page = page % pages.len();
    let columns = Layout::horizontal([Constraint::Ratio(1, SECTIONS_PER_PAGE as u32); SECTIONS_PER_PAGE])
        .split(area);

    for (section, col) in pages[page].iter().zip(columns.iter()) {
        let width = col.width.saturating_sub(2) as usize;
        let lines: Vec<Line> = section
            .items
            .iter()
            .take(col.height.saturating_sub(2) as usize)
            .enumerate()
            .map(|(i, item)| news_row(item, i, width, palette))
            .collect();
        let mut title = section.name.clone();
        if let Some(sub) = &section.subtitle {
            title = format!("{title} · {sub}");
        }
        let block = Block::bordered()
            .title(Span::styled(truncate(&title, width), palette.section_title))
            .title_bottom(Span::styled(
                format!(" {}/{} ", page + 1, pages.len()),
                palette.dim,
            ));
        f.render_widget(Paragraph::new(lines).block(block), *col);
    }
}

fn draw_player(f: &mut Frame, area: Rect, player: Option<&PlayerView>, palette: &Palette) {
    let block = Block::bordered().title(Span::styled(" ♪ ", palette.header));
    let Some(view) = player else {
        f.render_widget(
            Paragraph::new(Line::styled("music disabled", palette.dim)).block(block),
            area,
        );
        return;
    };
    let inner = block.inner(area);
    f.render_widget(block, area);
    let [title_row, gauge_row, status_row] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .areas(inner);

    let title = match &view.track {
        Some(t) => format!("{} - {}", t.title, t.artist),
        None => String::new(),
    };
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled(format!("[{}] ", view.phase.label()), palette.status),
            Span::styled(truncate(&title, inner.width as usize), palette.base),
        ])),
        title_row,
    );

    let (ratio, label) = match view.duration {
        Some(d) if d > 0.0 => (
            (view.position / d).clamp(0.0, 1.0),
            format!("{} / {}", format_time(view.position), format_time(d)),
        ),
        _ => (0.0, format_time(view.position)),
    };
    f.render_widget(
        Gauge::default().gauge_style(palette.gauge).ratio(ratio).label(label),
        gauge_row,
    );

    let status_style = if view.phase == PlaybackPhase::Failed {
        palette.error
    } else {
        palette.dim
    };
    let status = view
        .status
        .clone()
        .unwrap_or_else(|| "space play/pause · n next · ←/→ seek · t theme · r/R refresh".into());
    f.render_widget(Paragraph::new(Line::styled(status, status_style)), status_row);
}

fn to_boxed_err<E: std::error::Error + Send + Sync + 'static>(
    e: E,
) -> Box<dyn std::error::Error + Send + Sync> {
    Box::new(e)
}
