use crate::state::Theme;
use ratatui::style::{Color, Modifier, Style};

pub struct Palette {
    pub base: Style,
    pub header: Style,
    pub quote: Style,
    pub section_title: Style,
    pub rank: Style,
    pub hot: Style,
    pub dim: Style,
    pub status: Style,
    pub error: Style,
    pub gauge: Style,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        let (fg, bg, accent) = match theme {
            Theme::Dark => (Color::Gray, Color::Black, Color::Cyan),
            Theme::Light => (Color::Black, Color::White, Color::Blue),
        };
        let base = Style::default().fg(fg).bg(bg);
        Self {
            base,
            header: base.fg(accent).add_modifier(Modifier::BOLD),
            quote: base.add_modifier(Modifier::ITALIC),
            section_title: base.fg(accent).add_modifier(Modifier::BOLD),
            rank: base.fg(Color::Yellow),
            hot: base.fg(Color::Red),
            dim: base.add_modifier(Modifier::DIM),
            status: base.fg(Color::Green),
            error: base.fg(Color::Red).add_modifier(Modifier::BOLD),
            gauge: Style::default().fg(accent).bg(bg),
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::for_theme(Theme::default())
    }
}
