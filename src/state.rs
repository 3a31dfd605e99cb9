// state.rs: Dashboard state and the snapshots handed to the UI

use crate::feeds::{NewsSection, QuotationRecord};
use crate::player::PlayerView;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const THEME_KEY: &str = "theme";
pub const QUOTATION_KEY: &str = "quotation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Progress of one non-music source.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SourceStatus {
    #[default]
    Idle,
    Loading,
    RetryPending { attempt: u32, reason: String },
    Ready { fetched_at_ms: i64 },
    Failed(String),
}

impl SourceStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, SourceStatus::Loading | SourceStatus::RetryPending { .. })
    }
}

/// Represents a UI update for the whole dashboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub sections: Arc<Vec<NewsSection>>,
    pub news_status: SourceStatus,
    pub quote: Option<QuotationRecord>,
    pub quote_status: SourceStatus,
    pub theme: Theme,
    /// `None` when music is disabled.
    pub player: Option<PlayerView>,
    pub version: u64, // Incremented on any state change
}

/// Everything except the player, which owns its own state.
#[derive(Debug, Default)]
pub struct StateBundle {
    pub sections: Arc<Vec<NewsSection>>,
    pub news_status: SourceStatus,
    pub quote: Option<QuotationRecord>,
    pub quote_status: SourceStatus,
    pub theme: Theme,
    pub version: u64, // Incremented on any state change
}

impl StateBundle {
    pub fn new(theme: Theme, quote: Option<QuotationRecord>) -> Self {
        Self {
            theme,
            quote,
            ..Default::default()
        }
    }

    /// Swaps the whole section list in one go.
    pub fn replace_sections(&mut self, sections: Vec<NewsSection>, fetched_at_ms: i64) {
        self.sections = Arc::new(sections);
        self.news_status = SourceStatus::Ready { fetched_at_ms };
        self.version += 1;
    }

    pub fn set_news_status(&mut self, status: SourceStatus) {
        if self.news_status != status {
            self.news_status = status;
            self.version += 1;
        }
    }

    pub fn replace_quote(&mut self, quote: QuotationRecord, fetched_at_ms: i64) {
        self.quote = Some(quote);
        self.quote_status = SourceStatus::Ready { fetched_at_ms };
        self.version += 1;
    }

    pub fn set_quote_status(&mut self, status: SourceStatus) {
        if self.quote_status != status {
            self.quote_status = status;
            self.version += 1;
        }
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.version += 1;
        self.theme
    }

    pub fn snapshot(&self, player: Option<PlayerView>, version: u64) -> Update {
        Update {
            sections: self.sections.clone(),
            news_status: self.news_status.clone(),
            quote: self.quote.clone(),
            quote_status: self.quote_status.clone(),
            theme: self.theme,
            player,
            version,
        }
    }
}
