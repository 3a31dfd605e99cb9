//! Event taxonomy and the reconciliation of each event into dashboard state.
//!
//! All state lives in [`Dashboard`] and is only touched from the event loop.
//! Network work runs in spawned tasks that report back through the event
//! channel, each result carrying the ticket it was issued under. A result is
//! applied only if its ticket is still the newest for that source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::cache::{CacheStore, Clock};
use crate::feeds::{self, FeedApi, NewsSection, QuotationRecord, SourceKey, Track};
use crate::fetch::{FetchError, Fetched, RetryPolicy, fetch_with_retry};
use crate::player::{AudioEvent, AudioSink, FetchTicket, MIN_DURATION, PlaybackCoordinator};
use crate::state::{QUOTATION_KEY, SourceStatus, StateBundle, THEME_KEY, Theme, Update};

/// User intents coming from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TogglePlay,
    Play,
    Pause,
    Next,
    Seek(f64),
    SeekBy(f64),
    RefreshNews,
    RefreshQuote,
    ToggleTheme,
    Quit,
}

#[derive(Debug)]
pub enum Event {
    /// A scheduled refresh came due.
    Tick(SourceKey),
    Command(Command),
    Retrying {
        source: SourceKey,
        ticket: u64,
        attempt: u32,
        error: FetchError,
    },
    NewsFetched {
        ticket: u64,
        result: Result<Fetched<Vec<NewsSection>>, FetchError>,
    },
    QuoteFetched {
        ticket: u64,
        result: Result<Fetched<QuotationRecord>, FetchError>,
    },
    TrackFetched {
        ticket: FetchTicket,
        result: Result<Fetched<Track>, FetchError>,
    },
    Audio(AudioEvent),
}

/// Refresh cadence and policies.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub retry: RetryPolicy,
    pub news_interval: Duration,
    pub quote_check_interval: Duration,
    pub quote_max_age: Duration,
    pub min_track_duration: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            news_interval: Duration::from_secs(5 * 60),
            quote_check_interval: Duration::from_secs(60),
            quote_max_age: Duration::from_secs(60 * 60),
            min_track_duration: MIN_DURATION,
        }
    }
}

pub struct Dashboard {
    state: StateBundle,
    cache: CacheStore,
    player: Option<PlaybackCoordinator<Box<dyn AudioSink>>>,
    api: Arc<dyn FeedApi>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    tx: mpsc::Sender<Event>,
    tickets: HashMap<SourceKey, u64>,
    should_exit: bool,
}

impl Dashboard {
    /// Builds the dashboard and pre-populates it from the cache.
    pub fn new(
        cache: CacheStore,
        api: Arc<dyn FeedApi>,
        clock: Arc<dyn Clock>,
        sink: Option<Box<dyn AudioSink>>,
        settings: RefreshSettings,
        tx: mpsc::Sender<Event>,
    ) -> Self {
        let theme = cache
            .read::<Theme>(THEME_KEY)
            .map(|e| e.value)
            .unwrap_or_default();
        let cached_quote = cache.read::<QuotationRecord>(QUOTATION_KEY);
        let mut state = StateBundle::new(theme, None);
        if let Some(entry) = cached_quote {
            tracing::debug!(id = %entry.value.id, "Restored cached quotation");
            state.replace_quote(entry.value, entry.fetched_at_ms);
        }
        let player = sink.map(|s| PlaybackCoordinator::new(s, settings.min_track_duration));
        Self {
            state,
            cache,
            player,
            api,
            clock,
            settings,
            tx,
            tickets: HashMap::new(),
            should_exit: false,
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    pub fn is_playing(&self) -> bool {
        self.player.as_ref().is_some_and(|p| p.is_playing())
    }

    #[cfg(test)]
    pub fn state(&self) -> &StateBundle {
        &self.state
    }

    #[cfg(test)]
    pub fn player(&self) -> Option<&PlaybackCoordinator<Box<dyn AudioSink>>> {
        self.player.as_ref()
    }

    /// Combined version of dashboard and player state.
    pub fn version(&self) -> u64 {
        let player = self.player.as_ref().map(|p| p.version()).unwrap_or(0);
        self.state.version.wrapping_add(player)
    }

    pub fn snapshot(&self) -> Update {
        self.state
            .snapshot(self.player.as_ref().map(|p| p.view()), self.version())
    }

    /// Kicks off the first music fetch. Timers drive the other sources.
    pub fn start(&mut self) {
        if let Some(ticket) = self.player.as_mut().and_then(|p| p.start()) {
            self.spawn_track_fetch(ticket);
        }
    }

    pub fn process_event(&mut self, event: Event) {
        match event {
            Event::Tick(SourceKey::News) => self.refresh_news(false),
            Event::Tick(SourceKey::Quotation) => self.refresh_quote(false),
            // Music has no timer; it only advances on next/end/failure.
            Event::Tick(SourceKey::Music) => {}
            Event::Command(cmd) => self.handle_command(cmd),
            Event::Retrying {
                source,
                ticket,
                attempt,
                error,
            } => self.handle_retry(source, ticket, attempt, error),
            Event::NewsFetched { ticket, result } => self.handle_news(ticket, result),
            Event::QuoteFetched { ticket, result } => self.handle_quote(ticket, result),
            Event::TrackFetched { ticket, result } => {
                if let Some(player) = self.player.as_mut() {
                    player.on_track_fetched(ticket, result);
                }
            }
            Event::Audio(ev) => {
                let followup = self.player.as_mut().and_then(|p| p.on_audio_event(ev));
                if let Some(ticket) = followup {
                    self.spawn_track_fetch(ticket);
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RefreshNews => self.refresh_news(true),
            Command::RefreshQuote => self.refresh_quote(true),
            Command::ToggleTheme => {
                let theme = self.state.toggle_theme();
                if let Err(e) = self.cache.write(THEME_KEY, &theme) {
                    tracing::warn!(error = %e, "Failed to persist theme");
                }
            }
            Command::Quit => self.should_exit = true,
            music => {
                let Some(player) = self.player.as_mut() else {
                    return;
                };
                let followup = match music {
                    Command::TogglePlay => player.toggle(),
                    Command::Play => {
                        player.play();
                        None
                    }
                    Command::Pause => {
                        player.pause();
                        None
                    }
                    Command::Next => Some(player.next()),
                    Command::Seek(pos) => {
                        player.seek(pos);
                        None
                    }
                    Command::SeekBy(delta) => {
                        player.seek_by(delta);
                        None
                    }
                    _ => None,
                };
                if let Some(ticket) = followup {
                    self.spawn_track_fetch(ticket);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // refresh decisions
    // ------------------------------------------------------------------

    fn refresh_news(&mut self, force: bool) {
        if !force && self.state.news_status.is_busy() {
            tracing::debug!("News fetch already in flight, skipping tick");
            return;
        }
        let ticket = self.next_ticket(SourceKey::News);
        self.state.set_news_status(SourceStatus::Loading);
        self.spawn_news_fetch(ticket);
    }

    fn refresh_quote(&mut self, force: bool) {
        if !force {
            self.cache.sync_from_disk();
            if !self.cache.is_stale(QUOTATION_KEY, self.settings.quote_max_age) {
                self.adopt_cached_quote();
                tracing::debug!("Quotation still fresh, skipping fetch");
                return;
            }
            if self.state.quote_status.is_busy() {
                return;
            }
        }
        let ticket = self.next_ticket(SourceKey::Quotation);
        self.state.set_quote_status(SourceStatus::Loading);
        self.spawn_quote_fetch(ticket);
    }

    /// Another instance may have refreshed the shared state file.
    fn adopt_cached_quote(&mut self) {
        let Some(entry) = self.cache.read::<QuotationRecord>(QUOTATION_KEY) else {
            return;
        };
        let newer = match self.state.quote_status {
            SourceStatus::Ready { fetched_at_ms } => entry.fetched_at_ms > fetched_at_ms,
            _ => true,
        };
        if newer || self.state.quote.is_none() {
            self.state.replace_quote(entry.value, entry.fetched_at_ms);
        }
    }

    // ------------------------------------------------------------------
    // completions
    // ------------------------------------------------------------------

    fn handle_retry(&mut self, source: SourceKey, ticket: u64, attempt: u32, error: FetchError) {
        let max = self.settings.retry.max_attempts.max(1);
        match source {
            SourceKey::Music => {
                if let Some(player) = self.player.as_mut() {
                    player.on_fetch_retry(FetchTicket(ticket), attempt, max);
                }
            }
            _ if !self.is_live(source, ticket) || attempt >= max => {}
            SourceKey::News => self.state.set_news_status(SourceStatus::RetryPending {
                attempt,
                reason: error.reason().to_string(),
            }),
            SourceKey::Quotation => self.state.set_quote_status(SourceStatus::RetryPending {
                attempt,
                reason: error.reason().to_string(),
            }),
        }
    }

    fn handle_news(&mut self, ticket: u64, result: Result<Fetched<Vec<NewsSection>>, FetchError>) {
        if !self.is_live(SourceKey::News, ticket) {
            tracing::debug!(ticket, "Discarding stale news fetch");
            return;
        }
        match result {
            Ok(fetched) => {
                tracing::info!(sections = fetched.value.len(), "News refreshed");
                self.state.replace_sections(fetched.value, fetched.fetched_at_ms);
            }
            Err(e) => {
                tracing::warn!(error = %e, "News refresh failed");
                self.state.set_news_status(SourceStatus::Failed(
                    "could not load hot topics; will try again on the next refresh".to_string(),
                ));
            }
        }
    }

    fn handle_quote(&mut self, ticket: u64, result: Result<Fetched<QuotationRecord>, FetchError>) {
        if !self.is_live(SourceKey::Quotation, ticket) {
            tracing::debug!(ticket, "Discarding stale quotation fetch");
            return;
        }
        match result {
            Ok(fetched) => {
                if let Err(e) = self
                    .cache
                    .write_at(QUOTATION_KEY, &fetched.value, fetched.fetched_at_ms)
                {
                    tracing::warn!(error = %e, "Failed to persist quotation");
                }
                tracing::info!(id = %fetched.value.id, "Quotation refreshed");
                self.state.replace_quote(fetched.value, fetched.fetched_at_ms);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Quotation refresh failed");
                self.state
                    .set_quote_status(SourceStatus::Failed("could not fetch quotation".to_string()));
            }
        }
    }

    fn next_ticket(&mut self, source: SourceKey) -> u64 {
        let t = self.tickets.entry(source).or_insert(0);
        *t += 1;
        *t
    }

    fn is_live(&self, source: SourceKey, ticket: u64) -> bool {
        self.tickets.get(&source) == Some(&ticket)
    }

    // ------------------------------------------------------------------
    // spawned fetches
    // ------------------------------------------------------------------

    fn spawn_news_fetch(&self, ticket: u64) {
        let (api, tx, clock, policy) = self.fetch_parts();
        tokio::spawn(async move {
            let result = fetch_with_retry(
                &policy,
                clock.as_ref(),
                || api.news(),
                feeds::news::validate,
                retry_notifier(&tx, SourceKey::News, ticket),
            )
            .await;
            let _ = tx.send(Event::NewsFetched { ticket, result }).await;
        });
    }

    fn spawn_quote_fetch(&self, ticket: u64) {
        let (api, tx, clock, policy) = self.fetch_parts();
        tokio::spawn(async move {
            let result = fetch_with_retry(
                &policy,
                clock.as_ref(),
                || api.quotation(),
                feeds::quote::validate,
                retry_notifier(&tx, SourceKey::Quotation, ticket),
            )
            .await;
            let _ = tx.send(Event::QuoteFetched { ticket, result }).await;
        });
    }

    fn spawn_track_fetch(&self, ticket: FetchTicket) {
        let (api, tx, clock, policy) = self.fetch_parts();
        tokio::spawn(async move {
            let result = fetch_with_retry(
                &policy,
                clock.as_ref(),
                || api.music(),
                feeds::music::validate,
                retry_notifier(&tx, SourceKey::Music, ticket.0),
            )
            .await;
            let _ = tx.send(Event::TrackFetched { ticket, result }).await;
        });
    }

    fn fetch_parts(&self) -> (Arc<dyn FeedApi>, mpsc::Sender<Event>, Arc<dyn Clock>, RetryPolicy) {
        (
            self.api.clone(),
            self.tx.clone(),
            self.clock.clone(),
            self.settings.retry.clone(),
        )
    }
}

/// Forwards recoverable failures to the loop. Lossy when the channel is full.
fn retry_notifier(
    tx: &mpsc::Sender<Event>,
    source: SourceKey,
    ticket: u64,
) -> impl FnMut(u32, &FetchError) + '_ {
    move |attempt, error| {
        let _ = tx.try_send(Event::Retrying {
            source,
            ticket,
            attempt,
            error: error.clone(),
        });
    }
}
