mod cache;
mod event;
mod feeds;
mod fetch;
mod player;
mod pool;
mod scheduler;
mod state;
mod timer;
mod ui;

use crate::cache::{CacheStore, Clock, SystemClock};
use crate::event::{Dashboard, RefreshSettings};
use crate::feeds::{FeedApi, HttpFeeds};
use crate::fetch::RetryPolicy;
use crate::player::AudioSink;
use crate::player::mpris::{MprisSink, get_active_player_names, pick_player};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Application configuration from CLI
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about)]
pub struct Config {
    /// Print changes as plain lines to stdout (default is the full-screen UI)
    #[arg(long)]
    pipe: bool,
    /// Persisted state file (theme and last quotation)
    #[arg(long, value_name = "PATH")]
    state_file: Option<PathBuf>,
    /// Base URL of the feed API
    #[arg(long, env = "FISHPOND_API_BASE", default_value = feeds::DEFAULT_API_BASE)]
    api_base: String,
    /// Music chart to draw tracks from
    #[arg(long, default_value = feeds::DEFAULT_CHART)]
    chart: String,
    /// MPRIS bus name of the player used for music (auto-detected if absent)
    #[arg(long, value_name = "SERVICE")]
    player: Option<String>,
    /// Blocklist for MPRIS player service names (comma-separated, case-insensitive)
    #[arg(
        long = "block",
        value_name = "SERVICE1,SERVICE2",
        value_delimiter = ','
    )]
    block: Vec<String>,
    /// Disable background music
    #[arg(long)]
    no_music: bool,
    /// Attempts per fetch cycle, the first one included
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,
    /// Pause between attempts
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,
    #[arg(long, default_value_t = 300)]
    news_interval_secs: u64,
    #[arg(long, default_value_t = 60)]
    quote_check_secs: u64,
    /// A cached quotation younger than this is not refetched
    #[arg(long, default_value_t = 3600)]
    quote_max_age_secs: u64,
    /// Shorter tracks are skipped
    #[arg(long, default_value_t = 120)]
    min_duration_secs: u64,
    /// Enable backend logging to stderr
    #[arg(long)]
    pub debug_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipe: false,
            state_file: None,
            api_base: feeds::DEFAULT_API_BASE.to_string(),
            chart: feeds::DEFAULT_CHART.to_string(),
            player: None,
            block: vec![],
            no_music: false,
            max_attempts: 3,
            retry_delay_ms: 0,
            news_interval_secs: 300,
            quote_check_secs: 60,
            quote_max_age_secs: 3600,
            min_duration_secs: 120,
            debug_log: false,
        }
    }
}

impl Config {
    fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            news_interval: Duration::from_secs(self.news_interval_secs.max(1)),
            quote_check_interval: Duration::from_secs(self.quote_check_secs.max(1)),
            quote_max_age: Duration::from_secs(self.quote_max_age_secs),
            min_track_duration: Duration::from_secs(self.min_duration_secs),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("fishpond").join("state.json"))
                .unwrap_or_else(|| PathBuf::from("fishpond-state.json"))
        })
    }
}

fn init_logging(cfg: &Config) {
    // The alternate screen owns the terminal unless logging was asked for.
    if !cfg.pipe && !cfg.debug_log {
        return;
    }
    let default = if cfg.debug_log { "warn,fishpond=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The configured player, else the first unblocked one playerctld knows.
async fn resolve_player(cfg: &Config) -> Option<String> {
    if cfg.no_music {
        return None;
    }
    if let Some(p) = &cfg.player {
        return Some(p.clone());
    }
    match get_active_player_names().await {
        Ok(names) => pick_player(&names, &cfg.block),
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable, music disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cfg = Config::parse();
    init_logging(&cfg);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = CacheStore::open(cfg.state_path(), clock.clone());
    let api: Arc<dyn FeedApi> = Arc::new(HttpFeeds::new(&cfg.api_base, &cfg.chart));

    let (event_tx, event_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let (sink, audio_rx) = match resolve_player(&cfg).await {
        Some(service) => {
            tracing::info!(service = %service, "Using MPRIS player for music");
            let (audio_tx, audio_rx) = mpsc::channel(32);
            let sink: Box<dyn AudioSink> = Box::new(MprisSink::spawn(service, audio_tx));
            (Some(sink), Some(audio_rx))
        }
        None => {
            tracing::info!("No music player, music disabled");
            (None, None)
        }
    };

    let dashboard = Dashboard::new(
        cache,
        api,
        clock,
        sink,
        cfg.refresh_settings(),
        event_tx.clone(),
    );
    let refresh = tokio::spawn(pool::listen(
        dashboard,
        event_rx,
        audio_rx,
        shutdown_rx,
        update_tx,
    ));

    let result = if cfg.pipe {
        crate::ui::pipe::display_pipe(update_rx, shutdown_tx.clone()).await
    } else {
        crate::ui::modern::display_modern(update_rx, event_tx).await
    };

    let _ = shutdown_tx.send(()).await;
    let _ = refresh.await;

    // Print error if any, for better diagnostics
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_match_default_config() {
        let parsed = Config::try_parse_from(["fishpond"]).unwrap();
        let mut expected = Config::default();
        // the env var may be set on the machine running the tests
        expected.api_base = parsed.api_base.clone();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn refresh_settings_follow_flags() {
        let cfg = Config::try_parse_from([
            "fishpond",
            "--max-attempts",
            "5",
            "--retry-delay-ms",
            "250",
            "--quote-max-age-secs",
            "10",
            "--block",
            "spotify,firefox",
        ])
        .unwrap();
        let s = cfg.refresh_settings();
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.retry.delay, Duration::from_millis(250));
        assert_eq!(s.quote_max_age, Duration::from_secs(10));
        assert_eq!(s.news_interval, Duration::from_secs(300));
        assert_eq!(cfg.block, vec!["spotify", "firefox"]);
    }

    #[test]
    fn explicit_state_file_wins() {
        let cfg = Config::try_parse_from(["fishpond", "--state-file", "/tmp/x.json"]).unwrap();
        assert_eq!(cfg.state_path(), PathBuf::from("/tmp/x.json"));
    }
}
