// pool.rs: Central event loop driving refresh timers, fetch completions and UI updates

use crate::event::{Dashboard, Event};
use crate::feeds::SourceKey;
use crate::player::AudioEvent;
use crate::scheduler::Scheduler;
use crate::state::Update;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};

/// Cadence of position refreshes pushed to the UI while music plays.
const POSITION_TICK: Duration = Duration::from_millis(500);

/// Registers the news and quotation timers. Each tick only enqueues an event;
/// the decision to fetch is made by the loop.
fn schedule_refreshes(scheduler: &mut Scheduler, dashboard: &Dashboard) {
    let settings = dashboard.settings();
    for (source, interval) in [
        (SourceKey::News, settings.news_interval),
        (SourceKey::Quotation, settings.quote_check_interval),
    ] {
        let tx = dashboard.sender();
        scheduler.schedule(source.as_str(), interval, move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send(Event::Tick(source)).await;
            }
        });
    }
}

/// The snapshot to send, if anything changed since the last one.
///
/// Kept synchronous: the dashboard is `Send` but not `Sync`, so no borrow of
/// it may live across an await.
fn pending_update(dashboard: &Dashboard, last_version: &mut Option<u64>, force: bool) -> Option<Update> {
    let version = dashboard.version();
    if !force && *last_version == Some(version) {
        return None;
    }
    *last_version = Some(version);
    Some(dashboard.snapshot())
}

/// Runs until shutdown, quit, or the UI hanging up.
///
/// Timers are torn down before returning, so no refresh fires afterwards.
pub async fn listen(
    mut dashboard: Dashboard,
    mut events: mpsc::Receiver<Event>,
    mut audio: Option<mpsc::Receiver<AudioEvent>>,
    mut shutdown_rx: mpsc::Receiver<()>,
    update_tx: mpsc::Sender<Update>,
) {
    let mut scheduler = Scheduler::new();
    schedule_refreshes(&mut scheduler, &dashboard);
    dashboard.start();

    let mut last_version = None;
    if let Some(first) = pending_update(&dashboard, &mut last_version, true) {
        let _ = update_tx.send(first).await;
    }

    let mut position_tick = tokio::time::interval(POSITION_TICK);
    position_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Position-only refreshes need a send even without a version bump.
        let mut force = false;
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            ev = events.recv() => match ev {
                Some(ev) => dashboard.process_event(ev),
                None => break,
            },
            ev = async {
                match audio.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => futures_util::future::pending().await,
                }
            } => match ev {
                Some(ev) => dashboard.process_event(Event::Audio(ev)),
                None => {
                    tracing::warn!("Audio sink hung up");
                    audio = None;
                }
            },
            _ = position_tick.tick() => {
                if !dashboard.is_playing() {
                    continue;
                }
                force = true;
            }
        }
        if dashboard.should_exit() {
            break;
        }
        if let Some(update) = pending_update(&dashboard, &mut last_version, force)
            && update_tx.send(update).await.is_err()
        {
            tracing::debug!("UI receiver dropped, stopping");
            break;
        }
    }

    scheduler.teardown();
    tracing::debug!("Refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, ManualClock};
    use crate::event::RefreshSettings;
    use crate::event::tests::{NEWS_OK, QUOTE_OK, ScriptedFeeds, json};
    use crate::event::Command;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    struct Running {
        feeds: Arc<ScriptedFeeds>,
        events: mpsc::Sender<Event>,
        shutdown: mpsc::Sender<()>,
        updates: mpsc::Receiver<Update>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn run(feeds: ScriptedFeeds) -> Running {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let feeds = Arc::new(feeds);
        let (tx, rx) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let (update_tx, updates) = mpsc::channel(64);
        let dashboard = Dashboard::new(
            CacheStore::in_memory(clock.clone()),
            feeds.clone(),
            clock,
            None,
            RefreshSettings::default(),
            tx.clone(),
        );
        let handle = tokio::spawn(listen(dashboard, rx, None, shutdown_rx, update_tx));
        Running {
            feeds,
            events: tx,
            shutdown,
            updates,
            handle,
        }
    }

    async fn wait_for(updates: &mut mpsc::Receiver<Update>, pred: impl Fn(&Update) -> bool) -> Update {
        loop {
            let u = updates.recv().await.expect("loop ended early");
            if pred(&u) {
                return u;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_refresh_populates_news_and_quote() {
        let feeds = ScriptedFeeds::default();
        feeds.news.lock().unwrap().push_back(json(NEWS_OK));
        feeds.quotes.lock().unwrap().push_back(json(QUOTE_OK));
        let mut r = run(feeds);

        let u = wait_for(&mut r.updates, |u| !u.sections.is_empty() && u.quote.is_some()).await;
        assert_eq!(u.sections[0].name, "微博");
        assert!(u.player.is_none());
        assert_eq!(r.feeds.news_calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.feeds.quote_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_refresh_after_shutdown() {
        let feeds = ScriptedFeeds::default();
        feeds.news.lock().unwrap().push_back(json(NEWS_OK));
        let mut r = run(feeds);
        wait_for(&mut r.updates, |u| !u.sections.is_empty()).await;

        r.shutdown.send(()).await.unwrap();
        r.handle.await.unwrap();

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(r.feeds.news_calls.load(Ordering::SeqCst), 1);
        // sender side dropped with the loop
        while r.updates.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn quit_command_ends_the_loop() {
        let r = run(ScriptedFeeds::default());
        r.events.send(Event::Command(Command::Quit)).await.unwrap();
        r.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn theme_toggle_reaches_the_ui() {
        let mut r = run(ScriptedFeeds::default());
        let first = r.updates.recv().await.unwrap();
        r.events
            .send(Event::Command(Command::ToggleTheme))
            .await
            .unwrap();
        let u = wait_for(&mut r.updates, |u| u.theme != first.theme).await;
        assert_eq!(u.theme, first.theme.toggled());
    }
}
