//! Track lifecycle on top of a single audio sink.
//!
//! ```text
//! Empty ──fetch──▶ Loading ──ok──▶ PendingMetadata ──long enough──▶ Ready ⇄ Playing ⇄ Paused
//!                    ▲  │                 │                            │        │
//!                    │  └─exhausted─▶ Failed (manual next)             │        │
//!                    │                    │ too short                  │        │
//!                    └────────────────────┴──── rejected / failed ─────┴─ended──┘
//! ```
//!
//! The coordinator never performs I/O itself. Fetches are requested by
//! returning a [`FetchTicket`]; the caller runs the fetch and hands the result
//! back with the same ticket. Sink commands are issued only as part of a state
//! transition, and sink events are matched against the [`LoadId`] they carry.
//! Anything tagged with a superseded ticket or id is dropped.

use std::time::Duration;

use crate::feeds::Track;
use crate::fetch::{FetchError, Fetched};
use crate::player::sink::{AudioEvent, AudioSink, LoadId};
use crate::timer::{PlaybackTimer, format_time};

/// Tracks shorter than this are treated as jingles and skipped.
pub const MIN_DURATION: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Empty,
    Loading,
    PendingMetadata,
    Ready,
    Playing,
    Paused,
    Failed,
}

impl PlaybackPhase {
    pub fn label(self) -> &'static str {
        match self {
            PlaybackPhase::Empty => "idle",
            PlaybackPhase::Loading => "loading",
            PlaybackPhase::PendingMetadata => "buffering",
            PlaybackPhase::Ready => "ready",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Failed => "failed",
        }
    }

    fn accepts_transport(self) -> bool {
        matches!(
            self,
            PlaybackPhase::Ready | PlaybackPhase::Playing | PlaybackPhase::Paused
        )
    }
}

/// Identifies one music fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(pub u64);

/// Snapshot for rendering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerView {
    pub phase: PlaybackPhase,
    pub track: Option<Track>,
    pub position: f64,
    pub duration: Option<f64>,
    pub status: Option<String>,
    pub retry_attempt: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    id: LoadId,
    track: Track,
}

pub struct PlaybackCoordinator<S: AudioSink> {
    sink: S,
    phase: PlaybackPhase,
    ticket: u64,
    last_load_id: LoadId,
    pending: Option<Slot>,
    current: Option<Slot>,
    play_queued: bool,
    min_duration: Duration,
    retry_attempt: u32,
    status: Option<String>,
    timer: PlaybackTimer,
    version: u64,
}

impl<S: AudioSink> PlaybackCoordinator<S> {
    pub fn new(sink: S, min_duration: Duration) -> Self {
        Self {
            sink,
            phase: PlaybackPhase::Empty,
            ticket: 0,
            last_load_id: 0,
            pending: None,
            current: None,
            play_queued: false,
            min_duration,
            retry_attempt: 0,
            status: None,
            timer: PlaybackTimer::default(),
            version: 0,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Playing
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    #[cfg(test)]
    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    #[cfg(test)]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    #[cfg(test)]
    pub fn current_track(&self) -> Option<&Track> {
        self.current.as_ref().map(|s| &s.track)
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn view(&self) -> PlayerView {
        let shown = self.current.as_ref().or(self.pending.as_ref());
        let duration = self
            .current
            .as_ref()
            .and_then(|s| s.track.duration_seconds);
        PlayerView {
            phase: self.phase,
            track: shown.map(|s| s.track.clone()),
            position: if self.current.is_some() {
                self.timer.estimate(duration)
            } else {
                0.0
            },
            duration,
            status: self.status.clone(),
            retry_attempt: self.retry_attempt,
        }
    }

    /// First fetch. Does not autoplay.
    pub fn start(&mut self) -> Option<FetchTicket> {
        if self.phase != PlaybackPhase::Empty {
            return None;
        }
        Some(self.request_next(false))
    }

    /// Abandons whatever is loading or playing and fetches a replacement that
    /// plays as soon as it is ready.
    pub fn next(&mut self) -> FetchTicket {
        self.status = None;
        self.request_next(true)
    }

    pub fn play(&mut self) {
        match self.phase {
            PlaybackPhase::Ready | PlaybackPhase::Paused => self.start_playback(),
            PlaybackPhase::Loading | PlaybackPhase::PendingMetadata => {
                self.play_queued = true;
                self.version += 1;
            }
            _ => {}
        }
    }

    pub fn pause(&mut self) {
        match self.phase {
            PlaybackPhase::Playing => {
                self.sink.pause();
                self.timer.mark_paused();
                self.phase = PlaybackPhase::Paused;
                self.version += 1;
            }
            PlaybackPhase::Loading | PlaybackPhase::PendingMetadata if self.play_queued => {
                self.play_queued = false;
                self.version += 1;
            }
            _ => {}
        }
    }

    /// The single play/pause control. On a failed player it means "next".
    pub fn toggle(&mut self) -> Option<FetchTicket> {
        match self.phase {
            PlaybackPhase::Failed | PlaybackPhase::Empty => Some(self.next()),
            PlaybackPhase::Playing => {
                self.pause();
                None
            }
            PlaybackPhase::Loading | PlaybackPhase::PendingMetadata if self.play_queued => {
                self.pause();
                None
            }
            _ => {
                self.play();
                None
            }
        }
    }

    /// Absolute seek in seconds, clamped to the track. Ignored while loading.
    pub fn seek(&mut self, position: f64) {
        if !self.phase.accepts_transport() {
            return;
        }
        let duration = self
            .current
            .as_ref()
            .and_then(|s| s.track.duration_seconds);
        let mut target = crate::timer::sanitize_position(position);
        if let Some(d) = duration {
            target = target.min(d);
        }
        self.sink.seek(Duration::from_secs_f64(target));
        self.timer.set_position(target);
        self.version += 1;
    }

    pub fn seek_by(&mut self, delta: f64) {
        let duration = self
            .current
            .as_ref()
            .and_then(|s| s.track.duration_seconds);
        let here = self.timer.estimate(duration);
        self.seek(here + delta);
    }

    /// A failed attempt inside the current fetch cycle.
    pub fn on_fetch_retry(&mut self, ticket: FetchTicket, attempt: u32, max_attempts: u32) {
        if !self.is_live_fetch(ticket) {
            return;
        }
        self.retry_attempt = attempt;
        if attempt < max_attempts {
            self.status = Some(format!("fetching music failed, retrying ({attempt}/{max_attempts})"));
        }
        self.version += 1;
    }

    pub fn on_track_fetched(
        &mut self,
        ticket: FetchTicket,
        result: Result<Fetched<Track>, FetchError>,
    ) {
        if !self.is_live_fetch(ticket) {
            tracing::debug!(ticket = ticket.0, live = self.ticket, "Discarding stale music fetch");
            return;
        }
        self.retry_attempt = 0;
        match result {
            Ok(fetched) => {
                let track = fetched.value;
                self.last_load_id += 1;
                let id = self.last_load_id;
                tracing::info!(id, title = %track.title, artist = %track.artist, "Loading track");
                self.sink.load(id, &track.stream_url);
                self.current = None;
                self.timer.reset();
                self.pending = Some(Slot { id, track });
                self.phase = PlaybackPhase::PendingMetadata;
                self.status = None;
            }
            Err(err) => {
                let attempts = match &err {
                    FetchError::ExhaustedRetries { attempts, .. } => *attempts,
                    _ => 1,
                };
                tracing::warn!(error = %err, "Music fetch gave up");
                self.phase = PlaybackPhase::Failed;
                self.play_queued = false;
                self.status = Some(format!(
                    "could not fetch music after {attempts} attempts; press next to retry"
                ));
            }
        }
        self.version += 1;
    }

    /// Applies a sink event. May ask for a replacement track.
    pub fn on_audio_event(&mut self, event: AudioEvent) -> Option<FetchTicket> {
        let id = event.id();
        let is_pending = self.pending.as_ref().is_some_and(|s| s.id == id);
        // Once a replacement is requested the old source only stays on screen;
        // its events no longer drive transitions.
        let is_current = self.phase.accepts_transport()
            && self.current.as_ref().is_some_and(|s| s.id == id);
        if !is_pending && !is_current {
            tracing::debug!(id, ?event, "Discarding event for superseded source");
            return None;
        }

        match event {
            AudioEvent::MetadataLoaded { duration, .. } if is_pending => {
                self.on_metadata(duration)
            }
            AudioEvent::MetadataLoaded { duration, .. } => {
                if let Some(slot) = self.current.as_mut() {
                    slot.track.duration_seconds = Some(duration.as_secs_f64());
                    self.version += 1;
                }
                None
            }
            AudioEvent::Started { .. } => None,
            AudioEvent::PlayRejected { reason, .. } | AudioEvent::LoadFailed { reason, .. } => {
                tracing::warn!(id, reason = %reason, "Playback failed, advancing");
                self.phase = PlaybackPhase::Failed;
                self.status = Some("playback failed, trying next track".to_string());
                Some(self.request_next(true))
            }
            AudioEvent::Ended { .. } if is_current && self.phase == PlaybackPhase::Playing => {
                tracing::info!(id, "Track ended");
                self.phase = PlaybackPhase::Ready;
                self.timer.mark_paused();
                Some(self.request_next(true))
            }
            AudioEvent::Ended { .. } => None,
            AudioEvent::Position { position, .. } if is_current => {
                self.timer.set_position(position.as_secs_f64());
                self.version += 1;
                None
            }
            AudioEvent::Position { .. } => None,
        }
    }

    fn on_metadata(&mut self, duration: Duration) -> Option<FetchTicket> {
        if duration < self.min_duration {
            if let Some(slot) = self.pending.take() {
                tracing::info!(
                    id = slot.id,
                    title = %slot.track.title,
                    secs = duration.as_secs(),
                    "Skipping short track"
                );
            }
            self.status = Some(format!(
                "skipping short track ({})",
                format_time(duration.as_secs_f64())
            ));
            let autoplay = self.play_queued;
            return Some(self.request_next(autoplay));
        }

        if let Some(mut slot) = self.pending.take() {
            slot.track.duration_seconds = Some(duration.as_secs_f64());
            self.current = Some(slot);
            self.phase = PlaybackPhase::Ready;
            self.version += 1;
            if self.play_queued {
                self.start_playback();
            }
        }
        None
    }

    fn start_playback(&mut self) {
        let Some(id) = self.current.as_ref().map(|s| s.id) else {
            return;
        };
        self.play_queued = false;
        self.sink.play(id);
        self.timer.mark_playing();
        self.phase = PlaybackPhase::Playing;
        self.version += 1;
    }

    fn request_next(&mut self, autoplay: bool) -> FetchTicket {
        if self.phase == PlaybackPhase::Playing {
            self.sink.pause();
            self.timer.mark_paused();
        }
        self.ticket += 1;
        self.phase = PlaybackPhase::Loading;
        self.pending = None;
        self.play_queued = autoplay;
        self.retry_attempt = 0;
        self.version += 1;
        FetchTicket(self.ticket)
    }

    fn is_live_fetch(&self, ticket: FetchTicket) -> bool {
        ticket.0 == self.ticket && self.phase == PlaybackPhase::Loading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::fetch::{RetryPolicy, fetch_with_retry};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(LoadId, String),
        Play(LoadId),
        Pause,
        Seek(Duration),
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Vec<Call>,
    }

    impl AudioSink for RecordingSink {
        fn load(&mut self, id: LoadId, url: &str) {
            self.calls.push(Call::Load(id, url.to_string()));
        }
        fn play(&mut self, id: LoadId) {
            self.calls.push(Call::Play(id));
        }
        fn pause(&mut self) {
            self.calls.push(Call::Pause);
        }
        fn seek(&mut self, position: Duration) {
            self.calls.push(Call::Seek(position));
        }
    }

    fn track(title: &str, url: &str) -> Track {
        Track {
            title: title.into(),
            artist: "B".into(),
            stream_url: url.into(),
            artwork_url: None,
            duration_seconds: None,
        }
    }

    fn ok(title: &str, url: &str) -> Result<Fetched<Track>, FetchError> {
        Ok(Fetched {
            value: track(title, url),
            fetched_at_ms: 0,
        })
    }

    fn coordinator() -> PlaybackCoordinator<RecordingSink> {
        PlaybackCoordinator::new(RecordingSink::default(), MIN_DURATION)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    /// Drives a coordinator to `Ready` on a 200 s track and returns its load id.
    fn ready(c: &mut PlaybackCoordinator<RecordingSink>) -> LoadId {
        let t = c.start().unwrap();
        c.on_track_fetched(t, ok("A", "u1"));
        c.on_audio_event(AudioEvent::MetadataLoaded { id: 1, duration: secs(200) });
        assert_eq!(c.phase(), PlaybackPhase::Ready);
        1
    }

    #[test]
    fn start_enters_loading_without_touching_sink() {
        let mut c = coordinator();
        assert_eq!(c.start(), Some(FetchTicket(1)));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert!(c.sink().calls.is_empty());
        assert_eq!(c.start(), None);
    }

    #[test]
    fn long_track_becomes_current_and_ready() {
        let mut c = coordinator();
        let t = c.start().unwrap();
        c.on_track_fetched(t, ok("A", "u1"));
        assert_eq!(c.phase(), PlaybackPhase::PendingMetadata);
        assert!(c.current_track().is_none());
        assert_eq!(c.sink().calls, vec![Call::Load(1, "u1".into())]);

        let followup = c.on_audio_event(AudioEvent::MetadataLoaded { id: 1, duration: secs(200) });
        assert_eq!(followup, None);
        assert_eq!(c.phase(), PlaybackPhase::Ready);
        let current = c.current_track().unwrap();
        assert_eq!(current.title, "A");
        assert_eq!(current.duration_seconds, Some(200.0));
        // initial load does not autoplay
        assert_eq!(c.sink().calls.len(), 1);
        assert_eq!(format_time(65.0), "1:05");
    }

    #[test]
    fn short_tracks_never_become_ready() {
        let mut c = coordinator();
        let mut ticket = c.start().unwrap();
        for (i, len) in [30u64, 119, 5].into_iter().enumerate() {
            let id = i as LoadId + 1;
            c.on_track_fetched(ticket, ok("jingle", "j"));
            let next = c.on_audio_event(AudioEvent::MetadataLoaded { id, duration: secs(len) });
            assert_eq!(c.phase(), PlaybackPhase::Loading);
            assert!(c.current_track().is_none());
            ticket = next.expect("replacement requested");
        }
        assert!(c.status().unwrap().starts_with("skipping short track"));
        assert!(!c.sink().calls.iter().any(|call| matches!(call, Call::Play(_))));
    }

    #[test]
    fn exactly_min_duration_is_accepted() {
        let mut c = coordinator();
        let t = c.start().unwrap();
        c.on_track_fetched(t, ok("A", "u1"));
        c.on_audio_event(AudioEvent::MetadataLoaded { id: 1, duration: MIN_DURATION });
        assert_eq!(c.phase(), PlaybackPhase::Ready);
    }

    #[test]
    fn pause_is_idempotent() {
        let mut c = coordinator();
        let id = ready(&mut c);
        c.play();
        assert!(c.is_playing());
        c.pause();
        c.pause();
        c.pause();
        assert_eq!(c.phase(), PlaybackPhase::Paused);
        let pauses = c.sink().calls.iter().filter(|call| **call == Call::Pause).count();
        assert_eq!(pauses, 1);
        c.play();
        assert_eq!(c.sink().calls.last(), Some(&Call::Play(id)));
    }

    #[test]
    fn play_requested_while_loading_waits_for_metadata() {
        let mut c = coordinator();
        let t = c.start().unwrap();
        c.play();
        c.on_track_fetched(t, ok("A", "u1"));
        assert!(!c.is_playing());
        assert!(!c.sink().calls.contains(&Call::Play(1)));

        c.on_audio_event(AudioEvent::MetadataLoaded { id: 1, duration: secs(180) });
        assert!(c.is_playing());
        assert_eq!(c.sink().calls.last(), Some(&Call::Play(1)));
    }

    #[test]
    fn seek_is_ignored_while_loading_and_clamped_when_ready() {
        let mut c = coordinator();
        c.start();
        c.seek(30.0);
        assert!(c.sink().calls.is_empty());

        let mut c = coordinator();
        ready(&mut c);
        c.seek(500.0);
        assert_eq!(c.sink().calls.last(), Some(&Call::Seek(secs(200))));
        assert_eq!(c.view().position, 200.0);
    }

    #[test]
    fn stale_fetch_and_stale_metadata_are_discarded() {
        let mut c = coordinator();
        let first = c.start().unwrap();
        let second = c.next();
        c.on_track_fetched(first, ok("old", "u-old"));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert!(c.sink().calls.is_empty());

        c.on_track_fetched(second, ok("new", "u-new"));
        // second delivery of the same ticket is also stale now
        c.on_track_fetched(second, ok("dup", "u-dup"));
        assert_eq!(c.sink().calls, vec![Call::Load(1, "u-new".into())]);

        let third = c.next();
        c.on_track_fetched(third, ok("newer", "u-newer"));
        assert_eq!(c.on_audio_event(AudioEvent::MetadataLoaded { id: 1, duration: secs(300) }), None);
        assert_eq!(c.phase(), PlaybackPhase::PendingMetadata);

        c.on_audio_event(AudioEvent::MetadataLoaded { id: 2, duration: secs(300) });
        assert_eq!(c.current_track().unwrap().title, "newer");
        assert!(c.is_playing());
    }

    #[test]
    fn rejected_playback_advances_and_autoplays_replacement() {
        let mut c = coordinator();
        let id = ready(&mut c);
        c.play();
        let t = c
            .on_audio_event(AudioEvent::PlayRejected { id, reason: "autoplay blocked".into() })
            .expect("replacement requested");
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert_eq!(c.status(), Some("playback failed, trying next track"));

        c.on_track_fetched(t, ok("C", "u2"));
        c.on_audio_event(AudioEvent::MetadataLoaded { id: 2, duration: secs(240) });
        assert!(c.is_playing());
        assert_eq!(c.sink().calls.last(), Some(&Call::Play(2)));
    }

    #[test]
    fn natural_end_fetches_next() {
        let mut c = coordinator();
        let id = ready(&mut c);
        c.play();
        let t = c.on_audio_event(AudioEvent::Ended { id });
        assert_eq!(t, Some(FetchTicket(2)));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
    }

    #[test]
    fn next_from_playing_pauses_then_loads() {
        let mut c = coordinator();
        ready(&mut c);
        c.play();
        let t = c.next();
        assert_eq!(c.phase(), PlaybackPhase::Loading);
        assert_eq!(c.sink().calls.last(), Some(&Call::Pause));
        c.on_track_fetched(t, ok("D", "u3"));
        assert!(c.sink().calls.contains(&Call::Load(2, "u3".into())));
    }

    #[test]
    fn late_events_for_replaced_track_are_ignored() {
        let mut c = coordinator();
        let id = ready(&mut c);
        c.play();
        let t = c.next();

        // still loading the replacement: the old track cannot advance again
        assert_eq!(c.on_audio_event(AudioEvent::Ended { id }), None);
        assert_eq!(
            c.on_audio_event(AudioEvent::LoadFailed { id, reason: "gone".into() }),
            None
        );
        assert_eq!(c.phase(), PlaybackPhase::Loading);

        c.on_track_fetched(
            t,
            Err(FetchError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(FetchError::Transport("down".into())),
            }),
        );
        assert_eq!(c.phase(), PlaybackPhase::Failed);

        let followup = c.on_audio_event(AudioEvent::PlayRejected { id, reason: "stalled".into() });
        assert_eq!(followup, None);
        assert_eq!(c.phase(), PlaybackPhase::Failed);
        assert!(c.status().unwrap().contains("press next"));
        assert_eq!(c.next(), FetchTicket(3));
    }

    #[test]
    fn toggle_on_failed_player_means_next() {
        let mut c = coordinator();
        let t = c.start().unwrap();
        c.on_track_fetched(
            t,
            Err(FetchError::ExhaustedRetries {
                attempts: 3,
                last: Box::new(FetchError::Transport("down".into())),
            }),
        );
        assert_eq!(c.phase(), PlaybackPhase::Failed);
        assert_eq!(c.toggle(), Some(FetchTicket(2)));
        assert_eq!(c.phase(), PlaybackPhase::Loading);
    }

    #[tokio::test]
    async fn three_transport_failures_leave_player_failed_until_next() {
        let clock = ManualClock::new(0);
        let policy = RetryPolicy::default();
        let mut c = coordinator();
        let ticket = c.start().unwrap();
        let mut peak = 0;

        let result = fetch_with_retry(
            &policy,
            &clock,
            || async { Err::<crate::feeds::MusicEnvelope, _>(FetchError::Transport("offline".into())) },
            crate::feeds::music::validate,
            |attempt, _| {
                c.on_fetch_retry(ticket, attempt, policy.max_attempts);
                peak = peak.max(c.retry_attempt());
            },
        )
        .await;
        c.on_track_fetched(ticket, result);

        assert_eq!(peak, 3);
        assert_eq!(c.phase(), PlaybackPhase::Failed);
        assert_eq!(c.retry_attempt(), 0);
        assert!(c.status().unwrap().contains("press next"));
        assert!(c.sink().calls.is_empty());

        // No automatic recovery; only an explicit next moves on.
        c.play();
        assert_eq!(c.phase(), PlaybackPhase::Failed);
        assert_eq!(c.next(), FetchTicket(2));
    }
}
