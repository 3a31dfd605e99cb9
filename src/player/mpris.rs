//! An external MPRIS media player used as the audio element.
//!
//! [`MprisSink`] only queues commands. A worker task owns the D-Bus side:
//! it executes the commands against `org.mpris.MediaPlayer2.Player`, polls
//! the player while a source is attached and turns what it sees into
//! [`AudioEvent`]s tagged with the [`LoadId`] of that source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use zbus::{Proxy, proxy};
use zvariant::OwnedValue;

use crate::player::sink::{AudioEvent, AudioSink, LoadId};

const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_IFACE: &str = "org.mpris.MediaPlayer2.Player";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during MPRIS operations
#[derive(thiserror::Error, Debug)]
pub enum MprisError {
    #[error("D-Bus error: {0}")]
    ZBus(#[from] zbus::Error),
    #[error("Failed to establish D-Bus connection")]
    NoConnection,
}

/// Global D-Bus connection singleton
static DBUS_CONNECTION: OnceCell<Arc<zbus::Connection>> = OnceCell::const_new();

pub async fn get_dbus_conn() -> Result<Arc<zbus::Connection>, MprisError> {
    DBUS_CONNECTION
        .get_or_try_init(|| async {
            let conn = zbus::Connection::session()
                .await
                .map_err(|_| MprisError::NoConnection)?;
            Ok(Arc::new(conn))
        })
        .await
        .cloned()
}

/// Proxy interface for playerctld to get active MPRIS players
#[proxy(
    interface = "com.github.altdesktop.playerctld",
    default_service = "org.mpris.MediaPlayer2.playerctld",
    default_path = "/org/mpris/MediaPlayer2"
)]
trait Playerctld {
    #[zbus(property)]
    fn player_names(&self) -> zbus::Result<Vec<String>>;
}

/// Active player bus names as reported by playerctld, most recent first.
/// Empty when playerctld is not running.
pub async fn get_active_player_names() -> Result<Vec<String>, MprisError> {
    let conn = get_dbus_conn().await?;
    match PlayerctldProxy::new(&conn).await {
        Ok(proxy) => proxy.player_names().await.or(Ok(Vec::new())),
        Err(_) => Ok(Vec::new()),
    }
}

/// Case-insensitive substring match against the blocklist.
pub fn is_blocked(service: &str, block_list: &[String]) -> bool {
    let service_lower = service.to_lowercase();
    block_list
        .iter()
        .any(|blocked| service_lower.contains(&blocked.to_lowercase()))
}

/// First non-blocked player, skipping playerctld's own proxy name.
pub fn pick_player(names: &[String], block_list: &[String]) -> Option<String> {
    names
        .iter()
        .filter(|n| !n.ends_with(".playerctld"))
        .find(|n| !is_blocked(n, block_list))
        .cloned()
}

// ============================================================================
// D-Bus calls
// ============================================================================

async fn player_proxy<'a>(conn: &zbus::Connection, service: &'a str) -> Result<Proxy<'a>, MprisError> {
    Ok(Proxy::new(conn, service, MPRIS_PATH, PLAYER_IFACE).await?)
}

/// Targeted `Properties.Get` to avoid triggering GetAll on some players.
async fn get_property(service: &str, name: &str) -> Result<Option<OwnedValue>, MprisError> {
    let conn = get_dbus_conn().await?;
    let props = Proxy::new(&conn, service, MPRIS_PATH, "org.freedesktop.DBus.Properties").await?;
    let reply = props.call_method("Get", &(PLAYER_IFACE, name)).await?;
    Ok(reply.body().deserialize::<OwnedValue>().ok())
}

fn micros_to_secs(val: &OwnedValue) -> Option<f64> {
    if let Ok(i) = TryInto::<i64>::try_into(val.clone()) {
        return Some(i as f64 / 1_000_000.0);
    }
    if let Ok(u) = TryInto::<u64>::try_into(val.clone()) {
        return Some(u as f64 / 1_000_000.0);
    }
    None
}

pub async fn get_position(service: &str) -> Result<f64, MprisError> {
    Ok(get_property(service, "Position")
        .await?
        .as_ref()
        .and_then(micros_to_secs)
        .unwrap_or(0.0))
}

pub async fn get_playback_status(service: &str) -> Result<String, MprisError> {
    Ok(get_property(service, "PlaybackStatus")
        .await?
        .and_then(|v| TryInto::<String>::try_into(v).ok())
        .unwrap_or_else(|| "Stopped".to_string()))
}

/// `mpris:length` of the loaded item, once the player knows it.
pub async fn get_length(service: &str) -> Result<Option<f64>, MprisError> {
    let Some(val) = get_property(service, "Metadata").await? else {
        return Ok(None);
    };
    let Ok(map) = TryInto::<HashMap<String, OwnedValue>>::try_into(val) else {
        return Ok(None);
    };
    Ok(map
        .get("mpris:length")
        .and_then(micros_to_secs)
        .filter(|len| *len > 0.0))
}

async fn open_uri(service: &str, url: &str) -> Result<(), MprisError> {
    let conn = get_dbus_conn().await?;
    let proxy = player_proxy(&conn, service).await?;
    proxy.call_method("OpenUri", &(url,)).await?;
    // Players tend to start on OpenUri; playback waits for an explicit play.
    proxy.call_method("Pause", &()).await?;
    Ok(())
}

async fn call_simple(service: &str, method: &'static str) -> Result<(), MprisError> {
    let conn = get_dbus_conn().await?;
    let proxy = player_proxy(&conn, service).await?;
    proxy.call_method(method, &()).await?;
    Ok(())
}

/// MPRIS `Seek` is relative, so the offset is computed from the player's
/// own idea of where it is.
async fn seek_to(service: &str, target: Duration) -> Result<(), MprisError> {
    let here = get_position(service).await?;
    let mut offset = ((target.as_secs_f64() - here) * 1_000_000.0).round();
    if !offset.is_finite() {
        offset = 0.0;
    }
    let conn = get_dbus_conn().await?;
    let proxy = player_proxy(&conn, service).await?;
    proxy.call_method("Seek", &(offset as i64,)).await?;
    Ok(())
}

// ============================================================================
// Sink + worker
// ============================================================================

#[derive(Debug)]
enum SinkCommand {
    Load(LoadId, String),
    Play(LoadId),
    Pause,
    Seek(Duration),
}

pub struct MprisSink {
    cmd_tx: mpsc::UnboundedSender<SinkCommand>,
}

impl MprisSink {
    /// Starts the worker for `service`; events are delivered on `events`.
    pub fn spawn(service: String, events: mpsc::Sender<AudioEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(service, cmd_rx, events));
        Self { cmd_tx }
    }

    fn send(&self, cmd: SinkCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!("MPRIS worker is gone, dropping command");
        }
    }
}

impl AudioSink for MprisSink {
    fn load(&mut self, id: LoadId, url: &str) {
        self.send(SinkCommand::Load(id, url.to_string()));
    }
    fn play(&mut self, id: LoadId) {
        self.send(SinkCommand::Play(id));
    }
    fn pause(&mut self) {
        self.send(SinkCommand::Pause);
    }
    fn seek(&mut self, position: Duration) {
        self.send(SinkCommand::Seek(position));
    }
}

/// The source currently attached to the player.
struct Attached {
    id: LoadId,
    awaiting_metadata_since: Option<Instant>,
    started: bool,
    last_status: String,
}

async fn run_worker(
    service: String,
    mut cmd_rx: mpsc::UnboundedReceiver<SinkCommand>,
    events: mpsc::Sender<AudioEvent>,
) {
    let mut attached: Option<Attached> = None;
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                handle_command(&service, cmd, &mut attached, &events).await;
            }
            _ = poll.tick() => {
                if let Some(a) = attached.as_mut() {
                    poll_player(&service, a, &events).await;
                }
            }
        }
    }
    tracing::debug!(service = %service, "MPRIS worker stopped");
}

async fn handle_command(
    service: &str,
    cmd: SinkCommand,
    attached: &mut Option<Attached>,
    events: &mpsc::Sender<AudioEvent>,
) {
    match cmd {
        SinkCommand::Load(id, url) => match open_uri(service, &url).await {
            Ok(()) => {
                *attached = Some(Attached {
                    id,
                    awaiting_metadata_since: Some(Instant::now()),
                    started: false,
                    last_status: String::new(),
                });
            }
            Err(e) => {
                *attached = None;
                let _ = events
                    .send(AudioEvent::LoadFailed { id, reason: e.to_string() })
                    .await;
            }
        },
        SinkCommand::Play(id) => {
            let Some(a) = attached.as_mut().filter(|a| a.id == id) else {
                return;
            };
            let event = match call_simple(service, "Play").await {
                Ok(()) => {
                    a.started = true;
                    AudioEvent::Started { id }
                }
                Err(e) => AudioEvent::PlayRejected { id, reason: e.to_string() },
            };
            let _ = events.send(event).await;
        }
        SinkCommand::Pause => {
            if let Err(e) = call_simple(service, "Pause").await {
                tracing::warn!(error = %e, "MPRIS pause failed");
            }
        }
        SinkCommand::Seek(target) => {
            if let Err(e) = seek_to(service, target).await {
                tracing::warn!(error = %e, "MPRIS seek failed");
            }
        }
    }
}

async fn poll_player(service: &str, a: &mut Attached, events: &mpsc::Sender<AudioEvent>) {
    if let Some(since) = a.awaiting_metadata_since {
        match get_length(service).await {
            Ok(Some(len)) => {
                a.awaiting_metadata_since = None;
                let _ = events
                    .send(AudioEvent::MetadataLoaded {
                        id: a.id,
                        duration: Duration::from_secs_f64(len),
                    })
                    .await;
            }
            Ok(None) | Err(_) if since.elapsed() >= METADATA_TIMEOUT => {
                a.awaiting_metadata_since = None;
                let _ = events
                    .send(AudioEvent::LoadFailed {
                        id: a.id,
                        reason: "player reported no duration".to_string(),
                    })
                    .await;
            }
            _ => {}
        }
        return;
    }

    if !a.started {
        return;
    }
    let status = get_playback_status(service).await.unwrap_or_default();
    if let Ok(pos) = get_position(service).await {
        let _ = events
            .send(AudioEvent::Position {
                id: a.id,
                position: Duration::from_secs_f64(crate::timer::sanitize_position(pos)),
            })
            .await;
    }
    if status == "Stopped" && a.last_status == "Playing" {
        a.started = false;
        let _ = events.send(AudioEvent::Ended { id: a.id }).await;
    }
    a.last_status = status;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_is_case_insensitive_substring() {
        let block = vec!["Spotify".to_string()];
        assert!(is_blocked("org.mpris.MediaPlayer2.spotify", &block));
        assert!(!is_blocked("org.mpris.MediaPlayer2.mpv", &block));
    }

    #[test]
    fn pick_player_skips_blocked_and_playerctld() {
        let names = vec![
            "org.mpris.MediaPlayer2.playerctld".to_string(),
            "org.mpris.MediaPlayer2.firefox.instance_1".to_string(),
            "org.mpris.MediaPlayer2.mpv".to_string(),
        ];
        let block = vec!["firefox".to_string()];
        assert_eq!(
            pick_player(&names, &block).as_deref(),
            Some("org.mpris.MediaPlayer2.mpv")
        );
        assert_eq!(pick_player(&names[..2], &block), None);
    }
}
