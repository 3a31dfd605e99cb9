//! The audio element as seen by the coordinator.

use std::time::Duration;

/// Identity of one source assignment. Every `load` gets a fresh id and every
/// event names the id it belongs to.
pub type LoadId = u64;

/// Asynchronous outcomes reported by a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    MetadataLoaded { id: LoadId, duration: Duration },
    Started { id: LoadId },
    PlayRejected { id: LoadId, reason: String },
    LoadFailed { id: LoadId, reason: String },
    Ended { id: LoadId },
    Position { id: LoadId, position: Duration },
}

impl AudioEvent {
    pub fn id(&self) -> LoadId {
        match self {
            AudioEvent::MetadataLoaded { id, .. }
            | AudioEvent::Started { id }
            | AudioEvent::PlayRejected { id, .. }
            | AudioEvent::LoadFailed { id, .. }
            | AudioEvent::Ended { id }
            | AudioEvent::Position { id, .. } => *id,
        }
    }
}

/// Commands are fire-and-forget; results come back as [`AudioEvent`]s.
pub trait AudioSink: Send {
    /// Replaces whatever source is attached.
    fn load(&mut self, id: LoadId, url: &str);
    fn play(&mut self, id: LoadId);
    fn pause(&mut self);
    fn seek(&mut self, position: Duration);
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn load(&mut self, id: LoadId, url: &str) {
        (**self).load(id, url)
    }
    fn play(&mut self, id: LoadId) {
        (**self).play(id)
    }
    fn pause(&mut self) {
        (**self).pause()
    }
    fn seek(&mut self, position: Duration) {
        (**self).seek(position)
    }
}
