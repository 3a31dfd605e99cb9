//! Background music: coordinator state machine, sink capability, MPRIS sink.

pub mod coordinator;
pub mod mpris;
pub mod sink;

pub use coordinator::{FetchTicket, MIN_DURATION, PlaybackCoordinator, PlaybackPhase, PlayerView};
pub use sink::{AudioEvent, AudioSink};
