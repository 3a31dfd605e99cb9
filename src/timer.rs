use std::time::Instant;

/// Estimates the playback position between reports from the audio sink.
///
/// The sink only reports position every few hundred milliseconds; in between,
/// a playing track advances with wall time from the last known anchor.
#[derive(Debug, PartialEq, Default, Clone)]
pub struct PlaybackTimer {
    /// Last known position in seconds.
    anchor_position: f64,
    /// When `anchor_position` was observed; `None` while not running.
    anchor_instant: Option<Instant>,
}

impl PlaybackTimer {
    /// Back to the start with the clock stopped.
    pub fn reset(&mut self) {
        self.anchor_position = 0.0;
        self.anchor_instant = None;
    }

    /// Re-anchors on an observed position, keeping the running flag as is.
    pub fn set_position(&mut self, position: f64) {
        self.anchor_position = sanitize_position(position);
        if self.anchor_instant.is_some() {
            self.anchor_instant = Some(Instant::now());
        }
    }

    pub fn mark_playing(&mut self) {
        self.anchor_instant = Some(Instant::now());
    }

    /// Folds the elapsed run time into the anchor and stops the clock.
    pub fn mark_paused(&mut self) {
        self.anchor_position = self.estimate(None);
        self.anchor_instant = None;
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.anchor_instant.is_some()
    }

    /// Current position, optionally clamped to the track length.
    pub fn estimate(&self, duration: Option<f64>) -> f64 {
        let mut val = self.anchor_position;
        if let Some(inst) = self.anchor_instant {
            let advanced = val + inst.elapsed().as_secs_f64();
            if advanced.is_finite() {
                val = advanced;
            }
        }
        match duration {
            Some(d) if d.is_finite() && d > 0.0 => val.min(d),
            _ => val,
        }
    }
}

pub fn sanitize_position(p: f64) -> f64 {
    if !p.is_finite() || p < 0.0 { 0.0 } else { p }
}

/// `m:ss`, minutes unbounded. Negative and non-finite input prints as `0:00`.
pub fn format_time(secs: f64) -> String {
    let total = sanitize_position(secs).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
