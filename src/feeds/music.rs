use serde::{Deserialize, Serialize};

use crate::fetch::FetchError;

/// Raw body of `GET /wyMusic/{chart}?type=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct MusicEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub info: Option<RawSong>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSong {
    #[serde(default)]
    pub name: Option<String>,
    // Upstream spelling.
    #[serde(default)]
    pub auther: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pic_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub stream_url: String,
    pub artwork_url: Option<String>,
    /// Known only once the audio sink has loaded metadata.
    pub duration_seconds: Option<f64>,
}

pub fn validate(envelope: MusicEnvelope) -> Result<Track, FetchError> {
    if !envelope.success {
        return Err(FetchError::shape("music chart reported failure"));
    }
    let info = envelope
        .info
        .ok_or_else(|| FetchError::shape("music info missing"))?;
    let title = non_empty(info.name).ok_or_else(|| FetchError::shape("track name missing"))?;
    let stream_url = non_empty(info.url).ok_or_else(|| FetchError::shape("track url missing"))?;

    Ok(Track {
        title,
        artist: non_empty(info.auther).unwrap_or_default(),
        stream_url,
        artwork_url: non_empty(info.pic_url),
        duration_seconds: None,
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
