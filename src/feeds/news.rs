use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fetch::FetchError;

/// Raw body of `GET /hotlist/all`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewsEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSection {
    pub name: String,
    pub subtitle: Option<String>,
    pub update_time: Option<String>,
    pub items: Vec<NewsItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    /// Upstream sends either a number or a preformatted string ("123万").
    pub hot_score: Option<String>,
    pub rank: Option<u32>,
    pub category: Option<String>,
}

#[derive(Deserialize)]
struct RawSection {
    name: String,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    update_time: Option<String>,
    #[serde(default)]
    data: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    title: String,
    url: String,
    #[serde(default)]
    hot: Option<Value>,
    #[serde(default)]
    index: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Accepts the body only when `success` is set and `data` is an array of
/// well-formed sections.
pub fn validate(envelope: NewsEnvelope) -> Result<Vec<NewsSection>, FetchError> {
    if !envelope.success {
        let msg = envelope
            .message
            .unwrap_or_else(|| "hotlist reported failure".to_string());
        return Err(FetchError::Shape(msg));
    }
    let Value::Array(raw) = envelope.data else {
        return Err(FetchError::shape("hotlist data is not an array"));
    };
    raw.into_iter()
        .enumerate()
        .map(|(i, v)| {
            serde_json::from_value::<RawSection>(v)
                .map(RawSection::into_section)
                .map_err(|e| FetchError::Shape(format!("hotlist section {i}: {e}")))
        })
        .collect()
}

impl RawSection {
    fn into_section(self) -> NewsSection {
        NewsSection {
            name: self.name,
            subtitle: self.subtitle.filter(|s| !s.is_empty()),
            update_time: self.update_time.filter(|s| !s.is_empty()),
            items: self.data.into_iter().map(RawItem::into_item).collect(),
        }
    }
}

impl RawItem {
    fn into_item(self) -> NewsItem {
        NewsItem {
            title: self.title,
            url: self.url,
            hot_score: self.hot.and_then(scalar_text),
            rank: self.index.and_then(|v| match v {
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }),
            category: self.kind.filter(|s| !s.is_empty()),
        }
    }
}

fn scalar_text(v: Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
