use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fetch::FetchError;

/// Raw body of `GET /ian/rand?type=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<RawQuote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawQuote {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationRecord {
    pub id: String,
    pub content: String,
    pub attribution: Option<String>,
    pub creator_tag: Option<String>,
}

pub fn validate(envelope: QuoteEnvelope) -> Result<QuotationRecord, FetchError> {
    if !envelope.success {
        return Err(FetchError::shape("quotation reported failure"));
    }
    let raw = envelope
        .data
        .ok_or_else(|| FetchError::shape("quotation payload missing"))?;
    let content = raw
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| FetchError::shape("quotation content missing"))?;

    let id = match raw.id {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    // Observed payloads name the source either `form` or `from`.
    let attribution = raw.form.or(raw.from).filter(|s| !s.trim().is_empty());
    let creator_tag = raw.creator.filter(|s| !s.trim().is_empty());

    Ok(QuotationRecord {
        id,
        content,
        attribution,
        creator_tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> QuoteEnvelope {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn normalizes_form_variant() {
        let q = validate(envelope(
            r#"{"success":true,"type":"json","data":{"id":91,"content":" 人生如逆旅 ","form":"临江仙","creator":"苏轼"}}"#,
        ))
        .unwrap();
        assert_eq!(
            q,
            QuotationRecord {
                id: "91".into(),
                content: "人生如逆旅".into(),
                attribution: Some("临江仙".into()),
                creator_tag: Some("苏轼".into()),
            }
        );
    }

    #[test]
    fn normalizes_from_variant_without_creator() {
        let q = validate(envelope(
            r#"{"success":true,"data":{"id":"x1","content":"hello","from":"somewhere"}}"#,
        ))
        .unwrap();
        assert_eq!(q.id, "x1");
        assert_eq!(q.attribution.as_deref(), Some("somewhere"));
        assert_eq!(q.creator_tag, None);
    }

    #[test]
    fn rejects_missing_content_and_failure() {
        assert!(validate(envelope(r#"{"success":true,"data":{"id":1,"content":""}}"#)).is_err());
        assert!(validate(envelope(r#"{"success":true}"#)).is_err());
        assert!(validate(envelope(r#"{"success":false,"data":{"content":"x"}}"#)).is_err());
    }
}
