//! Text helpers shared by both front-ends.

use crate::feeds::QuotationRecord;
use ratatui::text::Span;
use unicode_segmentation::UnicodeSegmentation;

/// Display width in terminal columns (CJK counts double).
pub fn display_width(text: &str) -> usize {
    Span::raw(text).width()
}

/// Cuts `text` to at most `max_cols` columns on grapheme boundaries,
/// ending in `…` when anything was dropped.
pub fn truncate(text: &str, max_cols: usize) -> String {
    if display_width(text) <= max_cols {
        return text.to_string();
    }
    if max_cols == 0 {
        return String::new();
    }
    let budget = max_cols - 1;
    let mut out = String::new();
    let mut used = 0;
    for g in text.graphemes(true) {
        let w = display_width(g);
        if used + w > budget {
            break;
        }
        out.push_str(g);
        used += w;
    }
    out.push('…');
    out
}

pub fn wrap(text: &str, width: usize) -> Vec<String> {
    textwrap::wrap(text, width.max(1))
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

/// `『content』 —— attribution · creator`; either credit may be missing.
pub fn quote_line(quote: &QuotationRecord) -> String {
    let from = quote.attribution.as_deref().filter(|s| !s.is_empty());
    let by = quote.creator_tag.as_deref().filter(|s| !s.is_empty());
    let credit = match (from, by) {
        (Some(from), Some(by)) => format!("{from} · {by}"),
        (Some(one), None) | (None, Some(one)) => one.to_string(),
        (None, None) => return format!("『{}』", quote.content),
    };
    format!("『{}』 —— {}", quote.content, credit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_wide_text_by_columns() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 6), "hello…");
        // each ideograph is two columns wide
        assert_eq!(truncate("微博热搜榜", 5), "微博…");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn quote_line_credits_attribution_and_creator() {
        let mut q = QuotationRecord {
            id: "1".into(),
            content: "山高水长".into(),
            attribution: Some("古文".into()),
            creator_tag: None,
        };
        assert_eq!(quote_line(&q), "『山高水长』 —— 古文");
        q.creator_tag = Some("阿青".into());
        assert_eq!(quote_line(&q), "『山高水长』 —— 古文 · 阿青");
        q.attribution = None;
        assert_eq!(quote_line(&q), "『山高水长』 —— 阿青");
        q.creator_tag = Some(String::new());
        assert_eq!(quote_line(&q), "『山高水长』");
    }

    #[test]
    fn wrap_never_returns_overlong_lines() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| display_width(l) <= 10));
    }
}
