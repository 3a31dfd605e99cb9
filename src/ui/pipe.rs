use crate::state::{SourceStatus, Update};
use crate::ui::util::quote_line;
use std::io::Write;
use tokio::sync::mpsc;

/// Remembers what was last printed so each change is written once.
#[derive(Default)]
struct PipePrinter {
    last_quote: Option<String>,
    last_news: Option<SourceStatus>,
    last_quote_failure: Option<String>,
    last_track: Option<(String, String)>,
    last_status: Option<String>,
}

impl PipePrinter {
    fn feed(&mut self, upd: &Update) -> Vec<String> {
        let mut out = Vec::new();

        if let Some(q) = &upd.quote {
            let line = quote_line(q);
            if self.last_quote.as_ref() != Some(&line) {
                out.push(line.clone());
                self.last_quote = Some(line);
            }
        }
        match &upd.quote_status {
            SourceStatus::Failed(msg) if self.last_quote_failure.as_ref() != Some(msg) => {
                out.push(format!("[quote] {msg}"));
                self.last_quote_failure = Some(msg.clone());
            }
            SourceStatus::Ready { .. } => self.last_quote_failure = None,
            _ => {}
        }

        // Retry chatter is skipped; only the outcome of a cycle is printed.
        let news_settled = matches!(
            upd.news_status,
            SourceStatus::Ready { .. } | SourceStatus::Failed(_)
        );
        if news_settled && self.last_news.as_ref() != Some(&upd.news_status) {
            match &upd.news_status {
                SourceStatus::Failed(msg) => out.push(format!("[news] {msg}")),
                _ => out.push(format!("[news] {} sections", upd.sections.len())),
            }
            self.last_news = Some(upd.news_status.clone());
        }

        if let Some(player) = &upd.player {
            if let Some(track) = &player.track {
                let id = (track.title.clone(), track.artist.clone());
                if self.last_track.as_ref() != Some(&id) {
                    out.push(format!("♪ {} - {}", track.title, track.artist));
                    self.last_track = Some(id);
                }
            }
            if player.status != self.last_status {
                if let Some(status) = &player.status {
                    out.push(format!("[music] {status}"));
                }
                self.last_status = player.status.clone();
            }
        }
        out
    }
}

/// Prints dashboard changes to stdout, one line each, for scripting.
pub async fn display_pipe(
    mut updates: mpsc::Receiver<Update>,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut printer = PipePrinter::default();
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            upd = updates.recv() => {
                let Some(upd) = upd else { break };
                for line in printer.feed(&upd) {
                    writeln!(stdout, "{line}")?;
                }
                stdout.flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = shutdown_tx.send(()).await;
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::{NewsSection, QuotationRecord, Track};
    use crate::player::{PlaybackPhase, PlayerView};
    use std::sync::Arc;

    fn quote(content: &str) -> QuotationRecord {
        QuotationRecord {
            id: "1".into(),
            content: content.into(),
            attribution: Some("书".into()),
            creator_tag: None,
        }
    }

    #[test]
    fn prints_each_change_once() {
        let mut p = PipePrinter::default();
        let mut upd = Update {
            quote: Some(quote("静水流深")),
            ..Default::default()
        };
        assert_eq!(p.feed(&upd), vec!["『静水流深』 —— 书".to_string()]);
        assert!(p.feed(&upd).is_empty());

        upd.news_status = SourceStatus::RetryPending {
            attempt: 1,
            reason: "transport".into(),
        };
        assert!(p.feed(&upd).is_empty());

        upd.sections = Arc::new(vec![NewsSection {
            name: "知乎".into(),
            subtitle: None,
            update_time: None,
            items: vec![],
        }]);
        upd.news_status = SourceStatus::Ready { fetched_at_ms: 5 };
        assert_eq!(p.feed(&upd), vec!["[news] 1 sections".to_string()]);
    }

    #[test]
    fn prints_track_and_status() {
        let mut p = PipePrinter::default();
        let upd = Update {
            player: Some(PlayerView {
                phase: PlaybackPhase::Playing,
                track: Some(Track {
                    title: "夜曲".into(),
                    artist: "周杰伦".into(),
                    stream_url: "u".into(),
                    artwork_url: None,
                    duration_seconds: Some(200.0),
                }),
                status: Some("skipping short track (0:30)".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            p.feed(&upd),
            vec![
                "♪ 夜曲 - 周杰伦".to_string(),
                "[music] skipping short track (0:30)".to_string()
            ]
        );
        assert!(p.feed(&upd).is_empty());
    }
}
