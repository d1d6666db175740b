//! Recent text messages per (chat, sender) and the context-selection policy.

use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

static PROCUREMENT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?zakupki\.gov\.ru/epz/order/\S+")
        .expect("procurement link regex is valid")
});

/// Whether `text` contains a government procurement order link.
#[must_use]
pub fn contains_procurement_link(text: &str) -> bool {
    PROCUREMENT_LINK.is_match(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SenderId(pub i64);

/// Correlation key. Batches and context never cross keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub chat: ChatId,
    pub sender: SenderId,
}

impl BatchKey {
    #[must_use]
    pub fn new(chat: i64, sender: i64) -> Self {
        Self {
            chat: ChatId(chat),
            sender: SenderId(sender),
        }
    }
}

impl std::fmt::Display for BatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat.0, self.sender.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub key: BatchKey,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextMessage {
    #[must_use]
    pub fn new(key: BatchKey, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            text: text.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn has_procurement_link(&self) -> bool {
        contains_procurement_link(&self.text)
    }
}

/// Lookup of recent plain-text messages, supplied by the transport.
pub trait ContextSource: Send + Sync {
    /// Messages from `key` with `timestamp >= since`, oldest first.
    fn recent_text_messages(&self, key: BatchKey, since: DateTime<Utc>) -> Vec<ContextMessage>;
}

/// Pick the context for a batch opened at `opened_at`.
///
/// Only messages in `[opened_at - max_age, opened_at]` are eligible. The most
/// recent link-bearing message wins; without one, the most recent message.
#[must_use]
pub fn select_context(
    candidates: &[ContextMessage],
    key: BatchKey,
    opened_at: DateTime<Utc>,
    max_age: Duration,
) -> Option<ContextMessage> {
    let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
    let earliest = opened_at.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let eligible = || {
        candidates
            .iter()
            .filter(|m| m.key == key && m.timestamp >= earliest && m.timestamp <= opened_at)
    };

    eligible()
        .filter(|m| m.has_procurement_link())
        .max_by_key(|m| m.timestamp)
        .or_else(|| eligible().max_by_key(|m| m.timestamp))
        .cloned()
}

/// Bounded per-key ring buffer of recent text messages.
#[derive(Debug)]
pub struct RecentTextHistory {
    capacity: usize,
    max_age: chrono::Duration,
    entries: Mutex<HashMap<BatchKey, VecDeque<ContextMessage>>>,
}

impl RecentTextHistory {
    #[must_use]
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age: chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store a message, dropping the oldest beyond capacity and anything
    /// older than the max age relative to this message.
    pub fn record(&self, message: ContextMessage) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::error!("recent text history lock poisoned");
            return;
        };
        let cutoff = message
            .timestamp
            .checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let history = entries.entry(message.key).or_default();
        history.push_back(message);
        while history.len() > self.capacity {
            history.pop_front();
        }
        while history.front().is_some_and(|m| m.timestamp < cutoff) {
            history.pop_front();
        }
    }

    /// Drop keys whose newest message is older than `now - max_age`.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now
            .checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, history| {
                history.retain(|m| m.timestamp >= cutoff);
                !history.is_empty()
            });
        }
    }

    #[must_use]
    pub fn len(&self, key: BatchKey) -> usize {
        self.entries
            .lock()
            .map(|e| e.get(&key).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

impl ContextSource for RecentTextHistory {
    fn recent_text_messages(&self, key: BatchKey, since: DateTime<Utc>) -> Vec<ContextMessage> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut out: Vec<ContextMessage> = entries
            .get(&key)
            .map(|h| h.iter().filter(|m| m.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|m| m.timestamp);
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const LINK: &str = "https://zakupki.gov.ru/epz/order/notice/ea20/view/common-info.html?regNumber=0373100000125000001";
    const THIRTY_MIN: Duration = Duration::from_secs(30 * 60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::minutes(m)
    }

    fn key() -> BatchKey {
        BatchKey::new(-100, 7)
    }

    #[test]
    fn link_pattern_matches_order_links_only() {
        assert!(contains_procurement_link(&format!("смотрите {LINK} цена 1 млн")));
        assert!(contains_procurement_link("HTTP://WWW.ZAKUPKI.GOV.RU/epz/order/extendedsearch"));
        assert!(!contains_procurement_link("https://zakupki.gov.ru/epz/main/public/home.html"));
        assert!(!contains_procurement_link("zakupki.gov.ru/epz/order/x"));
        assert!(!contains_procurement_link("https://example.com/epz/order/1"));
    }

    #[test]
    fn link_bearing_message_outranks_recency() {
        let candidates = vec![
            ContextMessage::new(key(), format!("тендер {LINK}"), minutes(-25)),
            ContextMessage::new(key(), "вот документы", minutes(-2)),
        ];
        let picked = select_context(&candidates, key(), t0(), THIRTY_MIN).unwrap();
        assert_eq!(picked.timestamp, minutes(-25));
    }

    #[test]
    fn most_recent_link_wins_among_links() {
        let candidates = vec![
            ContextMessage::new(key(), format!("old {LINK}"), minutes(-20)),
            ContextMessage::new(key(), format!("new {LINK}"), minutes(-10)),
            ContextMessage::new(key(), "plain", minutes(-1)),
        ];
        let picked = select_context(&candidates, key(), t0(), THIRTY_MIN).unwrap();
        assert!(picked.text.starts_with("new"));
    }

    #[test]
    fn falls_back_to_most_recent_plain_message() {
        let candidates = vec![
            ContextMessage::new(key(), "first", minutes(-15)),
            ContextMessage::new(key(), "second", minutes(-3)),
        ];
        let picked = select_context(&candidates, key(), t0(), THIRTY_MIN).unwrap();
        assert_eq!(picked.text, "second");
    }

    #[test]
    fn messages_outside_window_are_ineligible() {
        let candidates = vec![
            ContextMessage::new(key(), format!("stale {LINK}"), minutes(-31)),
            ContextMessage::new(key(), "after the batch opened", minutes(1)),
        ];
        assert!(select_context(&candidates, key(), t0(), THIRTY_MIN).is_none());
    }

    #[test]
    fn other_senders_are_ineligible() {
        let other = BatchKey::new(-100, 8);
        let candidates = vec![ContextMessage::new(other, LINK, minutes(-5))];
        assert!(select_context(&candidates, key(), t0(), THIRTY_MIN).is_none());
    }

    #[test]
    fn history_is_bounded_per_key() {
        let history = RecentTextHistory::new(3, THIRTY_MIN);
        for i in 0..5 {
            history.record(ContextMessage::new(key(), format!("m{i}"), minutes(i)));
        }
        history.record(ContextMessage::new(BatchKey::new(-100, 9), "x", minutes(0)));

        let msgs = history.recent_text_messages(key(), minutes(-60));
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m2", "m3", "m4"]);
        assert_eq!(history.len(BatchKey::new(-100, 9)), 1);
    }

    #[test]
    fn record_drops_entries_older_than_max_age() {
        let history = RecentTextHistory::new(30, THIRTY_MIN);
        history.record(ContextMessage::new(key(), "ancient", minutes(-90)));
        history.record(ContextMessage::new(key(), "recent", minutes(-5)));
        assert_eq!(history.len(key()), 1);
    }

    #[test]
    fn lookup_respects_since() {
        let history = RecentTextHistory::new(30, THIRTY_MIN);
        history.record(ContextMessage::new(key(), "a", minutes(-20)));
        history.record(ContextMessage::new(key(), "b", minutes(-5)));
        let msgs = history.recent_text_messages(key(), minutes(-10));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].text, "b");
    }

    #[test]
    fn prune_removes_idle_keys() {
        let history = RecentTextHistory::new(30, THIRTY_MIN);
        history.record(ContextMessage::new(key(), "a", minutes(0)));
        history.prune(minutes(45));
        assert_eq!(history.len(key()), 0);
    }
}
