//! Telegram HTML rendering and message splitting for summaries.

/// Maximum characters per outgoing message, below Telegram's 4096 cap to
/// leave room for markup.
pub const MESSAGE_LIMIT: usize = 3900;

/// Lines starting with one of these (case-insensitive, after list markers)
/// are rendered as bold headings.
const HEADING_PREFIXES: &[&str] = &[
    "файл",
    "кратко о закупке",
    "тип закупки",
    "тип процедуры",
    "территориальность",
    "unit-экономика",
    "unit экономика",
    "требования к исполнителю",
    "контактные данные заказчика",
    "контактные данные",
    "основные требования",
    "документы/условия участия",
    "ключевые сроки",
    "деньги/гарантии",
    "риски и что уточнить",
    "не обработаны файлы",
];

/// Escape text for Telegram `HTML` parse mode.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[must_use]
pub fn is_summary_heading(line: &str) -> bool {
    let normalized = line.trim().to_lowercase();
    HEADING_PREFIXES.iter().any(|p| normalized.starts_with(p))
}

/// Bold the known headings and escape everything else. Blank lines are kept.
#[must_use]
pub fn format_summary_html(text: &str) -> String {
    let mut lines = Vec::new();
    for raw in text.lines() {
        let stripped = raw.trim();
        if stripped.is_empty() {
            lines.push(String::new());
            continue;
        }

        let cleaned = stripped.trim_start_matches(['-', '•', ' ']).trim();
        if !is_summary_heading(cleaned) {
            lines.push(escape_html(stripped));
            continue;
        }

        let (heading, tail) = match cleaned.split_once(':') {
            Some((head, tail)) => (format!("{}:", head.trim()), tail.trim()),
            None => (cleaned.to_owned(), ""),
        };
        let heading = format!("<b>{}</b>", escape_html(&heading));
        if tail.is_empty() {
            lines.push(heading);
        } else {
            lines.push(format!("{heading} {}", escape_html(tail)));
        }
    }
    lines.join("\n").trim().to_owned()
}

/// Split `text` into messages of at most `limit` characters.
///
/// Lines are kept whole where possible; a single line longer than `limit` is
/// cut without splitting an HTML entity or tag.
#[must_use]
pub fn split_for_telegram(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= limit {
        return vec![text.to_owned()];
    }

    let mut parts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line = line.trim();
        let len = line.chars().count();

        if len > limit {
            flush(&mut parts, &mut current);
            current_len = 0;
            parts.extend(hard_split(line, limit));
            continue;
        }

        let candidate = if current.is_empty() {
            len
        } else {
            current_len + 1 + len
        };
        if candidate > limit {
            flush(&mut parts, &mut current);
            current_len = len;
        } else {
            current_len = candidate;
        }
        current.push(line);
    }
    flush(&mut parts, &mut current);

    parts.retain(|p| !p.is_empty());
    parts
}

fn flush(parts: &mut Vec<String>, current: &mut Vec<&str>) {
    if !current.is_empty() {
        parts.push(current.join("\n").trim().to_owned());
        current.clear();
    }
}

fn hard_split(line: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            end = safe_cut(&chars, start, end);
        }
        out.push(chars[start..end].iter().collect());
        start = end;
    }
    out
}

/// Move `end` back to before an unterminated `&...;` or `<...>` so markup
/// never straddles two messages.
fn safe_cut(chars: &[char], start: usize, end: usize) -> usize {
    for i in (start..end).rev() {
        match chars[i] {
            ';' | '>' => return end,
            '&' | '<' if i > start => return i,
            _ => {}
        }
        if end - i > 16 {
            break;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn headings_are_bold_and_tails_escaped() {
        let out = format_summary_html("Кратко о закупке: вывоз <ТКО> & мусора");
        assert_eq!(out, "<b>Кратко о закупке:</b> вывоз &lt;ТКО&gt; &amp; мусора");
    }

    #[test]
    fn list_markers_are_stripped_from_headings_only() {
        let out = format_summary_html("- Ключевые сроки:\n- подача до 01.04\n• Риски и что уточнить");
        assert_eq!(
            out,
            "<b>Ключевые сроки:</b>\n- подача до 01.04\n<b>Риски и что уточнить</b>"
        );
    }

    #[test]
    fn heading_match_is_case_insensitive() {
        assert!(is_summary_heading("UNIT-экономика: 500 руб/м3"));
        assert!(is_summary_heading("  тип процедуры: аукцион"));
        assert!(!is_summary_heading("Цена за тонну: 1000"));
    }

    #[test]
    fn blank_lines_survive_formatting() {
        let out = format_summary_html("Файл: a.docx\n\nОсновные требования:\nСРО");
        assert_eq!(out, "<b>Файл:</b> a.docx\n\n<b>Основные требования:</b>\nСРО");
    }

    #[test]
    fn quotes_are_escaped() {
        assert_eq!(escape_html(r#"ООО "Ромашка" 'x'"#), "ООО &quot;Ромашка&quot; &#x27;x&#x27;");
    }

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_for_telegram("  hello \n", 10), ["hello"]);
        assert!(split_for_telegram("   ", 10).is_empty());
    }

    #[test]
    fn splits_on_line_boundaries() {
        let parts = split_for_telegram("aaaa\nbbbb\ncccc", 9);
        assert_eq!(parts, ["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn long_line_is_hard_split() {
        let parts = split_for_telegram("ab\nxxxxxxxxxxxxxxxxxxxxxxxxx\ncd", 10);
        assert_eq!(parts, ["ab", "xxxxxxxxxx", "xxxxxxxxxx", "xxxxx", "cd"]);
    }

    #[test]
    fn hard_split_keeps_entities_whole() {
        let line = format!("{}&amp;tail", "x".repeat(8));
        let parts = split_for_telegram(&format!("start\n{line}"), 10);
        assert_eq!(parts, ["start", "xxxxxxxx", "&amp;tail"]);
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        let text = "я".repeat(3900);
        assert_eq!(split_for_telegram(&text, MESSAGE_LIMIT).len(), 1);
    }

    proptest! {
        #[test]
        fn parts_respect_limit_and_keep_content(
            lines in proptest::collection::vec("[a-zа-я ]{0,40}", 0..40),
            limit in 5usize..60,
        ) {
            let text = lines.join("\n");
            let parts = split_for_telegram(&text, limit);
            prop_assert!(parts.iter().all(|p| p.chars().count() <= limit));
            prop_assert!(parts.iter().all(|p| !p.is_empty()));

            let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            prop_assert_eq!(squash(&parts.concat()), squash(&text));
        }
    }
}
