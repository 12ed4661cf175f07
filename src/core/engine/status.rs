use regex::Regex;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));

/// Make a status message safe to show: no markup, single-line, at most
/// `limit` characters.
pub fn sanitize(message: &str, limit: usize) -> String {
    let without_tags = TAG_RE.replace_all(message, " ");
    let collapsed = without_tags.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, limit)
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_collapses_whitespace() {
        assert_eq!(
            sanitize("<b>Подождите</b>\n  1ч <i>30м</i>", 150),
            "Подождите 1ч 30м"
        );
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "✅".repeat(200);
        let out = sanitize(&long, 100);
        assert_eq!(out.chars().count(), 100);
        assert!(out.chars().all(|c| c == '✅'));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(sanitize("checked", 100), "checked");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("abcd", 3), "abc");
    }
}
