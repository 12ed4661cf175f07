//! Tolerant regex extraction over marketplace HTML.
//!
//! Attribute order, quoting and whitespace vary between page revisions, so
//! tags are matched loosely and attributes are parsed independently of
//! their position. Every extractor fails soft and returns `None`.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// Marker the marketplace shows instead of a structured timer.
pub const WAIT_SENTINEL: &str = "Подождите";

/// Cooldown assumed when only [`WAIT_SENTINEL`] is present.
pub const SENTINEL_COOLDOWN_SECS: u64 = 3600;
/// Longest advertised wait taken at face value.
pub const MAX_COOLDOWN_SECS: u64 = 999_999;

static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[A-Za-z][^>]*>").expect("tag pattern compiles"));
static INPUT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b[^>]*>").expect("input pattern compiles"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.\[\]]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("attribute pattern compiles")
});
static TEXTAREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<textarea\b([^>]*)>(.*?)</textarea>").expect("textarea pattern compiles")
});
static APP_DATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)data-app-data\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("app data pattern compiles")
});
static APP_CSRF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:csrf-token|csrfToken)"\s*:\s*"([^"]+)""#).expect("csrf pattern compiles")
});
static OFFER_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"offerEdit\?(?:[^"'\s<>]*?&(?:amp;)?)?offer=(\d+)"#)
        .expect("offer link pattern compiles")
});
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern compiles"));
static HOURS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:ч|h)").expect("hours pattern compiles"));
static MINUTES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:м|min)").expect("minutes pattern compiles"));

/// Decode HTML entities; text with entities we do not know is returned raw.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    let normalized = text.replace("&nbsp;", "\u{a0}");
    let decoded = quick_xml::escape::unescape(&normalized).map(|d| d.into_owned());
    match decoded {
        Ok(decoded) => Cow::Owned(decoded),
        Err(_) => Cow::Owned(normalized),
    }
}

/// Attributes of one tag, names lowercased, values entity-decoded.
fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(tag)
        .map(|cap| {
            let name = cap[1].to_ascii_lowercase();
            let raw = cap
                .get(2)
                .or_else(|| cap.get(3))
                .or_else(|| cap.get(4))
                .map(|m| m.as_str())
                .unwrap_or_default();
            (name, decode_entities(raw).into_owned())
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

/// True for `<input ... checked>` as well as `checked="checked"`.
fn has_boolean_attr(tag: &str, name: &str) -> bool {
    if attr(&attributes(tag), name).is_some() {
        return true;
    }
    let bare = ATTR_RE.replace_all(tag, " ");
    bare.split(|c: char| c.is_whitespace() || c == '/' || c == '>' || c == '<')
        .any(|word| word.eq_ignore_ascii_case(name))
}

fn find_input<'h>(html: &'h str, name: &str) -> Option<&'h str> {
    INPUT_TAG_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attr(&attributes(tag), "name") == Some(name))
}

/// `value` of the first `<input name="...">`.
pub fn input_value(html: &str, name: &str) -> Option<String> {
    let tag = find_input(html, name)?;
    attr(&attributes(tag), "value")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whether the named checkbox is rendered checked. Missing inputs count as
/// unchecked.
pub fn is_checked(html: &str, name: &str) -> bool {
    find_input(html, name).is_some_and(|tag| has_boolean_attr(tag, "checked"))
}

pub fn csrf_token(html: &str) -> Option<String> {
    if let Some(token) = input_value(html, "csrf_token") {
        return Some(token);
    }

    let cap = APP_DATA_RE.captures(html)?;
    let raw = cap.get(1).or_else(|| cap.get(2))?.as_str();
    let app_data = decode_entities(raw);
    APP_CSRF_RE
        .captures(&app_data)
        .map(|c| c[1].to_string())
}

/// Game id for the raise form: the `js-lot-raise` button first, then any
/// `data-game-id`, then any `data-game`.
pub fn game_id(html: &str) -> Option<String> {
    let tags: Vec<Vec<(String, String)>> = ANY_TAG_RE
        .find_iter(html)
        .map(|m| attributes(m.as_str()))
        .collect();

    let non_empty = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };

    let raise_button = tags.iter().find_map(|attrs| {
        let class = attr(attrs, "class")?;
        if class.split_whitespace().any(|c| c == "js-lot-raise") {
            attr(attrs, "data-game").and_then(non_empty)
        } else {
            None
        }
    });

    raise_button
        .or_else(|| {
            tags.iter()
                .find_map(|attrs| attr(attrs, "data-game-id").and_then(non_empty))
        })
        .or_else(|| {
            tags.iter()
                .find_map(|attrs| attr(attrs, "data-game").and_then(non_empty))
        })
}

/// Content of `<textarea name="secrets">`, entity-decoded.
pub fn secrets(html: &str) -> Option<String> {
    TEXTAREA_RE.captures_iter(html).find_map(|cap| {
        let attrs = attributes(&cap[1]);
        (attr(&attrs, "name") == Some("secrets"))
            .then(|| decode_entities(&cap[2]).into_owned())
    })
}

/// Fields of the offer edit form that a save needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfferForm {
    pub csrf_token: Option<String>,
    pub offer_id: Option<String>,
    pub node_id: Option<String>,
    pub secrets: Option<String>,
    pub active: bool,
    pub auto_delivery: bool,
}

pub fn offer_form(html: &str) -> OfferForm {
    OfferForm {
        csrf_token: csrf_token(html),
        offer_id: input_value(html, "offer_id"),
        node_id: input_value(html, "node_id"),
        secrets: secrets(html),
        active: is_checked(html, "active"),
        auto_delivery: is_checked(html, "auto_delivery"),
    }
}

/// Offer ids linked from a listing page, in page order without repeats.
pub fn offer_links(html: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in OFFER_LINK_RE.captures_iter(html) {
        let id = cap[1].to_string();
        if !seen.contains(&id) {
            seen.push(id);
        }
    }
    seen
}

/// Human label of an offer, from its summary field or the page title.
pub fn offer_name(html: &str) -> Option<String> {
    input_value(html, "fields[summary][ru]")
        .or_else(|| input_value(html, "fields[summary][en]"))
        .or_else(|| {
            TITLE_RE
                .captures(html)
                .map(|c| decode_entities(c[1].trim()).trim().to_string())
                .filter(|t| !t.is_empty())
        })
}

pub fn contains_wait_sentinel(text: &str) -> bool {
    text.contains(WAIT_SENTINEL)
}

/// Seconds to wait parsed from a natural-language cooldown such as
/// `Подождите 1ч 30м` or `wait 2 h 5 min`.
pub fn cooldown_seconds(text: &str) -> Option<u64> {
    let number = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c[1].parse::<u64>().ok())
    };
    let hours = number(&HOURS_RE);
    let minutes = number(&MINUTES_RE);

    if hours.is_some() || minutes.is_some() {
        let total = hours
            .unwrap_or(0)
            .saturating_mul(3600)
            .saturating_add(minutes.unwrap_or(0).saturating_mul(60));
        if total > 0 {
            return Some(total.min(MAX_COOLDOWN_SECS));
        }
    }

    contains_wait_sentinel(text).then_some(SENTINEL_COOLDOWN_SECS)
}
