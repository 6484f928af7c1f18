//! Parsing of raw channel references.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::ResolutionError;
use crate::youtube::ChannelQuery;

static CHANNEL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"UC[A-Za-z0-9_-]{22}").unwrap());
static HANDLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^@([A-Za-z0-9_.-]{1,100})$").unwrap());
static NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{1,100}$").unwrap());
static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").unwrap());

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com"];

/// First path segments that are YouTube pages, not channel names.
const RESERVED_SEGMENTS: &[&str] = &[
    "watch", "playlist", "results", "feed", "shorts", "embed", "live", "hashtag", "post",
    "redirect", "account", "premium", "gaming", "music", "t", "v",
];

/// What a raw reference asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelReference {
    /// Already canonical; no API call needed.
    ChannelId(String),
    /// Needs one API lookup.
    Lookup(ChannelQuery),
    /// Free text or a `/c/` custom name. Never guessed.
    Search(String),
}

/// Find a canonical channel ID that is not part of a longer token.
pub fn find_channel_id(input: &str) -> Option<&str> {
    let is_id_char = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    CHANNEL_ID
        .find_iter(input)
        .find(|m| {
            let before = input[..m.start()].chars().next_back();
            let after = input[m.end()..].chars().next();
            !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
        })
        .map(|m| m.as_str())
}

/// Key used to collapse duplicate inputs within a run.
///
/// Inputs that parse to the same canonical ID share a key; everything else,
/// including inputs that fail to parse, is compared on its trimmed text.
/// Blank inputs have no key.
pub fn dedupe_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match parse_reference(trimmed) {
        Ok(ChannelReference::ChannelId(id)) => Some(id),
        _ => Some(trimmed.to_string()),
    }
}

/// Classify a raw reference.
pub fn parse_reference(raw: &str) -> Result<ChannelReference, ResolutionError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(ResolutionError::invalid_input("empty channel reference"));
    }
    if input.chars().any(char::is_control) {
        return Err(ResolutionError::invalid_input(
            "channel reference contains control characters",
        ));
    }

    if let Some(url) = split_url(input) {
        return parse_url(input, url);
    }

    if let Some(id) = find_channel_id(input) {
        return Ok(ChannelReference::ChannelId(id.to_string()));
    }

    if input.starts_with('@') {
        return match HANDLE.captures(input) {
            Some(caps) => Ok(ChannelReference::Lookup(ChannelQuery::Handle(
                caps[1].to_string(),
            ))),
            None => Err(ResolutionError::invalid_input(format!(
                "malformed handle '{}'",
                input
            ))),
        };
    }

    Ok(ChannelReference::Search(input.to_string()))
}

struct UrlParts<'a> {
    host: String,
    path: &'a str,
}

/// Split `input` into host and path if it looks like a URL.
fn split_url(input: &str) -> Option<UrlParts<'_>> {
    let (had_scheme, rest) = match SCHEME.find(input) {
        Some(m) => (true, &input[m.end()..]),
        None => (false, input),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let authority = authority
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let looks_like_host = host.contains('.') && !authority.starts_with('@');
    let is_url = had_scheme
        || (looks_like_host && (!path.is_empty() || YOUTUBE_HOSTS.contains(&host.as_str())));

    is_url.then_some(UrlParts { host, path })
}

fn parse_url(input: &str, url: UrlParts<'_>) -> Result<ChannelReference, ResolutionError> {
    if !YOUTUBE_HOSTS.contains(&url.host.as_str()) {
        return Err(ResolutionError::invalid_input(format!(
            "not a YouTube URL: '{}'",
            input
        )));
    }

    if let Some(id) = find_channel_id(url.path) {
        return Ok(ChannelReference::ChannelId(id.to_string()));
    }

    let path = url.path.split(['?', '#']).next().unwrap_or_default();
    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|_| {
                    ResolutionError::invalid_input(format!("bad URL encoding in '{}'", input))
                })
        })
        .collect::<Result<Vec<String>, _>>()?;

    let not_a_channel =
        || ResolutionError::invalid_input(format!("not a channel URL: '{}'", input));

    let Some(first) = segments.first() else {
        return Err(not_a_channel());
    };

    if first.starts_with('@') {
        return match HANDLE.captures(first) {
            Some(caps) => Ok(ChannelReference::Lookup(ChannelQuery::Handle(
                caps[1].to_string(),
            ))),
            None => Err(ResolutionError::invalid_input(format!(
                "malformed handle in '{}'",
                input
            ))),
        };
    }

    match (first.as_str(), segments.get(1)) {
        ("channel", _) => Err(ResolutionError::invalid_input(format!(
            "malformed channel ID in '{}'",
            input
        ))),
        ("user", Some(name)) if NAME.is_match(name) => Ok(ChannelReference::Lookup(
            ChannelQuery::Username(name.clone()),
        )),
        ("c", Some(name)) => Ok(ChannelReference::Search(name.clone())),
        ("user" | "c", _) => Err(not_a_channel()),
        (segment, _) if RESERVED_SEGMENTS.contains(&segment) => Err(not_a_channel()),
        (segment, _) if NAME.is_match(segment) => Ok(ChannelReference::Lookup(
            ChannelQuery::Handle(segment.to_string()),
        )),
        _ => Err(not_a_channel()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ErrorKind;

    const ID: &str = "UC-lHJZR3Gqxm24_Vd_AJ5Yw";

    fn handle(h: &str) -> ChannelReference {
        ChannelReference::Lookup(ChannelQuery::Handle(h.to_string()))
    }

    fn invalid(raw: &str) -> bool {
        matches!(
            parse_reference(raw),
            Err(ResolutionError { kind: ErrorKind::InvalidInput, .. })
        )
    }

    #[test]
    fn test_bare_channel_id() {
        assert_eq!(
            parse_reference(ID).unwrap(),
            ChannelReference::ChannelId(ID.to_string())
        );
        assert_eq!(
            parse_reference(&format!("  {}\n", ID)).unwrap(),
            ChannelReference::ChannelId(ID.to_string())
        );
    }

    #[test]
    fn test_channel_urls() {
        for url in [
            format!("https://youtube.com/channel/{}", ID),
            format!("https://www.youtube.com/channel/{}/videos", ID),
            format!("m.youtube.com/channel/{}?si=abc", ID),
        ] {
            assert_eq!(
                parse_reference(&url).unwrap(),
                ChannelReference::ChannelId(ID.to_string()),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_handles() {
        assert_eq!(parse_reference("@MrBeast").unwrap(), handle("MrBeast"));
        assert_eq!(
            parse_reference("https://www.youtube.com/@MrBeast").unwrap(),
            handle("MrBeast")
        );
        assert_eq!(
            parse_reference("youtube.com/@mr.beast_6000/videos").unwrap(),
            handle("mr.beast_6000")
        );
        assert_eq!(
            parse_reference("https://www.youtube.com/%40MrBeast").unwrap(),
            handle("MrBeast")
        );
        assert_eq!(
            parse_reference("https://youtube.com/mkbhd").unwrap(),
            handle("mkbhd")
        );
    }

    #[test]
    fn test_legacy_username() {
        assert_eq!(
            parse_reference("https://www.youtube.com/user/PewDiePie").unwrap(),
            ChannelReference::Lookup(ChannelQuery::Username("PewDiePie".into()))
        );
    }

    #[test]
    fn test_custom_names_and_free_text_need_search() {
        assert_eq!(
            parse_reference("https://www.youtube.com/c/LinusTechTips").unwrap(),
            ChannelReference::Search("LinusTechTips".into())
        );
        assert_eq!(
            parse_reference("Mr Beast").unwrap(),
            ChannelReference::Search("Mr Beast".into())
        );
        assert_eq!(
            parse_reference("Dr.Phil").unwrap(),
            ChannelReference::Search("Dr.Phil".into())
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(invalid(""));
        assert!(invalid("   "));
        assert!(invalid("@bad handle"));
        assert!(invalid("@"));
        assert!(invalid("https://vimeo.com/channel/foo"));
        assert!(invalid("https://youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(invalid("https://youtube.com/"));
        assert!(invalid("youtube.com"));
        assert!(invalid("https://youtube.com/channel/UCshort"));
        assert!(invalid("https://youtube.com/user/"));
        assert!(invalid("@abc\u{7}"));
    }

    #[test]
    fn test_channel_id_must_stand_alone() {
        let longer = format!("{}XYZ", ID);
        assert_eq!(find_channel_id(&longer), None);
        assert_eq!(find_channel_id(&format!("/channel/{}/", ID)), Some(ID));
        assert_eq!(find_channel_id("nothing here"), None);
    }

    #[test]
    fn test_dedupe_key() {
        assert_eq!(dedupe_key("   "), None);
        assert_eq!(dedupe_key(" @MrBeast "), Some("@MrBeast".into()));
        assert_eq!(
            dedupe_key(&format!("https://youtube.com/channel/{}", ID)),
            dedupe_key(ID)
        );
        assert_ne!(dedupe_key("@a"), dedupe_key("@A"));
    }

    #[test]
    fn test_dedupe_key_ignores_ids_in_unparseable_input() {
        let foreign = format!("https://vimeo.com/{}", ID);
        assert!(parse_reference(&foreign).is_err());
        assert_eq!(dedupe_key(&foreign), Some(foreign.clone()));
        assert_ne!(dedupe_key(&foreign), dedupe_key(ID));
    }
}
