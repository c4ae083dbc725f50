//! Helpers for media URLs handed out by the content server.

use url::Url;

/// Query parameters the server uses when it hides an attachment behind its
/// image proxy.
const ATTACHMENT_QUERY_KEYS: &[&str] = &["lltools-img", "attachment_id"];
const ATTACHMENT_PATH_SEGMENT: &str = "lltools-img";

/// What an image URL actually points at, for deciding whether two answer
/// cards would show the same picture.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ImageIdentity {
    Attachment(u64),
    Url(String),
}

pub fn image_identity(raw: &str) -> Option<ImageIdentity> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let Ok(mut parsed) = Url::parse(raw) else {
        // Relative or otherwise unparsable: compare the text without its fragment.
        let without_fragment = raw.split('#').next().unwrap_or(raw);
        return Some(ImageIdentity::Url(without_fragment.to_string()));
    };

    if let Some(id) = attachment_id(&parsed) {
        return Some(ImageIdentity::Attachment(id));
    }

    parsed.set_fragment(None);
    Some(ImageIdentity::Url(parsed.to_string()))
}

fn attachment_id(url: &Url) -> Option<u64> {
    let from_query = url
        .query_pairs()
        .find(|(key, _)| ATTACHMENT_QUERY_KEYS.contains(&key.as_ref()))
        .and_then(|(_, value)| value.parse::<u64>().ok());
    if from_query.is_some() {
        return from_query;
    }

    let mut segments = url.path_segments()?;
    segments
        .by_ref()
        .find(|segment| *segment == ATTACHMENT_PATH_SEGMENT)?;
    segments.next()?.parse::<u64>().ok()
}

/// Rewrite `raw` onto the page's own scheme and port when it points at the
/// page's host, so same-host assets don't trip mixed-content or CORS checks
/// when the server hands out `http://` links to an `https://` page.
pub fn normalize_same_host(raw: &str, page_origin: Option<&Url>) -> String {
    let Some(page_origin) = page_origin else {
        return raw.to_string();
    };
    let Ok(mut parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    if parsed.host_str() != page_origin.host_str() {
        return raw.to_string();
    }
    if parsed.scheme() != page_origin.scheme() && parsed.set_scheme(page_origin.scheme()).is_err()
    {
        return raw.to_string();
    }
    if parsed.set_port(page_origin.port()).is_err() {
        return raw.to_string();
    }
    parsed.to_string()
}

/// Whether an audio URL is missing or a stand-in that should never be played.
pub fn is_placeholder_audio(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "#" || trimmed.eq_ignore_ascii_case("about:blank") {
        return true;
    }
    let path = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name
        .split('.')
        .next()
        .is_some_and(|stem| stem.eq_ignore_ascii_case("placeholder"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_identity_from_query() {
        assert_eq!(
            image_identity("https://example.org/wp-admin/admin-ajax.php?action=img&lltools-img=55"),
            Some(ImageIdentity::Attachment(55))
        );
        assert_eq!(
            image_identity("https://cdn.example.org/proxy?attachment_id=55&size=large"),
            Some(ImageIdentity::Attachment(55))
        );
    }

    #[test]
    fn test_attachment_identity_from_path() {
        assert_eq!(
            image_identity("https://example.org/lltools-img/91/thumb"),
            Some(ImageIdentity::Attachment(91))
        );
    }

    #[test]
    fn test_plain_url_ignores_fragment() {
        assert_eq!(
            image_identity("https://example.org/cat.jpg#v2"),
            image_identity("https://example.org/cat.jpg")
        );
        assert_eq!(
            image_identity("/uploads/cat.jpg#x"),
            Some(ImageIdentity::Url("/uploads/cat.jpg".into()))
        );
        assert_eq!(image_identity("  "), None);
    }

    #[test]
    fn test_normalize_same_host_rewrites_scheme() {
        let page = Url::parse("https://example.org").unwrap();
        assert_eq!(
            normalize_same_host("http://example.org/audio/cat.mp3", Some(&page)),
            "https://example.org/audio/cat.mp3"
        );
        assert_eq!(
            normalize_same_host("http://other.org/audio/cat.mp3", Some(&page)),
            "http://other.org/audio/cat.mp3"
        );
        assert_eq!(
            normalize_same_host("http://example.org/a.mp3", None),
            "http://example.org/a.mp3"
        );
    }

    #[test]
    fn test_placeholder_audio() {
        assert!(is_placeholder_audio(""));
        assert!(is_placeholder_audio("#"));
        assert!(is_placeholder_audio("https://example.org/assets/placeholder.mp3?v=1"));
        assert!(!is_placeholder_audio("https://example.org/audio/cat.mp3"));
    }
}
