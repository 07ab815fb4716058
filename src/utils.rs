use chrono::Utc;
use url::Url;

/// Strips the fragment (`#...`) from a URL string, per the tab driver's
/// `should_visit` step 1. Falls back to the input unchanged if it doesn't
/// parse as a URL at all.
pub fn strip_fragment(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.to_string(),
    }
}

/// Compiles a scope set (§3) from a list of regex patterns. An empty set
/// means "everything in scope".
pub fn compile_scopes(patterns: &[String]) -> crate::Result<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| regex::Regex::new(p).map_err(crate::OrchestratorError::from))
        .collect()
}

/// A URL is in scope iff the scope set is empty or some pattern matches it.
pub fn in_scope(url: &str, scopes: &[regex::Regex]) -> bool {
    scopes.is_empty() || scopes.iter().any(|re| re.is_match(url))
}

/// WARC-style capture timestamp (`YYYYMMDDHHMMSS`, UTC) stamped on every
/// directly-recorded page (§4.2 step 3's `add_page(url, title, ts, browser)`).
pub fn warc_timestamp_now() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fragment() {
        assert_eq!(
            strip_fragment("https://example.org/a#section"),
            "https://example.org/a"
        );
        assert_eq!(strip_fragment("https://example.org/a"), "https://example.org/a");
    }

    #[test]
    fn test_strip_fragment_non_url_passthrough() {
        assert_eq!(strip_fragment("not a url"), "not a url");
    }

    #[test]
    fn test_in_scope_empty_is_everything() {
        let scopes = compile_scopes(&[]).unwrap();
        assert!(in_scope("https://anything.test/", &scopes));
    }

    #[test]
    fn test_in_scope_matching() {
        let scopes = compile_scopes(&[r"^https?://example\.org/".to_string()]).unwrap();
        assert!(in_scope("https://example.org/a", &scopes));
        assert!(!in_scope("https://other.test/", &scopes));
    }

    #[test]
    fn test_warc_timestamp_now_is_fourteen_digits() {
        let ts = warc_timestamp_now();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }
}
