//! URL path canonicalization.
//!
//! Every url entering the dispatch loop (and every redirect target) goes
//! through [`normalize_url`] before matching. The canonical form:
//!
//! - is percent-decoded, with `%`, `?` and `#` re-escaped so that a second
//!   pass is a no-op
//! - has `.` / `..` segments resolved and can never climb above `/`
//! - has no control characters (`0x00`-`0x1F`), even when they were encoded
//! - uses `/` as the only separator (`\` is treated as a separator too)
//!
//! Malformed escapes (`%` not followed by two hex digits) are rejected with
//! [`Error::Normalization`], which the dispatcher answers with a 400.

use crate::errors::Error;

/// Canonicalize a url path (no query string).
pub fn normalize(path: &str) -> Result<String, Error> {
    check_escapes(path)?;

    let decoded = urlencoding::decode_binary(path.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);
    let cleaned: String = decoded.chars().filter(|c| (*c as u32) >= 0x20).collect();

    let mut segments: Vec<&str> = Vec::new();
    for segment in cleaned.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let trailing_slash = cleaned.ends_with('/') && !segments.is_empty();

    let mut normalized = String::with_capacity(cleaned.len() + 1);
    for segment in &segments {
        normalized.push('/');
        escape_into(segment, &mut normalized);
    }
    if normalized.is_empty() || trailing_slash {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Canonicalize a full request target: the path is normalized, the query
/// string is kept verbatim and any fragment is dropped.
pub fn normalize_url(url: &str) -> Result<String, Error> {
    let without_fragment = url.split_once('#').map_or(url, |(before, _)| before);
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };

    let mut normalized = normalize(path).map_err(|_| Error::Normalization {
        url: url.to_string(),
    })?;
    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    Ok(normalized)
}

/// Turn a canonical path back into the literal file-system relative path.
pub fn to_file_path(normalized: &str) -> String {
    normalized
        .trim_start_matches('/')
        .replace("%3F", "?")
        .replace("%23", "#")
        .replace("%25", "%")
}

fn check_escapes(path: &str) -> Result<(), Error> {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(Error::Normalization {
                    url: path.to_string(),
                });
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}

fn escape_into(segment: &str, out: &mut String) {
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3F"),
            '#' => out.push_str("%23"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_bad_request(result: Result<String, Error>) -> bool {
        matches!(result, Err(Error::Normalization { .. }))
    }

    #[test]
    fn test_parent_segments_cannot_escape_root() {
        assert_eq!(normalize("/../file.txt").unwrap(), "/file.txt");
        assert_eq!(normalize("/../../../etc/passwd").unwrap(), "/etc/passwd");
        assert_eq!(normalize("/a/b/../../c").unwrap(), "/c");
    }

    #[test]
    fn test_encoded_dots_are_resolved() {
        assert_eq!(normalize("/test/%2E%2E/file.txt").unwrap(), "/file.txt");
        assert_eq!(normalize("/test/%2e/file.txt").unwrap(), "/test/file.txt");
    }

    #[test]
    fn test_control_characters_are_stripped() {
        assert_eq!(normalize("/file%00.txt").unwrap(), "/file.txt");
        assert_eq!(normalize("/fi%0Ale%1F.txt").unwrap(), "/file.txt");
    }

    #[test]
    fn test_malformed_escapes_are_rejected() {
        assert!(is_bad_request(normalize("/file%0.txt")));
        assert!(is_bad_request(normalize("/file%-.txt")));
        assert!(is_bad_request(normalize("/file%%.txt")));
        assert!(is_bad_request(normalize("/file%")));
        assert!(is_bad_request(normalize("/file%4")));
    }

    #[test]
    fn test_backslash_is_a_separator() {
        assert_eq!(normalize("/a\\..\\..\\secret").unwrap(), "/secret");
    }

    #[test]
    fn test_trailing_slash_and_root() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("/docs/").unwrap(), "/docs/");
        assert_eq!(normalize("//a///b").unwrap(), "/a/b");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "/../file.txt",
            "/test/%2E%2E/file.txt",
            "/file%00.txt",
            "/100%25/done",
            "/what%3F/x",
            "/hash%23tag",
            "/docs/./guide/",
            "/caf%C3%A9",
            "/a\\b",
        ];
        for input in inputs {
            let once = normalize(input).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_utf8_is_decoded() {
        assert_eq!(normalize("/caf%C3%A9").unwrap(), "/café");
    }

    #[test]
    fn test_normalize_url_keeps_query() {
        assert_eq!(
            normalize_url("/a/../b?x=%2E%2E&y=1").unwrap(),
            "/b?x=%2E%2E&y=1"
        );
        assert_eq!(normalize_url("/a#section").unwrap(), "/a");
        assert!(is_bad_request(normalize_url("/bad%zz?q=1")));
    }

    #[test]
    fn test_to_file_path() {
        assert_eq!(to_file_path("/100%25/what%3F"), "100%/what?");
        assert_eq!(to_file_path("/"), "");
    }
}
