//! Unique-key derivation for requests
//!
//! The unique key is the de-duplication identity of a request across all
//! request sources. By default it is a normalized form of the URL; when two
//! requests to the same URL must be kept distinct (different method or
//! payload), an extended key derived from a digest of method + URL + payload
//! is used instead.

use crate::request::HttpMethod;
use sha2::{Digest, Sha256};
use url::Url;

/// Computes the default unique key for a URL
///
/// Normalization rules:
/// - scheme and host are lowercased (the `url` crate already guarantees this)
/// - the fragment is stripped
/// - query pairs are sorted by key, then value
/// - a trailing slash is trimmed from non-root paths
///
/// Two URLs that differ only in these aspects map to the same key and are
/// treated as the same unit of work.
pub fn normalized_unique_key(url: &Url) -> String {
    let mut normalized = String::new();
    normalized.push_str(url.scheme());
    normalized.push_str("://");

    if let Some(host) = url.host_str() {
        normalized.push_str(host);
    }
    if let Some(port) = url.port() {
        normalized.push(':');
        normalized.push_str(&port.to_string());
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        normalized.push_str(path.trim_end_matches('/'));
    } else {
        normalized.push_str(path);
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        normalized.push('?');
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                normalized.push('&');
            }
            normalized.push_str(key);
            if !value.is_empty() {
                normalized.push('=');
                normalized.push_str(value);
            }
        }
    }

    normalized
}

/// Computes an extended unique key from method, URL, and payload
///
/// Returns a hex-encoded SHA-256 digest prefixed with the method, so that
/// e.g. a POST and a GET to the same URL never collide in the queue.
pub fn extended_unique_key(method: HttpMethod, url: &Url, payload: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_unique_key(url).as_bytes());
    hasher.update(b"|");
    if let Some(payload) = payload {
        hasher.update(payload);
    }
    format!("{}|{}", method.as_str(), hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_fragment_is_stripped() {
        let a = normalized_unique_key(&parse("https://example.com/page#top"));
        let b = normalized_unique_key(&parse("https://example.com/page#bottom"));
        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/page");
    }

    #[test]
    fn test_host_case_insensitive() {
        let a = normalized_unique_key(&parse("https://EXAMPLE.com/Page"));
        let b = normalized_unique_key(&parse("https://example.com/Page"));
        assert_eq!(a, b);
        // Path case is preserved
        assert_eq!(a, "https://example.com/Page");
    }

    #[test]
    fn test_query_pairs_sorted() {
        let a = normalized_unique_key(&parse("https://example.com/search?b=2&a=1"));
        let b = normalized_unique_key(&parse("https://example.com/search?a=1&b=2"));
        assert_eq!(a, b);
        assert_eq!(a, "https://example.com/search?a=1&b=2");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let a = normalized_unique_key(&parse("https://example.com/docs/"));
        let b = normalized_unique_key(&parse("https://example.com/docs"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_root_slash_kept() {
        let key = normalized_unique_key(&parse("https://example.com/"));
        assert_eq!(key, "https://example.com/");
    }

    #[test]
    fn test_non_default_port_kept() {
        let key = normalized_unique_key(&parse("http://example.com:8080/x"));
        assert_eq!(key, "http://example.com:8080/x");
    }

    #[test]
    fn test_extended_key_distinguishes_method() {
        let url = parse("https://example.com/api");
        let get = extended_unique_key(HttpMethod::Get, &url, None);
        let post = extended_unique_key(HttpMethod::Post, &url, None);
        assert_ne!(get, post);
        assert!(get.starts_with("GET|"));
        assert!(post.starts_with("POST|"));
    }

    #[test]
    fn test_extended_key_distinguishes_payload() {
        let url = parse("https://example.com/api");
        let a = extended_unique_key(HttpMethod::Post, &url, Some(b"a=1"));
        let b = extended_unique_key(HttpMethod::Post, &url, Some(b"a=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_extended_key_stable() {
        let url = parse("https://example.com/api");
        let a = extended_unique_key(HttpMethod::Post, &url, Some(b"a=1"));
        let b = extended_unique_key(HttpMethod::Post, &url, Some(b"a=1"));
        assert_eq!(a, b);
    }
}
