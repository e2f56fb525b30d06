//! Cache key construction
//!
//! Keys are `<entity>:<variant>[:<query hash>]`. Admin mutations invalidate
//! by entity prefix, e.g. `courses:`.

use sha2::{Digest, Sha256};

/// Prefix for stale fallback snapshots
pub const STALE_PREFIX: &str = "stale:";

pub const COURSES: &str = "courses:";
pub const INSTRUCTORS: &str = "instructors:";
pub const TESTIMONIALS: &str = "testimonials:";
pub const RESULTS: &str = "results:";

/// Key for a listing variant. The query string is hashed so arbitrary
/// client input never ends up verbatim in a key.
pub fn listing_key(prefix: &str, variant: &str, query: Option<&str>) -> String {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => {
            let hash = Sha256::digest(q.as_bytes());
            format!("{prefix}{variant}:{}", hex::encode(&hash[..8]))
        }
        None => format!("{prefix}{variant}"),
    }
}

/// Key for one page of a public listing. Built from parsed parameters so
/// unknown, repeated or reordered query parameters share one entry.
pub fn page_key(prefix: &str, filters: &[(&str, String)], page: u32, limit: u32) -> String {
    let mut canonical: Vec<String> = filters
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    canonical.push(format!("page={page}"));
    canonical.push(format!("limit={limit}"));
    listing_key(prefix, "list", Some(&canonical.join("&")))
}

/// Stale snapshot key for a live key
pub fn stale_key(key: &str) -> String {
    format!("{STALE_PREFIX}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_key_without_query() {
        assert_eq!(listing_key(COURSES, "list", None), "courses:list");
        assert_eq!(listing_key(COURSES, "list", Some("")), "courses:list");
    }

    #[test]
    fn test_listing_key_hashes_query() {
        let a = listing_key(RESULTS, "list", Some("page=2&limit=10"));
        let b = listing_key(RESULTS, "list", Some("page=3&limit=10"));
        assert!(a.starts_with("results:list:"));
        assert_eq!(a.len(), "results:list:".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_page_key_depends_only_on_parsed_values() {
        let first = page_key(RESULTS, &[("passed", "true".into())], 1, 20);
        assert_eq!(first, page_key(RESULTS, &[("passed", "true".into())], 1, 20));
        assert_ne!(first, page_key(RESULTS, &[("passed", "false".into())], 1, 20));
        assert_ne!(first, page_key(RESULTS, &[("passed", "true".into())], 2, 20));
        assert!(first.starts_with("results:list:"));
    }

    #[test]
    fn test_stale_key() {
        assert_eq!(stale_key("courses:list"), "stale:courses:list");
    }
}
