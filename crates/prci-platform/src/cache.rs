//! URL+validator response cache (spec.md §4.5).
//!
//! Every GET is conditional (`Cache-Control: no-cache` forces the platform
//! to revalidate against the ETag rather than skip validation). A cache
//! hit on a 304 does not consume rate budget. Writes must evict the cached
//! list-of-statuses for the written commit so the next read observes the
//! write -- this coupling is deliberate (spec.md §9).

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub etag: String,
    pub body: Vec<u8>,
}

/// A concurrent, URL-keyed cache of conditional-GET responses.
#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<CachedResponse> {
        self.entries.get(url).map(|entry| entry.clone())
    }

    pub fn put(&self, url: impl Into<String>, response: CachedResponse) {
        self.entries.insert(url.into(), response);
    }

    /// Evict every cached entry whose URL contains `commit` -- the
    /// list-of-statuses endpoint for a commit is keyed by URLs that embed
    /// the commit SHA, so this is a coarse but correct invalidation.
    pub fn evict_commit(&self, commit: &str) {
        self.entries.retain(|url, _| !url.contains(commit));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get_round_trips() {
        let cache = ResponseCache::new();
        cache.put(
            "https://api.github.com/repos/acme/widgets/commits/abc/status",
            CachedResponse {
                etag: "W/\"abc\"".to_string(),
                body: b"{}".to_vec(),
            },
        );
        let got = cache
            .get("https://api.github.com/repos/acme/widgets/commits/abc/status")
            .unwrap();
        assert_eq!(got.etag, "W/\"abc\"");
    }

    #[test]
    fn evict_commit_removes_matching_urls_only() {
        let cache = ResponseCache::new();
        cache.put(
            "https://api.github.com/repos/acme/widgets/commits/abc/status",
            CachedResponse { etag: "e1".to_string(), body: vec![] },
        );
        cache.put(
            "https://api.github.com/repos/acme/widgets/commits/def/status",
            CachedResponse { etag: "e2".to_string(), body: vec![] },
        );

        cache.evict_commit("abc");

        assert!(cache.get("https://api.github.com/repos/acme/widgets/commits/abc/status").is_none());
        assert!(cache.get("https://api.github.com/repos/acme/widgets/commits/def/status").is_some());
    }

    #[test]
    fn starts_empty() {
        let cache = ResponseCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
    }
}
