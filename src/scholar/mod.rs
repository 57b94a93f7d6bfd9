//! Bibliographic author source: name normalization, publication-title
//! filtering, and a disk-cached HTTP client. Fetch failures are values
//! ([`FetchOutcome::Failed`]), never panics or propagated errors, so one
//! bad scholar cannot take down an analysis run.

use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::fs as tokio_fs;
use tracing::{error, info, warn};

/// Titles with fewer whitespace-delimited tokens than this are dropped.
pub const MIN_TITLE_WORDS: usize = 3;
/// Surviving titles are truncated to this many characters.
pub const MAX_TITLE_CHARS: usize = 1000;

const DEFAULT_API_URL: &str = "https://scholar-proxy.invalid/api";

/// One scholar as consumed by the scoring step.
#[derive(Debug, Clone)]
pub struct AuthorRecord {
    pub display_name: String,
    pub sort_key: String,
    pub publication_texts: Vec<String>,
}

impl AuthorRecord {
    pub fn new(raw_name: &str, publication_texts: Vec<String>) -> Self {
        let (display_name, sort_key) = clean_author_name(raw_name);
        Self {
            display_name,
            sort_key,
            publication_texts,
        }
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Author {
        name: String,
        publication_titles: Vec<String>,
    },
    Failed {
        scholar_id: String,
        cause: String,
    },
}

#[async_trait]
pub trait ScholarSource: Send + Sync {
    async fn fetch(&self, scholar_id: &str) -> FetchOutcome;
}

/// Strips decorations from a raw author name.
///
/// Keeps the segment before the first `-`, en-dash or parenthesis and derives
/// the sort key from its last whitespace token. Empty input maps to
/// `("Unknown", "Unknown")`; a segment that cannot be used falls back to the
/// raw input for both fields. Never fails.
pub fn clean_author_name(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ("Unknown".to_string(), "Unknown".to_string());
    }

    let display = trimmed
        .split(['-', '–', '(', ')'])
        .next()
        .unwrap_or(trimmed)
        .trim();

    let Some(sort_key) = display.split_whitespace().next_back() else {
        return (raw.to_string(), raw.to_string());
    };

    (display.to_string(), sort_key.to_string())
}

/// Drops empty and too-short titles, truncates the rest.
pub fn filter_titles<I>(titles: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    titles
        .into_iter()
        .filter(|title| title.split_whitespace().count() >= MIN_TITLE_WORDS)
        .map(|title| {
            if title.chars().count() > MAX_TITLE_CHARS {
                title.chars().take(MAX_TITLE_CHARS).collect()
            } else {
                title
            }
        })
        .collect()
}

// Raw payload shape shared by the remote API and the disk cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAuthor {
    name: String,
    #[serde(default)]
    publications: Vec<CachedPublication>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPublication {
    title: String,
}

/// HTTP source with a write-once-per-key JSON cache. The raw payload is
/// cached; title filtering is applied on every read so filter changes do not
/// require invalidating the cache.
#[derive(Clone)]
pub struct HttpScholarSource {
    http: Client,
    base_url: String,
    cache_dir: PathBuf,
}

impl HttpScholarSource {
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Reads `SCHOLAR_API_URL` for the remote endpoint.
    pub fn from_env(cache_dir: impl Into<PathBuf>) -> Self {
        let base_url = env::var("SCHOLAR_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Self::new(base_url, cache_dir)
    }

    fn cache_path(&self, scholar_id: &str) -> PathBuf {
        // Cache key sanitized for the filesystem; scholar ids are opaque.
        let safe: String = scholar_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
            .collect();
        self.cache_dir.join(format!("cache_{safe}.json"))
    }

    async fn load_cached(&self, scholar_id: &str) -> Option<CachedAuthor> {
        let path = self.cache_path(scholar_id);
        let bytes = tokio_fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(author) => Some(author),
            Err(err) => {
                warn!(?err, path = %path.display(), "scholar cache entry is corrupt, refetching");
                None
            }
        }
    }

    async fn store_cache(&self, scholar_id: &str, author: &CachedAuthor) {
        let path = self.cache_path(scholar_id);
        let result: Result<()> = async {
            tokio_fs::create_dir_all(&self.cache_dir)
                .await
                .with_context(|| {
                    format!("failed to create cache dir {}", self.cache_dir.display())
                })?;
            let payload = serde_json::to_vec_pretty(author).context("failed to encode cache entry")?;
            tokio_fs::write(&path, payload)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(())
        }
        .await;

        // A cache write failure only costs a refetch next time.
        if let Err(err) = result {
            warn!(?err, %scholar_id, "failed to cache scholar data");
        }
    }

    async fn fetch_remote(&self, scholar_id: &str) -> Result<CachedAuthor> {
        let url = format!("{}/authors/{scholar_id}", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("scholar source returned {status} for {scholar_id}");
        }

        response
            .json::<CachedAuthor>()
            .await
            .with_context(|| format!("failed to decode author payload for {scholar_id}"))
    }
}

#[async_trait]
impl ScholarSource for HttpScholarSource {
    async fn fetch(&self, scholar_id: &str) -> FetchOutcome {
        let author = if let Some(cached) = self.load_cached(scholar_id).await {
            info!(%scholar_id, "using cached scholar data");
            cached
        } else {
            match self.fetch_remote(scholar_id).await {
                Ok(author) => {
                    self.store_cache(scholar_id, &author).await;
                    author
                }
                Err(err) => {
                    error!(?err, %scholar_id, "scholar fetch failed");
                    return FetchOutcome::Failed {
                        scholar_id: scholar_id.to_string(),
                        cause: format!("{err:#}"),
                    };
                }
            }
        };

        FetchOutcome::Author {
            name: author.name,
            publication_titles: filter_titles(
                author.publications.into_iter().map(|pub_entry| pub_entry.title),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Unreachable endpoint: any network attempt fails fast.
    const DEAD_URL: &str = "http://127.0.0.1:1/api";

    #[test]
    fn strips_decorations_and_derives_last_name() {
        assert_eq!(
            clean_author_name("Jane A. Doe - دکتر جین"),
            ("Jane A. Doe".to_string(), "Doe".to_string())
        );
        assert_eq!(
            clean_author_name("Alan Aardvark (emeritus)"),
            ("Alan Aardvark".to_string(), "Aardvark".to_string())
        );
        assert_eq!(
            clean_author_name("Grace Hopper"),
            ("Grace Hopper".to_string(), "Hopper".to_string())
        );
    }

    #[test]
    fn empty_name_maps_to_unknown() {
        assert_eq!(
            clean_author_name(""),
            ("Unknown".to_string(), "Unknown".to_string())
        );
        assert_eq!(
            clean_author_name("   "),
            ("Unknown".to_string(), "Unknown".to_string())
        );
    }

    #[test]
    fn unusable_segment_falls_back_to_raw_input() {
        assert_eq!(
            clean_author_name("- دکتر جین"),
            ("- دکتر جین".to_string(), "- دکتر جین".to_string())
        );
    }

    #[test]
    fn short_and_empty_titles_are_dropped() {
        let titles = vec![
            String::new(),
            "Two words".to_string(),
            "A proper paper title".to_string(),
        ];
        assert_eq!(filter_titles(titles), vec!["A proper paper title"]);
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let long = "word ".repeat(400);
        let filtered = filter_titles(vec![long]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chars().count(), MAX_TITLE_CHARS);

        let multibyte = format!("étude de cas {}", "é".repeat(2000));
        let filtered = filter_titles(vec![multibyte]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chars().count(), MAX_TITLE_CHARS);
    }

    #[tokio::test]
    async fn cache_hit_avoids_the_network() {
        let dir = tempdir().expect("temp dir");
        let source = HttpScholarSource::new(DEAD_URL, dir.path());

        let cached = CachedAuthor {
            name: "Jane Doe - Prof".to_string(),
            publications: vec![
                CachedPublication {
                    title: "A proper paper title".to_string(),
                },
                CachedPublication {
                    title: "short".to_string(),
                },
            ],
        };
        std::fs::write(
            source.cache_path("abc123"),
            serde_json::to_vec(&cached).unwrap(),
        )
        .expect("seed cache");

        match source.fetch("abc123").await {
            FetchOutcome::Author {
                name,
                publication_titles,
            } => {
                assert_eq!(name, "Jane Doe - Prof");
                assert_eq!(publication_titles, vec!["A proper paper title"]);
            }
            FetchOutcome::Failed { cause, .. } => panic!("expected cache hit, got: {cause}"),
        }
    }

    #[tokio::test]
    async fn cache_miss_with_unreachable_source_is_a_failed_outcome() {
        let dir = tempdir().expect("temp dir");
        let source = HttpScholarSource::new(DEAD_URL, dir.path());

        match source.fetch("missing").await {
            FetchOutcome::Failed { scholar_id, cause } => {
                assert_eq!(scholar_id, "missing");
                assert!(!cause.is_empty());
            }
            FetchOutcome::Author { .. } => panic!("expected a failed outcome"),
        }
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_treated_as_a_miss() {
        let dir = tempdir().expect("temp dir");
        let source = HttpScholarSource::new(DEAD_URL, dir.path());

        std::fs::write(source.cache_path("bad"), b"not json").expect("seed cache");

        assert!(matches!(
            source.fetch("bad").await,
            FetchOutcome::Failed { .. }
        ));
    }
}
