//! Translation cache and persistence.
//!
//! Entries are keyed by a SHA-256 digest of `(text, source, target)`.
//! Lookups are exact; a miss is a normal outcome.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::bounded::{BoundedMap, SharedMap};
use crate::observability::metrics;

/// Where a translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationOrigin {
    Api,
    OfflineModel,
}

/// A stored translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTranslation {
    pub source_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub translation: String,
    pub confidence: f32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub origin: TranslationOrigin,
}

impl CachedTranslation {
    pub fn new(
        source_text: &str,
        source_lang: &str,
        target_lang: &str,
        translation: &str,
        confidence: f32,
        origin: TranslationOrigin,
    ) -> Self {
        Self {
            source_text: source_text.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            translation: translation.to_string(),
            confidence,
            timestamp: unix_now(),
            origin,
        }
    }

    pub fn key(&self) -> String {
        cache_key(&[&self.source_text, &self.source_lang, &self.target_lang])
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Hex SHA-256 over length-prefixed fields, so `("ab", "c")` and
/// `("a", "bc")` never collide.
pub(crate) fn cache_key(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Thread-safe translation cache.
#[derive(Clone, Debug)]
pub struct TranslationCache {
    inner: SharedMap<CachedTranslation>,
}

impl TranslationCache {
    /// Create an empty cache holding at most `max_entries` translations.
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(BoundedMap::new(max_entries)),
        }
    }

    pub fn lookup(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<CachedTranslation> {
        let hit = self.inner.get(&cache_key(&[text, source_lang, target_lang]));
        metrics::record_cache_lookup("translation", hit.is_some());
        hit
    }

    /// Store `entry`, replacing any previous entry for the same key.
    pub fn store(&self, entry: CachedTranslation) {
        let evicted = self.inner.insert(entry.key(), entry);
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted oldest translations");
        }
        metrics::record_cache_size("translation", self.inner.len());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn clear(&self) {
        self.inner.clear();
        metrics::record_cache_size("translation", 0);
    }

    /// History of cached translations, oldest first.
    pub fn history(&self) -> Vec<CachedTranslation> {
        self.inner.values_in_order()
    }

    /// Load entries written by [`save_to_file`](Self::save_to_file). A
    /// missing file yields an empty cache.
    pub fn load_from_file(path: &Path, max_entries: Option<usize>) -> std::io::Result<Self> {
        let cache = Self::new(max_entries);
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let entries: Vec<CachedTranslation> = serde_json::from_reader(reader)?;
            for entry in entries {
                cache.inner.insert(entry.key(), entry);
            }
            metrics::record_cache_size("translation", cache.len());
            tracing::info!(entries = cache.len(), path = %path.display(), "Loaded translation cache");
        }
        Ok(cache)
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let entries = self.history();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &entries)?;
        tracing::info!(entries = entries.len(), path = %path.display(), "Saved translation cache");
        Ok(())
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(None)
    }
}
