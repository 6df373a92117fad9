//! Cache of synthesized speech, keyed by text, language and voice.

use std::sync::Arc;

use crate::cache::bounded::{BoundedMap, SharedMap};
use crate::cache::translation::{cache_key, unix_now};
use crate::client::types::VoiceParams;
use crate::observability::metrics;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAudio {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Clone, Debug)]
pub struct AudioCache {
    inner: SharedMap<CachedAudio>,
}

impl AudioCache {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(BoundedMap::new(max_entries)),
        }
    }

    pub fn lookup(&self, text: &str, lang: &str, voice: &VoiceParams) -> Option<CachedAudio> {
        let hit = self.inner.get(&key(text, lang, voice));
        metrics::record_cache_lookup("audio", hit.is_some());
        hit
    }

    pub fn store(&self, text: &str, lang: &str, voice: &VoiceParams, bytes: &[u8], content_type: &str) {
        let entry = CachedAudio {
            bytes: Arc::from(bytes),
            content_type: content_type.to_string(),
            timestamp: unix_now(),
        };
        self.inner.insert(key(text, lang, voice), entry);
        metrics::record_cache_size("audio", self.inner.len());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

impl Default for AudioCache {
    fn default() -> Self {
        Self::new(None)
    }
}

fn key(text: &str, lang: &str, voice: &VoiceParams) -> String {
    cache_key(&[text, lang, &voice.cache_id()])
}
