//! Feature availability by network tier.
//!
//! ```text
//! tier        network features              local features
//! excellent   all                           all
//! good        all                           all
//! poor        all but realtime conversation all
//! very_poor   none                          all
//! offline     none                          all
//! ```

use serde::{Deserialize, Serialize};

use crate::network::quality::NetworkTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Backend translation of a single request.
    Translation,
    TextToSpeech,
    LanguageDetection,
    /// Continuous low-latency conversation mode.
    RealtimeConversation,
    CachedTranslations,
    History,
    CachedAudioPlayback,
}

impl Feature {
    /// Whether the feature needs the backend.
    pub fn requires_network(&self) -> bool {
        matches!(
            self,
            Feature::Translation
                | Feature::TextToSpeech
                | Feature::LanguageDetection
                | Feature::RealtimeConversation
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureAvailability;

impl FeatureAvailability {
    pub fn is_available(feature: Feature, tier: NetworkTier) -> bool {
        if !feature.requires_network() {
            return true;
        }
        match tier {
            NetworkTier::Excellent | NetworkTier::Good => true,
            NetworkTier::Poor => feature != Feature::RealtimeConversation,
            NetworkTier::VeryPoor | NetworkTier::Offline => false,
        }
    }

    pub fn available_features(tier: NetworkTier) -> Vec<Feature> {
        ALL_FEATURES
            .iter()
            .copied()
            .filter(|feature| Self::is_available(*feature, tier))
            .collect()
    }
}

const ALL_FEATURES: [Feature; 7] = [
    Feature::Translation,
    Feature::TextToSpeech,
    Feature::LanguageDetection,
    Feature::RealtimeConversation,
    Feature::CachedTranslations,
    Feature::History,
    Feature::CachedAudioPlayback,
];
