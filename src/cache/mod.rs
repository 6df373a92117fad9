//! Offline fallback subsystem.
//!
//! # Data Flow
//! ```text
//! Successful backend response
//!     → translation.rs / audio.rs store (last write wins)
//!
//! Offline tier, or backend exhausted
//!     → policy.rs says the network feature is unavailable
//!     → translation.rs / audio.rs lookup
//!     → hit: served from cache; miss: *NotAvailable
//! ```

mod bounded;
pub mod audio;
pub mod policy;
pub mod translation;

pub use audio::{AudioCache, CachedAudio};
pub use policy::{Feature, FeatureAvailability};
pub use translation::{CachedTranslation, TranslationCache, TranslationOrigin};
