//! Client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → api.rs ResilientApiClient (orchestration)
//!     → backend.rs Backend (one HTTP attempt)
//!     → types.rs (wire bodies, error taxonomy)
//! ```

pub mod api;
pub mod backend;
pub mod types;

pub use api::{AuthSignal, ClientBuilder, ResilientApiClient};
pub use backend::{Backend, HttpBackend, SpeechPayload};
pub use types::{
    ClientError, ClientResult, Endpoint, SpeechAudio, Translation, VoiceParams, MAX_TEXT_CHARS,
};
