//! Collaborator contracts for the platform speech engines.
//!
//! The core never talks to a concrete text-to-speech or speech-to-text
//! implementation. Platform adapters implement these capability traits and
//! are injected at construction time; completion flows back through narrow
//! callback records.

pub mod level;

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Opaque synthesis parameters forwarded to the engine adapter.
#[derive(Debug, Clone, Default)]
pub struct SpeakParams {
    /// Requested utterance id. Collisions with a pending id are resolved
    /// by suffixing a disambiguator, so the effective id is the one the
    /// coordinator returns, not necessarily this one.
    pub utterance_id: Option<String>,
    /// Voice identifier, engine-specific.
    pub voice: Option<String>,
    /// Playback rate multiplier.
    pub rate: Option<f32>,
}

/// What an utterance plays: spoken text or timed silence.
#[derive(Debug, Clone)]
pub enum UtteranceContent {
    /// Text to synthesize.
    Text(String),
    /// Silence of the given duration.
    Silence(Duration),
}

/// Text-to-speech capability driven by the queue coordinator.
///
/// Calls start work and return; progress is reported back through the
/// coordinator's [`SynthesisEventSink`](crate::queue::SynthesisEventSink),
/// keyed by utterance id.
pub trait SynthesisEngine: Send + Sync {
    /// Speak `text`, reporting progress under `utterance_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the utterance cannot be dispatched at all;
    /// failures after dispatch arrive through the event sink.
    fn speak(&self, text: &str, utterance_id: &str, params: &SpeakParams) -> Result<()>;

    /// Play silence for `duration`, reporting progress under `utterance_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the utterance cannot be dispatched.
    fn play_silence(&self, duration: Duration, utterance_id: &str) -> Result<()>;

    /// Stop the active utterance, if any.
    fn stop(&self);
}

/// Callback record for one listening turn. All fields optional.
#[derive(Clone, Default)]
pub struct ListenCallbacks {
    /// The recognizer is ready for speech.
    pub on_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Running input amplitude (RMS), fed to the sound-level classifier.
    pub on_rms: Option<Arc<dyn Fn(f32) + Send + Sync>>,
    /// Partial (streaming) recognition alternatives with optional scores.
    pub on_partial_results: Option<Arc<dyn Fn(&[String], Option<&[f32]>) + Send + Sync>>,
    /// Final recognition alternatives with optional scores.
    pub on_results: Option<Arc<dyn Fn(&[String], Option<&[f32]>) + Send + Sync>>,
    /// The listening session failed.
    pub on_error: Option<Arc<dyn Fn(RecognitionError) + Send + Sync>>,
}

/// Speech-to-text capability driven by the conversation engine.
pub trait RecognitionEngine: Send + Sync {
    /// Begin a listening session delivering events to `callbacks`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be started.
    fn start_listening(&self, callbacks: ListenCallbacks) -> Result<()>;

    /// End the session gracefully, delivering any final results.
    fn stop(&self);

    /// Abort the session without delivering results.
    fn cancel(&self);
}

/// Recognition failure codes surfaced by engine adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionError {
    /// Nothing recognizable was heard.
    NoMatch,
    /// The engine gave up waiting for speech.
    SpeechTimeout,
    /// Network transport failure.
    Network,
    /// Audio hardware failure.
    Audio,
    /// The engine was busy with another client.
    Busy,
    /// Engine-specific failure carrying the native code.
    Other(i32),
}

impl RecognitionError {
    /// Transport faults are retried silently without consuming the
    /// mismatch budget.
    pub fn is_transport(self) -> bool {
        matches!(self, Self::Network | Self::Audio | Self::Busy)
    }
}

/// Audio routing gate consulted before any speak or listen.
///
/// Peripheral setups (e.g. Bluetooth SCO) implement this to defer audio
/// work until the route is established. A disconnect mid-session is
/// surfaced to the engine as a forced shutdown.
pub trait AudioRoutingGate: Send + Sync {
    /// Invoke `on_routed` once the audio path is established.
    fn ensure_routed(&self, on_routed: Box<dyn FnOnce() + Send>);
}

/// Routing gate for setups with no peripheral routing: always connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAudioRoute;

impl AudioRoutingGate for DirectAudioRoute {
    fn ensure_routed(&self, on_routed: Box<dyn FnOnce() + Send>) {
        on_routed();
    }
}
