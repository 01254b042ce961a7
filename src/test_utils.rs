//! Scripted speech engines shared by unit and integration tests.
//!
//! Deterministic and synchronous: tests drive completion explicitly, or
//! enable auto-complete to have utterances finish inside `speak`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{DialogueError, Result};
use crate::queue::SynthesisEventSink;
use crate::speech::{
    AudioRoutingGate, ListenCallbacks, RecognitionEngine, RecognitionError, SpeakParams,
    SynthesisEngine,
};

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Synthesis double recording every dispatched utterance.
pub struct ScriptedSynth {
    sink: Mutex<Option<SynthesisEventSink>>,
    auto_complete: AtomicBool,
    fail_next: AtomicBool,
    spoken: Mutex<Vec<String>>,
    pending: Mutex<VecDeque<String>>,
    stops: AtomicUsize,
}

impl ScriptedSynth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            auto_complete: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
            spoken: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            stops: AtomicUsize::new(0),
        })
    }

    /// Wire the coordinator's event sink so completions can be reported.
    pub fn attach_sink(&self, sink: SynthesisEventSink) {
        *relock(&self.sink) = Some(sink);
    }

    /// When enabled, utterances start and finish inside `speak`.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// Make the next dispatch fail synchronously.
    pub fn fail_next_dispatch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Texts in dispatch order; silence renders as `<silence Nms>`.
    pub fn spoken(&self) -> Vec<String> {
        relock(&self.spoken).clone()
    }

    /// Utterances dispatched but not yet completed.
    pub fn pending_count(&self) -> usize {
        relock(&self.pending).len()
    }

    /// Complete the oldest pending utterance.
    pub fn finish_next(&self) {
        let id = relock(&self.pending).pop_front();
        let sink = relock(&self.sink).clone();
        if let (Some(id), Some(sink)) = (id, sink) {
            sink.on_start(&id);
            sink.on_done(&id);
        }
    }

    /// Fail the oldest pending utterance with an engine code.
    pub fn fail_next_pending(&self, code: i32) {
        let id = relock(&self.pending).pop_front();
        let sink = relock(&self.sink).clone();
        if let (Some(id), Some(sink)) = (id, sink) {
            sink.on_error(&id, code);
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn record(&self, rendered: String, id: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DialogueError::Synthesis("scripted dispatch failure".into()));
        }
        relock(&self.spoken).push(rendered);
        if self.auto_complete.load(Ordering::SeqCst) {
            let sink = relock(&self.sink).clone();
            if let Some(sink) = sink {
                sink.on_start(id);
                sink.on_done(id);
            }
        } else {
            relock(&self.pending).push_back(id.to_owned());
        }
        Ok(())
    }
}

impl SynthesisEngine for ScriptedSynth {
    fn speak(&self, text: &str, utterance_id: &str, _params: &SpeakParams) -> Result<()> {
        self.record(text.to_owned(), utterance_id)
    }

    fn play_silence(&self, duration: Duration, utterance_id: &str) -> Result<()> {
        self.record(
            format!("<silence {}ms>", duration.as_millis()),
            utterance_id,
        )
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognition double: tests emit ready/rms/result/error events into the
/// most recent listening session's callbacks.
pub struct ScriptedRecognizer {
    active: Mutex<Option<ListenCallbacks>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    cancels: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Callbacks are cloned out before invocation, so a handler that
    /// starts a new session does not deadlock the double.
    fn callbacks(&self) -> Option<ListenCallbacks> {
        relock(&self.active).clone()
    }

    pub fn emit_ready(&self) {
        if let Some(hook) = self.callbacks().and_then(|c| c.on_ready) {
            hook();
        }
    }

    pub fn emit_rms(&self, rms: f32) {
        if let Some(hook) = self.callbacks().and_then(|c| c.on_rms) {
            hook(rms);
        }
    }

    pub fn emit_partial(&self, candidates: &[&str], confidences: Option<&[f32]>) {
        if let Some(hook) = self.callbacks().and_then(|c| c.on_partial_results) {
            let owned: Vec<String> = candidates.iter().map(|s| (*s).to_owned()).collect();
            hook(&owned, confidences);
        }
    }

    pub fn emit_results(&self, candidates: &[&str], confidences: Option<&[f32]>) {
        if let Some(hook) = self.callbacks().and_then(|c| c.on_results) {
            let owned: Vec<String> = candidates.iter().map(|s| (*s).to_owned()).collect();
            hook(&owned, confidences);
        }
    }

    pub fn emit_error(&self, err: RecognitionError) {
        if let Some(hook) = self.callbacks().and_then(|c| c.on_error) {
            hook(err);
        }
    }
}

impl RecognitionEngine for ScriptedRecognizer {
    fn start_listening(&self, callbacks: ListenCallbacks) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *relock(&self.active) = Some(callbacks);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        *relock(&self.active) = None;
    }
}

/// Routing gate that parks callbacks until the test connects the route.
pub struct ManualRoute {
    parked: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ManualRoute {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            parked: Mutex::new(Vec::new()),
        })
    }

    /// Number of callbacks waiting on the route.
    pub fn parked_count(&self) -> usize {
        relock(&self.parked).len()
    }

    /// Establish the route, firing every parked callback in order.
    pub fn connect(&self) {
        let parked: Vec<_> = relock(&self.parked).drain(..).collect();
        for callback in parked {
            callback();
        }
    }
}

impl AudioRoutingGate for ManualRoute {
    fn ensure_routed(&self, on_routed: Box<dyn FnOnce() + Send>) {
        relock(&self.parked).push(on_routed);
    }
}
