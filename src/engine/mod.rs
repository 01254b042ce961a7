//! Conversation engine: the reactive state machine driving a dialogue.
//!
//! The engine has no threads of its own. It advances only in response to a
//! completion, result, or error callback from the speech engines, or to an
//! explicit `start`/`next`. Engine state sits behind one mutex; hooks and
//! collaborator calls are made after the lock is dropped, so a hook that
//! re-enters the engine cannot deadlock or corrupt state.
//!
//! Every callback closure carries the epoch it was issued under. Epochs
//! bump on every phase transition, so a late callback from an abandoned
//! phase is recognized as stale and dropped.

mod guard;
mod monitor;

pub use monitor::AcousticError;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::DialogueConfig;
use crate::error::{DialogueError, Result};
use crate::graph::{ActionSet, DialogueGraph, NextStep, Node, NodeId};
use crate::matcher;
use crate::queue::{SpeechQueueCoordinator, UtteranceCallbacks};
use crate::speech::{
    AudioRoutingGate, ListenCallbacks, RecognitionEngine, RecognitionError, SpeakParams,
    UtteranceContent,
};
use guard::PhaseGuard;
use monitor::ListenMonitor;

/// Synthetic utterance error code reported when a phase watchdog fires.
pub const PHASE_TIMEOUT_CODE: i32 = -2;

/// Conversation phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No phase in flight; the engine waits for an advance.
    Idle,
    /// A message utterance is playing.
    Speaking,
    /// A listening turn is in flight.
    Listening,
    /// The session has ended.
    Terminated,
}

struct EngineState {
    graph: DialogueGraph,
    started: bool,
    current: Option<NodeId>,
    phase: Phase,
    /// Bumped on every phase transition; stale callbacks are dropped.
    epoch: u64,
    /// Live mismatch budgets keyed by node id. Node payloads stay
    /// immutable; the countdown lives here.
    retries: HashMap<NodeId, u32>,
    monitor: Option<ListenMonitor>,
    guard: Option<PhaseGuard>,
    /// Whether the current Speaking phase is a retry-guidance prompt
    /// rather than a graph message.
    speaking_retry_prompt: bool,
    transport_retries: u32,
    active_set: Option<ActionSet>,
    /// Most recent non-empty recognition candidates this listening turn.
    last_results: Vec<String>,
}

struct EngineShared {
    config: DialogueConfig,
    queue: SpeechQueueCoordinator,
    recognizer: Arc<dyn RecognitionEngine>,
    routing: Arc<dyn AudioRoutingGate>,
    state: Mutex<EngineState>,
}

/// Drives one dialogue session over a graph it owns.
///
/// Cheap to clone; clones share the same session. Not safe to drive
/// concurrently from two callers, but callbacks arriving from other
/// threads are serialized internally.
#[derive(Clone)]
pub struct ConversationEngine {
    shared: Arc<EngineShared>,
}

impl ConversationEngine {
    /// Create an engine over the given graph and collaborators.
    pub fn new(
        config: DialogueConfig,
        graph: DialogueGraph,
        queue: SpeechQueueCoordinator,
        recognizer: Arc<dyn RecognitionEngine>,
        routing: Arc<dyn AudioRoutingGate>,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                queue,
                recognizer,
                routing,
                state: Mutex::new(EngineState {
                    graph,
                    started: false,
                    current: None,
                    phase: Phase::Idle,
                    epoch: 0,
                    retries: HashMap::new(),
                    monitor: None,
                    guard: None,
                    speaking_retry_prompt: false,
                    transport_retries: 0,
                    active_set: None,
                    last_results: Vec::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // A poisoned lock recovers the inner state.
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Begin a session at the root node and dispatch it.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::SessionActive`] on a duplicate start, or
    /// [`DialogueError::NodeNotFound`] if `root` is not registered.
    pub fn start(&self, root: &str) -> Result<()> {
        let node = {
            let mut st = self.lock();
            if st.started {
                return Err(DialogueError::SessionActive);
            }
            let node = st.graph.get_node(root)?;
            st.started = true;
            st.phase = Phase::Idle;
            st.current = Some(node.id().to_owned());
            node
        };
        info!("conversation started at {node:?}");
        self.advance_node(node);
        Ok(())
    }

    /// Advance past the current node.
    ///
    /// With no outgoing edges the session terminates silently. A message
    /// successor is spoken; action successors start a listening turn.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::NotStarted`] outside an active session,
    /// or a graph-shape error from edge resolution.
    pub fn next(&self) -> Result<()> {
        let step = {
            let st = self.lock();
            if !st.started {
                return Err(DialogueError::NotStarted);
            }
            let current = st.current.clone().ok_or(DialogueError::NotStarted)?;
            st.graph.next(&current)?
        };
        match step {
            None => self.finish(),
            Some(NextStep::Message(node)) => self.advance_node(node),
            Some(NextStep::Actions(set)) => self.listen(set),
        }
        Ok(())
    }

    /// Stop the active speaking or listening phase, leaving the session
    /// alive and its state consistent for the next [`next`](Self::next).
    pub fn stop(&self) {
        let was = {
            let mut st = self.lock();
            if !st.started {
                return;
            }
            let was = st.phase;
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.speaking_retry_prompt = false;
            st.phase = Phase::Idle;
            st.epoch += 1;
            was
        };
        match was {
            Phase::Listening => self.shared.recognizer.cancel(),
            Phase::Speaking => self.shared.queue.stop_current(),
            Phase::Idle | Phase::Terminated => {}
        }
        self.shared.queue.release();
        info!("active phase stopped");
    }

    /// End the session, cancelling any phase in flight.
    pub fn shutdown(&self) {
        {
            let mut st = self.lock();
            st.started = false;
            st.phase = Phase::Terminated;
            st.epoch += 1;
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.speaking_retry_prompt = false;
        }
        self.shared.recognizer.cancel();
        self.shared.queue.stop_current();
        self.shared.queue.release();
        info!("conversation shut down");
    }

    /// Forced shutdown on an unrecoverable external condition, e.g. the
    /// audio route dropped mid-session.
    pub fn force_shutdown(&self, reason: &str) {
        warn!("forced shutdown: {reason}");
        self.shutdown();
    }

    /// The current phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// True while a session is active.
    pub fn is_active(&self) -> bool {
        self.lock().started
    }

    /// Identifier of the current node, if a session is active.
    pub fn current_node_id(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Remaining mismatch budget for a node, once the policy has touched it.
    pub fn retries_left(&self, node_id: &str) -> Option<u32> {
        self.lock().retries.get(node_id).copied()
    }

    /// Dialogue terminated quietly: the current node has no outgoing edges.
    fn finish(&self) {
        {
            let mut st = self.lock();
            st.started = false;
            st.phase = Phase::Terminated;
            st.epoch += 1;
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.speaking_retry_prompt = false;
        }
        info!("dialogue complete: no further edges");
    }

    /// Execute a node: speak a message, or wrap a lone action node into a
    /// single-member set and listen.
    fn advance_node(&self, node: Arc<Node>) {
        match node.as_ref() {
            Node::Message(_) => self.speak_message(node),
            Node::Match(_) | Node::Mismatch(_) | Node::Capture(_) => {
                self.listen(ActionSet::single(node));
            }
        }
    }

    fn speak_message(&self, node: Arc<Node>) {
        let Node::Message(message) = node.as_ref() else {
            return;
        };
        let epoch = {
            let mut st = self.lock();
            if !st.started {
                return;
            }
            st.current = Some(message.id.clone());
            st.phase = Phase::Speaking;
            st.speaking_retry_prompt = false;
            st.epoch += 1;
            let epoch = st.epoch;
            let ceiling = Duration::from_secs(self.shared.config.guard.speak_ceiling_secs);
            st.guard = PhaseGuard::arm(self, Phase::Speaking, ceiling, epoch);
            epoch
        };
        debug!("speaking message {:?}", message.id);

        let on_start = message.hooks.on_ready.clone().map(|hook| {
            let engine = self.clone();
            Arc::new(move |_id: &str| hook(&engine)) as Arc<dyn Fn(&str) + Send + Sync>
        });
        let on_done = {
            let engine = self.clone();
            Arc::new(move |_id: &str| engine.on_message_done(epoch)) as Arc<dyn Fn(&str) + Send + Sync>
        };
        let on_error = {
            let engine = self.clone();
            Arc::new(move |_id: &str, code: i32| engine.on_message_error(epoch, code))
                as Arc<dyn Fn(&str, i32) + Send + Sync>
        };
        self.shared.queue.play_now(
            UtteranceContent::Text(message.text.clone()),
            SpeakParams::default(),
            UtteranceCallbacks {
                on_start,
                on_done: Some(on_done),
                on_error: Some(on_error),
            },
        );
    }

    fn on_message_done(&self, epoch: u64) {
        let (hook, post_epoch) = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Speaking {
                return;
            }
            st.guard = None;
            st.phase = Phase::Idle;
            st.epoch += 1;
            let hook = st
                .current
                .as_ref()
                .and_then(|id| st.graph.get_node(id).ok())
                .and_then(|node| match node.as_ref() {
                    Node::Message(m) => m.hooks.on_done.clone(),
                    _ => None,
                });
            (hook, st.epoch)
        };
        if let Some(hook) = hook {
            hook(self);
        }
        // Skip the auto-advance if the hook already moved the session.
        if self.epoch_unchanged(post_epoch) {
            if let Err(e) = self.next() {
                warn!("advance after message failed: {e}");
            }
        }
    }

    fn on_message_error(&self, epoch: u64, code: i32) {
        let (hook, post_epoch) = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Speaking {
                return;
            }
            st.guard = None;
            st.phase = Phase::Idle;
            st.epoch += 1;
            let hook = st
                .current
                .as_ref()
                .and_then(|id| st.graph.get_node(id).ok())
                .and_then(|node| match node.as_ref() {
                    Node::Message(m) => m.hooks.on_error.clone(),
                    _ => None,
                });
            (hook, st.epoch)
        };
        warn!("message playback failed (code {code})");
        match hook {
            Some(hook) => hook(self),
            None => {
                // Advance past the failed prompt rather than stalling.
                if self.epoch_unchanged(post_epoch) {
                    if let Err(e) = self.next() {
                        warn!("advance after failed message also failed: {e}");
                    }
                }
            }
        }
    }

    /// Start a listening turn over the action set.
    fn listen(&self, set: ActionSet) {
        if set.is_empty() {
            warn!("ignoring empty action set");
            return;
        }
        let epoch = {
            let mut st = self.lock();
            if !st.started {
                return;
            }
            st.phase = Phase::Listening;
            st.epoch += 1;
            let epoch = st.epoch;
            st.monitor = Some(ListenMonitor::new(&self.shared.config.listen));
            st.active_set = Some(set);
            st.transport_retries = 0;
            st.last_results.clear();
            let ceiling = Duration::from_secs(self.shared.config.guard.listen_ceiling_secs);
            st.guard = PhaseGuard::arm(self, Phase::Listening, ceiling, epoch);
            epoch
        };
        // Queued app output must not drain between the prompt finishing
        // and the listening turn ending.
        self.shared.queue.hold();
        self.begin_listen(epoch);
    }

    fn begin_listen(&self, epoch: u64) {
        let engine = self.clone();
        self.shared
            .routing
            .ensure_routed(Box::new(move || engine.start_recognizer(epoch)));
    }

    fn start_recognizer(&self, epoch: u64) {
        let set = {
            let st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            st.active_set.clone()
        };
        let Some(set) = set else {
            return;
        };
        debug!("listening over {} action node(s)", set.len());
        let callbacks = if set.capture().is_some() {
            self.capture_callbacks(epoch)
        } else {
            self.match_callbacks(epoch)
        };
        if let Err(e) = self.shared.recognizer.start_listening(callbacks) {
            error!("recognizer failed to start: {e}");
            self.handle_listen_error(epoch, RecognitionError::Audio);
        }
    }

    /// Full callback wiring for a Match/Mismatch set.
    fn match_callbacks(&self, epoch: u64) -> ListenCallbacks {
        let ready_engine = self.clone();
        let rms_engine = self.clone();
        let partial_engine = self.clone();
        let results_engine = self.clone();
        let error_engine = self.clone();
        ListenCallbacks {
            on_ready: Some(Arc::new(move || ready_engine.on_listen_ready(epoch))),
            on_rms: Some(Arc::new(move |rms| rms_engine.note_rms(epoch, rms))),
            on_partial_results: Some(Arc::new(move |candidates, confidences| {
                partial_engine.handle_results(
                    epoch,
                    candidates.to_vec(),
                    confidences.map(<[f32]>::to_vec),
                    true,
                );
            })),
            on_results: Some(Arc::new(move |candidates, confidences| {
                results_engine.handle_results(
                    epoch,
                    candidates.to_vec(),
                    confidences.map(<[f32]>::to_vec),
                    false,
                );
            })),
            on_error: Some(Arc::new(move |err| {
                error_engine.handle_listen_error(epoch, err);
            })),
        }
    }

    /// A capture turn listens with only a result and an error callback.
    fn capture_callbacks(&self, epoch: u64) -> ListenCallbacks {
        let results_engine = self.clone();
        let error_engine = self.clone();
        ListenCallbacks {
            on_results: Some(Arc::new(move |candidates, confidences| {
                results_engine.handle_results(
                    epoch,
                    candidates.to_vec(),
                    confidences.map(<[f32]>::to_vec),
                    false,
                );
            })),
            on_error: Some(Arc::new(move |err| {
                error_engine.handle_listen_error(epoch, err);
            })),
            ..ListenCallbacks::default()
        }
    }

    fn on_listen_ready(&self, epoch: u64) {
        let hooks = {
            let st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            st.active_set
                .as_ref()
                .map(|set| {
                    set.members()
                        .iter()
                        .filter_map(|node| match node.as_ref() {
                            Node::Match(m) => m.on_ready.clone(),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        for hook in hooks {
            hook(self);
        }
    }

    fn note_rms(&self, epoch: u64, rms: f32) {
        let mut st = self.lock();
        if st.epoch != epoch || st.phase != Phase::Listening {
            return;
        }
        if let Some(monitor) = st.monitor.as_mut() {
            monitor.note_rms(rms);
        }
    }

    /// Evaluate recognition candidates against the active set.
    ///
    /// First match wins, in set order. Partial results only satisfy match
    /// nodes that opted in. A final result matching nothing runs the
    /// mismatch policy when the set carries a mismatch node.
    fn handle_results(
        &self,
        epoch: u64,
        candidates: Vec<String>,
        confidences: Option<Vec<f32>>,
        is_partial: bool,
    ) {
        let (set, fallback_class) = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            if !candidates.is_empty() {
                st.last_results = candidates.clone();
            }
            let class = if candidates.is_empty() {
                st.monitor
                    .as_ref()
                    .map_or(AcousticError::NoSound, ListenMonitor::classify)
            } else {
                AcousticError::None
            };
            (st.active_set.clone(), class)
        };
        let Some(set) = set else {
            return;
        };

        if let Some(capture) = set.capture() {
            if is_partial {
                return;
            }
            match matcher::select_most_confident(&candidates, confidences.as_deref()) {
                Some(best) => {
                    let best = best.to_owned();
                    self.conclude_capture(epoch, &capture, best);
                }
                None => self.conclude_mismatch(epoch, &set, fallback_class),
            }
            return;
        }

        let mut mismatch: Option<Arc<Node>> = None;
        for member in set.members() {
            match member.as_ref() {
                Node::Mismatch(_) => {
                    if mismatch.is_none() {
                        mismatch = Some(Arc::clone(member));
                    }
                }
                Node::Match(m) => {
                    if is_partial && !m.allow_partial {
                        continue;
                    }
                    if let Some(i) = matcher::first_match(&candidates, &m.phrases) {
                        let heard = candidates[i].clone();
                        self.conclude_match(epoch, member, heard);
                        return;
                    }
                }
                Node::Capture(_) | Node::Message(_) => {}
            }
        }

        if !is_partial {
            match mismatch {
                Some(node) => self.apply_mismatch_policy(epoch, &node, fallback_class),
                None => self.end_listen_without_policy(epoch),
            }
        }
    }

    fn conclude_match(&self, epoch: u64, node: &Arc<Node>, heard: String) {
        let Node::Match(matched) = node.as_ref() else {
            return;
        };
        let post_epoch = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.phase = Phase::Idle;
            st.epoch += 1;
            st.current = Some(matched.id.clone());
            st.epoch
        };
        self.shared.recognizer.stop();
        self.shared.queue.release();
        info!("matched '{heard}' at {:?}", matched.id);
        match matched.on_matched.clone() {
            Some(hook) => hook(self, &heard),
            None => {
                if self.epoch_unchanged(post_epoch) {
                    if let Err(e) = self.next() {
                        warn!("advance after match failed: {e}");
                    }
                }
            }
        }
    }

    fn conclude_capture(&self, epoch: u64, node: &Arc<Node>, transcript: String) {
        let Node::Capture(capture) = node.as_ref() else {
            return;
        };
        let post_epoch = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.phase = Phase::Idle;
            st.epoch += 1;
            st.current = Some(capture.id.clone());
            st.epoch
        };
        self.shared.recognizer.stop();
        self.shared.queue.release();
        info!("captured transcript at {:?}", capture.id);
        match capture.on_captured.clone() {
            Some(hook) => hook(self, &transcript),
            None => {
                if self.epoch_unchanged(post_epoch) {
                    if let Err(e) = self.next() {
                        warn!("advance after capture failed: {e}");
                    }
                }
            }
        }
    }

    /// Route a failed turn to the set's mismatch node, if it has one.
    fn conclude_mismatch(&self, epoch: u64, set: &ActionSet, class: AcousticError) {
        match set.first_mismatch() {
            Some(node) => self.apply_mismatch_policy(epoch, &node, class),
            None => self.end_listen_without_policy(epoch),
        }
    }

    /// The retry cascade: specific acoustic diagnosis before generic
    /// guidance, terminal once the budget runs dry.
    fn apply_mismatch_policy(&self, epoch: u64, node: &Arc<Node>, class: AcousticError) {
        let Node::Mismatch(mismatch) = node.as_ref() else {
            return;
        };

        enum Outcome {
            Speak(String, u64),
            Terminal(Option<crate::graph::ResultsHook>, Vec<String>, u64),
        }

        let outcome = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            let budget = st
                .retries
                .entry(mismatch.id.clone())
                .or_insert(mismatch.retries);
            let escalation = if *budget > 0 {
                *budget -= 1;
                let remaining = *budget;
                debug!(
                    "mismatch ({class:?}) at {:?}: {remaining} retries left",
                    mismatch.id
                );
                if class == AcousticError::StoppedTooEarly && mismatch.unexpected_message.is_some()
                {
                    mismatch.unexpected_message.clone()
                } else if self.shared.config.conversation.enable_low_sound_message
                    && class == AcousticError::LowSound
                    && mismatch.low_sound_message.is_some()
                {
                    mismatch.low_sound_message.clone()
                } else if class != AcousticError::LowSound && class != AcousticError::NoSound {
                    mismatch.listening_message.clone()
                } else {
                    None
                }
            } else {
                None
            };
            match escalation {
                Some(message) => {
                    st.guard = None;
                    st.monitor = None;
                    st.active_set = None;
                    st.phase = Phase::Speaking;
                    st.speaking_retry_prompt = true;
                    st.epoch += 1;
                    let speak_epoch = st.epoch;
                    let ceiling =
                        Duration::from_secs(self.shared.config.guard.speak_ceiling_secs);
                    st.guard = PhaseGuard::arm(self, Phase::Speaking, ceiling, speak_epoch);
                    Outcome::Speak(message, speak_epoch)
                }
                None => {
                    if let Some(budget) = st.retries.get_mut(&mismatch.id) {
                        *budget = 0;
                    }
                    st.guard = None;
                    st.monitor = None;
                    st.active_set = None;
                    st.phase = Phase::Idle;
                    st.epoch += 1;
                    st.current = Some(mismatch.id.clone());
                    Outcome::Terminal(
                        mismatch.on_not_matched.clone(),
                        st.last_results.clone(),
                        st.epoch,
                    )
                }
            }
        };

        self.shared.recognizer.cancel();
        self.shared.queue.release();

        match outcome {
            Outcome::Speak(message, speak_epoch) => {
                info!("speaking retry guidance");
                let done_engine = self.clone();
                let error_engine = self.clone();
                self.shared.queue.play_now(
                    UtteranceContent::Text(message),
                    SpeakParams::default(),
                    UtteranceCallbacks {
                        on_start: None,
                        on_done: Some(Arc::new(move |_id: &str| {
                            done_engine.on_retry_prompt_done(speak_epoch);
                        })),
                        on_error: Some(Arc::new(move |_id: &str, _code: i32| {
                            error_engine.on_retry_prompt_done(speak_epoch);
                        })),
                    },
                );
            }
            Outcome::Terminal(hook, results, post_epoch) => {
                info!("mismatch budget exhausted at {:?}", mismatch.id);
                match hook {
                    Some(hook) => hook(self, &results),
                    None => {
                        if self.epoch_unchanged(post_epoch) {
                            if let Err(e) = self.next() {
                                warn!("advance after exhausted mismatch failed: {e}");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Retry guidance finished: re-advance to the current node, replaying
    /// its prompt and its listening turn.
    fn on_retry_prompt_done(&self, epoch: u64) {
        let node = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Speaking {
                return;
            }
            st.guard = None;
            st.phase = Phase::Idle;
            st.speaking_retry_prompt = false;
            st.epoch += 1;
            st.current
                .as_ref()
                .and_then(|id| st.graph.get_node(id).ok())
        };
        if let Some(node) = node {
            self.advance_node(node);
        }
    }

    /// Transport errors retry silently without consuming the mismatch
    /// budget, up to the configured cap; everything else (and an
    /// exhausted cap) goes to the mismatch policy.
    fn handle_listen_error(&self, epoch: u64, err: RecognitionError) {
        enum Plan {
            Stale,
            Retry,
            Mismatch(ActionSet, AcousticError),
        }

        let plan = {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                Plan::Stale
            } else if err.is_transport()
                && st.transport_retries < self.shared.config.listen.max_transport_retries
            {
                st.transport_retries += 1;
                let ceiling = Duration::from_secs(self.shared.config.guard.listen_ceiling_secs);
                st.guard = PhaseGuard::arm(self, Phase::Listening, ceiling, epoch);
                Plan::Retry
            } else {
                let class = if err.is_transport() {
                    AcousticError::None
                } else {
                    st.monitor
                        .as_ref()
                        .map_or(AcousticError::NoSound, ListenMonitor::classify)
                };
                match st.active_set.clone() {
                    Some(set) => Plan::Mismatch(set, class),
                    None => Plan::Stale,
                }
            }
        };

        match plan {
            Plan::Stale => {}
            Plan::Retry => {
                warn!("transport error during listen ({err:?}), retrying silently");
                self.begin_listen(epoch);
            }
            Plan::Mismatch(set, class) => {
                debug!("listen error {err:?} classified as {class:?}");
                self.conclude_mismatch(epoch, &set, class);
            }
        }
    }

    /// A turn failed with no mismatch node to take over: end the phase
    /// and leave the session waiting for an explicit advance.
    fn end_listen_without_policy(&self, epoch: u64) {
        {
            let mut st = self.lock();
            if st.epoch != epoch || st.phase != Phase::Listening {
                return;
            }
            st.guard = None;
            st.monitor = None;
            st.active_set = None;
            st.phase = Phase::Idle;
            st.epoch += 1;
        }
        self.shared.recognizer.cancel();
        self.shared.queue.release();
        warn!("listening ended with no match and no mismatch node in the set");
    }

    /// Watchdog expiry: force-stop the phase and route it through the
    /// ordinary error path.
    fn on_phase_timeout(&self, phase: Phase, epoch: u64) {
        let retry_prompt = {
            let st = self.lock();
            if st.epoch != epoch || st.phase != phase {
                return;
            }
            st.speaking_retry_prompt
        };
        warn!("{phase:?} phase exceeded its guard ceiling, force-stopping");
        match phase {
            Phase::Speaking => {
                self.shared.queue.stop_current();
                if retry_prompt {
                    self.on_retry_prompt_done(epoch);
                } else {
                    self.on_message_error(epoch, PHASE_TIMEOUT_CODE);
                }
            }
            Phase::Listening => {
                self.shared.recognizer.cancel();
                self.handle_listen_error(epoch, RecognitionError::SpeechTimeout);
            }
            Phase::Idle | Phase::Terminated => {}
        }
    }

    fn epoch_unchanged(&self, epoch: u64) -> bool {
        let st = self.lock();
        st.started && st.epoch == epoch
    }
}
