//! Speech-output queue coordinator.
//!
//! Owns ordered groups of pending utterances with one current group at a
//! time. Non-default groups play in insertion order; the distinguished
//! default group always exists, is never removed, and is drained last.
//! `hold`/`release` suspend and resume automatic advancement without
//! discarding queued state.
//!
//! Mutation of the group map and the active-listener record is serialized
//! under one mutex; listener invocation happens after the lock is dropped
//! so a listener that enqueues new work cannot deadlock.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::speech::{AudioRoutingGate, SpeakParams, SynthesisEngine, UtteranceContent};

/// The distinguished group that always exists and is drained last.
pub const DEFAULT_GROUP: &str = "default";

/// Error code reported when an utterance cannot be dispatched at all.
pub const SYNTH_DISPATCH_FAILED: i32 = -1;

/// Per-utterance listener record. All fields optional.
#[derive(Clone, Default)]
pub struct UtteranceCallbacks {
    /// Synthesis of the utterance started.
    pub on_start: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// The utterance finished playing.
    pub on_done: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// The utterance failed with an engine code.
    pub on_error: Option<Arc<dyn Fn(&str, i32) + Send + Sync>>,
}

/// A queued utterance awaiting playback.
struct PendingUtterance {
    id: String,
    content: UtteranceContent,
    params: SpeakParams,
    callbacks: UtteranceCallbacks,
}

/// The utterance currently at the synthesis engine.
struct ActiveUtterance {
    id: String,
    callbacks: UtteranceCallbacks,
    /// Whether group bookkeeping applies on completion.
    from_queue: bool,
}

/// A named non-default group.
struct Group {
    id: String,
    queue: VecDeque<PendingUtterance>,
}

struct QueueState {
    /// The default group's FIFO.
    default_queue: VecDeque<PendingUtterance>,
    /// Non-default groups in insertion order.
    groups: Vec<Group>,
    current_group: String,
    held: bool,
    speaking: Option<ActiveUtterance>,
}

struct QueueShared {
    state: Mutex<QueueState>,
    synth: Arc<dyn SynthesisEngine>,
    routing: Arc<dyn AudioRoutingGate>,
}

/// Coordinates ordered groups of utterances against one synthesis engine.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct SpeechQueueCoordinator {
    shared: Arc<QueueShared>,
}

impl SpeechQueueCoordinator {
    /// Create a coordinator over the given synthesis engine and routing gate.
    pub fn new(synth: Arc<dyn SynthesisEngine>, routing: Arc<dyn AudioRoutingGate>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    default_queue: VecDeque::new(),
                    groups: Vec::new(),
                    current_group: DEFAULT_GROUP.to_owned(),
                    held: false,
                    speaking: None,
                }),
                synth,
                routing,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock recovers the inner state.
        self.shared
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Handle for synthesis adapters to report utterance progress.
    pub fn event_sink(&self) -> SynthesisEventSink {
        SynthesisEventSink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Append an utterance to the named group's FIFO, creating the group if
    /// absent. If nothing is being spoken and the coordinator is not held,
    /// playback of the current group's head starts.
    ///
    /// Returns the effective utterance id: a requested id colliding with a
    /// pending one is suffixed with a disambiguator.
    pub fn enqueue(
        &self,
        content: UtteranceContent,
        group_id: &str,
        params: SpeakParams,
        callbacks: UtteranceCallbacks,
    ) -> String {
        let (id, to_play) = {
            let mut st = self.lock();
            let id = unique_id_locked(&st, params.utterance_id.clone());
            let record = PendingUtterance {
                id: id.clone(),
                content,
                params,
                callbacks,
            };
            if group_id == DEFAULT_GROUP {
                st.default_queue.push_back(record);
            } else if let Some(group) = st.groups.iter_mut().find(|g| g.id == group_id) {
                group.queue.push_back(record);
            } else {
                st.groups.push(Group {
                    id: group_id.to_owned(),
                    queue: VecDeque::from([record]),
                });
            }
            debug!("queued utterance '{id}' in group '{group_id}'");
            (id, self.claim_next_locked(&mut st))
        };
        if let Some(utterance) = to_play {
            self.dispatch(utterance);
        }
        id
    }

    /// Speak immediately, bypassing all grouping and the hold flag.
    ///
    /// Any active utterance is flushed; its listener is discarded without
    /// firing. Used for prompts at the start of a fresh conversational
    /// turn, where nothing should be playing.
    pub fn play_now(
        &self,
        content: UtteranceContent,
        params: SpeakParams,
        callbacks: UtteranceCallbacks,
    ) -> String {
        let (id, displaced, utterance) = {
            let mut st = self.lock();
            let id = unique_id_locked(&st, params.utterance_id.clone());
            let displaced = st.speaking.take();
            st.speaking = Some(ActiveUtterance {
                id: id.clone(),
                callbacks: callbacks.clone(),
                from_queue: false,
            });
            let utterance = PendingUtterance {
                id: id.clone(),
                content,
                params,
                callbacks,
            };
            (id, displaced, utterance)
        };
        if let Some(active) = displaced {
            warn!("immediate utterance '{id}' preempts active '{}'", active.id);
            self.shared.synth.stop();
        }
        self.dispatch(utterance);
        id
    }

    /// Suspend automatic queue advancement. Queued state is untouched.
    pub fn hold(&self) {
        self.lock().held = true;
        debug!("queue held");
    }

    /// Resume automatic queue advancement. Does not start playback by
    /// itself; see [`resume`](Self::resume).
    pub fn release(&self) {
        self.lock().held = false;
        debug!("queue released");
    }

    /// Play the head of the current group, first moving to the next group
    /// if the current one is empty. No-op while something is speaking.
    pub fn resume(&self) {
        let next = {
            let mut st = self.lock();
            if st.speaking.is_some() {
                return;
            }
            let next = take_next_locked(&mut st);
            if let Some(n) = &next {
                st.speaking = Some(ActiveUtterance {
                    id: n.id.clone(),
                    callbacks: n.callbacks.clone(),
                    from_queue: true,
                });
            }
            next
        };
        if let Some(utterance) = next {
            self.dispatch(utterance);
        }
    }

    /// Force-stop the active utterance, dropping its listener without
    /// firing it. Queued state is untouched.
    pub fn stop_current(&self) {
        let had = self.lock().speaking.take();
        if let Some(active) = had {
            debug!("force-stopping utterance '{}'", active.id);
            self.shared.synth.stop();
        }
    }

    /// Synthesis started on the identified utterance.
    pub fn on_utterance_started(&self, id: &str) {
        let hook = {
            let st = self.lock();
            st.speaking
                .as_ref()
                .filter(|a| a.id == id)
                .and_then(|a| a.callbacks.on_start.clone())
        };
        if let Some(h) = hook {
            h(id);
        }
    }

    /// The identified utterance finished playing.
    ///
    /// Removes the matching listener, runs group-advancement bookkeeping,
    /// fires the listener, and (unless held) plays the next queued item.
    pub fn on_utterance_done(&self, id: &str) {
        let (listener, next) = {
            let mut st = self.lock();
            let Some(active) = st.speaking.take_if(|a| a.id == id) else {
                debug!("completion for unknown utterance '{id}'");
                return;
            };
            if active.from_queue {
                retire_group_locked(&mut st);
            }
            (active.callbacks.on_done, self.claim_next_locked(&mut st))
        };
        if let Some(h) = listener {
            h(id);
        }
        if let Some(utterance) = next {
            self.dispatch(utterance);
        }
    }

    /// The identified utterance failed with an engine code.
    ///
    /// Same bookkeeping as [`on_utterance_done`](Self::on_utterance_done).
    pub fn on_utterance_error(&self, id: &str, code: i32) {
        warn!("utterance '{id}' failed with code {code}");
        let (listener, next) = {
            let mut st = self.lock();
            let Some(active) = st.speaking.take_if(|a| a.id == id) else {
                debug!("error for unknown utterance '{id}'");
                return;
            };
            if active.from_queue {
                retire_group_locked(&mut st);
            }
            (active.callbacks.on_error, self.claim_next_locked(&mut st))
        };
        if let Some(h) = listener {
            h(id, code);
        }
        if let Some(utterance) = next {
            self.dispatch(utterance);
        }
    }

    /// True iff only the empty default group remains.
    pub fn is_empty(&self) -> bool {
        let st = self.lock();
        st.groups.is_empty() && st.default_queue.is_empty()
    }

    /// True if the current group has no pending utterances.
    pub fn is_current_group_empty(&self) -> bool {
        let st = self.lock();
        if st.current_group == DEFAULT_GROUP {
            st.default_queue.is_empty()
        } else {
            st.groups
                .iter()
                .find(|g| g.id == st.current_group)
                .is_none_or(|g| g.queue.is_empty())
        }
    }

    /// Identifier of the current group.
    pub fn current_group_id(&self) -> String {
        self.lock().current_group.clone()
    }

    /// The second group in processing order (non-default groups first,
    /// default last), or `None` when only the default group exists.
    pub fn next_group_id(&self) -> Option<String> {
        let st = self.lock();
        match st.groups.len() {
            0 => None,
            1 => Some(DEFAULT_GROUP.to_owned()),
            _ => Some(st.groups[1].id.clone()),
        }
    }

    /// Take the next utterance and mark it active, unless held or already
    /// speaking.
    fn claim_next_locked(&self, st: &mut QueueState) -> Option<PendingUtterance> {
        if st.held || st.speaking.is_some() {
            return None;
        }
        let next = take_next_locked(st);
        if let Some(n) = &next {
            st.speaking = Some(ActiveUtterance {
                id: n.id.clone(),
                callbacks: n.callbacks.clone(),
                from_queue: true,
            });
        }
        next
    }

    /// Hand an utterance to the synthesis engine once audio is routed.
    fn dispatch(&self, utterance: PendingUtterance) {
        let shared = Arc::clone(&self.shared);
        let PendingUtterance {
            id,
            content,
            params,
            ..
        } = utterance;
        debug!("dispatching utterance '{id}'");
        self.shared.routing.ensure_routed(Box::new(move || {
            let result = match &content {
                UtteranceContent::Text(text) => shared.synth.speak(text, &id, &params),
                UtteranceContent::Silence(duration) => shared.synth.play_silence(*duration, &id),
            };
            if let Err(e) = result {
                error!("synthesis dispatch failed for '{id}': {e}");
                SpeechQueueCoordinator {
                    shared: Arc::clone(&shared),
                }
                .on_utterance_error(&id, SYNTH_DISPATCH_FAILED);
            }
        }));
    }
}

/// Pop the head of the current group, moving across groups as they drain:
/// non-default groups in insertion order, then the default group.
fn take_next_locked(st: &mut QueueState) -> Option<PendingUtterance> {
    loop {
        if st.current_group == DEFAULT_GROUP {
            // Non-default groups drain before the default group.
            match st.groups.first() {
                Some(group) => st.current_group = group.id.clone(),
                None => return st.default_queue.pop_front(),
            }
        } else {
            let Some(idx) = st.groups.iter().position(|g| g.id == st.current_group) else {
                st.current_group = DEFAULT_GROUP.to_owned();
                continue;
            };
            if let Some(utterance) = st.groups[idx].queue.pop_front() {
                return Some(utterance);
            }
            st.groups.remove(idx);
            st.current_group = next_group_after_removal(st);
        }
    }
}

/// Post-completion bookkeeping: a drained non-default group is deleted and
/// the current group advances in insertion order, falling back to default.
fn retire_group_locked(st: &mut QueueState) {
    if st.current_group == DEFAULT_GROUP {
        return;
    }
    let Some(idx) = st.groups.iter().position(|g| g.id == st.current_group) else {
        st.current_group = DEFAULT_GROUP.to_owned();
        return;
    };
    if st.groups[idx].queue.is_empty() {
        info!("group '{}' drained", st.current_group);
        st.groups.remove(idx);
        st.current_group = next_group_after_removal(st);
    }
}

fn next_group_after_removal(st: &QueueState) -> String {
    st.groups
        .first()
        .map(|g| g.id.clone())
        .unwrap_or_else(|| DEFAULT_GROUP.to_owned())
}

fn unique_id_locked(st: &QueueState, requested: Option<String>) -> String {
    let base = requested.unwrap_or_else(|| Uuid::new_v4().to_string());
    if !id_in_use(st, &base) {
        return base;
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}-{n}");
        if !id_in_use(st, &candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn id_in_use(st: &QueueState, id: &str) -> bool {
    st.speaking.as_ref().is_some_and(|a| a.id == id)
        || st.default_queue.iter().any(|u| u.id == id)
        || st.groups.iter().any(|g| g.queue.iter().any(|u| u.id == id))
}

/// Clonable handle for synthesis adapters to report utterance progress.
#[derive(Clone)]
pub struct SynthesisEventSink {
    shared: Weak<QueueShared>,
}

impl SynthesisEventSink {
    fn coordinator(&self) -> Option<SpeechQueueCoordinator> {
        self.shared
            .upgrade()
            .map(|shared| SpeechQueueCoordinator { shared })
    }

    /// Synthesis started on the identified utterance.
    pub fn on_start(&self, id: &str) {
        if let Some(coordinator) = self.coordinator() {
            coordinator.on_utterance_started(id);
        }
    }

    /// The identified utterance finished playing.
    pub fn on_done(&self, id: &str) {
        if let Some(coordinator) = self.coordinator() {
            coordinator.on_utterance_done(id);
        }
    }

    /// The identified utterance failed with an engine code.
    pub fn on_error(&self, id: &str, code: i32) {
        if let Some(coordinator) = self.coordinator() {
            coordinator.on_utterance_error(id, code);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::speech::DirectAudioRoute;
    use crate::test_utils::ScriptedSynth;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator() -> (SpeechQueueCoordinator, Arc<ScriptedSynth>) {
        let synth = ScriptedSynth::new();
        let coord = SpeechQueueCoordinator::new(synth.clone(), Arc::new(DirectAudioRoute));
        synth.attach_sink(coord.event_sink());
        (coord, synth)
    }

    fn text(s: &str) -> UtteranceContent {
        UtteranceContent::Text(s.to_owned())
    }

    #[test]
    fn drains_groups_in_insertion_order() {
        let (coord, synth) = coordinator();
        coord.enqueue(text("a1"), "A", SpeakParams::default(), <_>::default());
        coord.enqueue(text("a2"), "A", SpeakParams::default(), <_>::default());
        coord.enqueue(text("b1"), "B", SpeakParams::default(), <_>::default());

        assert_eq!(synth.spoken(), ["a1"]);
        assert_eq!(coord.current_group_id(), "A");
        assert_eq!(coord.next_group_id(), Some("B".to_owned()));

        synth.finish_next();
        assert_eq!(synth.spoken(), ["a1", "a2"]);
        assert_eq!(coord.current_group_id(), "A");

        synth.finish_next();
        // A drained: removed from the group set before B becomes current.
        assert_eq!(synth.spoken(), ["a1", "a2", "b1"]);
        assert_eq!(coord.current_group_id(), "B");
        assert_eq!(coord.next_group_id(), Some(DEFAULT_GROUP.to_owned()));

        synth.finish_next();
        assert_eq!(coord.current_group_id(), DEFAULT_GROUP);
        assert!(coord.is_empty());
        assert_eq!(coord.next_group_id(), None);
    }

    #[test]
    fn hold_suppresses_auto_advance_and_resume_plays_once() {
        let (coord, synth) = coordinator();
        coord.enqueue(text("first"), "A", SpeakParams::default(), <_>::default());
        coord.enqueue(text("second"), "A", SpeakParams::default(), <_>::default());
        assert_eq!(synth.spoken(), ["first"]);

        coord.hold();
        synth.finish_next();
        assert_eq!(synth.spoken(), ["first"]);

        coord.release();
        coord.resume();
        assert_eq!(synth.spoken(), ["first", "second"]);

        // Resume while speaking is a no-op.
        coord.resume();
        assert_eq!(synth.spoken(), ["first", "second"]);
    }

    #[test]
    fn requested_id_collisions_get_disambiguated() {
        let (coord, _synth) = coordinator();
        let params = SpeakParams {
            utterance_id: Some("greet".to_owned()),
            ..SpeakParams::default()
        };
        let first = coord.enqueue(text("one"), "A", params.clone(), <_>::default());
        let second = coord.enqueue(text("two"), "A", params.clone(), <_>::default());
        let third = coord.enqueue(text("three"), "A", params, <_>::default());
        assert_eq!(first, "greet");
        assert_eq!(second, "greet-1");
        assert_eq!(third, "greet-2");
    }

    #[test]
    fn default_group_always_exists() {
        let (coord, synth) = coordinator();
        assert_eq!(coord.current_group_id(), DEFAULT_GROUP);
        assert!(coord.is_empty());
        assert!(coord.is_current_group_empty());
        assert_eq!(coord.next_group_id(), None);

        coord.enqueue(
            text("hello"),
            DEFAULT_GROUP,
            SpeakParams::default(),
            <_>::default(),
        );
        synth.finish_next();
        // Drained default is kept, not deleted.
        assert_eq!(coord.current_group_id(), DEFAULT_GROUP);
        assert!(coord.is_empty());
    }

    #[test]
    fn non_default_groups_play_before_default() {
        let (coord, synth) = coordinator();
        coord.hold();
        coord.enqueue(
            text("later"),
            DEFAULT_GROUP,
            SpeakParams::default(),
            <_>::default(),
        );
        coord.enqueue(text("sooner"), "A", SpeakParams::default(), <_>::default());
        coord.release();
        coord.resume();
        assert_eq!(synth.spoken(), ["sooner"]);
        synth.finish_next();
        assert_eq!(synth.spoken(), ["sooner", "later"]);
    }

    #[test]
    fn play_now_bypasses_hold_and_groups() {
        let (coord, synth) = coordinator();
        coord.hold();
        coord.enqueue(text("queued"), "A", SpeakParams::default(), <_>::default());
        assert!(synth.spoken().is_empty());

        let done = Arc::new(AtomicUsize::new(0));
        let done_count = Arc::clone(&done);
        let callbacks = UtteranceCallbacks {
            on_done: Some(Arc::new(move |_id: &str| {
                done_count.fetch_add(1, Ordering::SeqCst);
            })),
            ..UtteranceCallbacks::default()
        };
        coord.play_now(text("urgent"), SpeakParams::default(), callbacks);
        assert_eq!(synth.spoken(), ["urgent"]);

        synth.finish_next();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        // Still held: the queued item does not start.
        assert_eq!(synth.spoken(), ["urgent"]);
        assert!(!coord.is_empty());
    }

    #[test]
    fn listener_enqueueing_more_work_does_not_corrupt_the_queue() {
        let (coord, synth) = coordinator();
        let chained = Arc::new(AtomicUsize::new(0));
        let chained_count = Arc::clone(&chained);
        let inner_coord = coord.clone();
        let callbacks = UtteranceCallbacks {
            on_done: Some(Arc::new(move |_id: &str| {
                chained_count.fetch_add(1, Ordering::SeqCst);
                inner_coord.enqueue(
                    UtteranceContent::Text("chained".to_owned()),
                    "A",
                    SpeakParams::default(),
                    UtteranceCallbacks::default(),
                );
            })),
            ..UtteranceCallbacks::default()
        };
        coord.enqueue(text("opener"), "A", SpeakParams::default(), callbacks);
        synth.finish_next();

        assert_eq!(chained.load(Ordering::SeqCst), 1);
        assert_eq!(synth.spoken(), ["opener", "chained"]);
        synth.finish_next();
        assert!(coord.is_empty());
    }

    #[test]
    fn error_fires_listener_and_advances() {
        let (coord, synth) = coordinator();
        let failures = Arc::new(AtomicUsize::new(0));
        let failure_count = Arc::clone(&failures);
        let callbacks = UtteranceCallbacks {
            on_error: Some(Arc::new(move |_id: &str, code: i32| {
                assert_eq!(code, -3);
                failure_count.fetch_add(1, Ordering::SeqCst);
            })),
            ..UtteranceCallbacks::default()
        };
        let first = coord.enqueue(text("broken"), "A", SpeakParams::default(), callbacks);
        coord.enqueue(text("next"), "A", SpeakParams::default(), <_>::default());

        coord.event_sink().on_error(&first, -3);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(synth.spoken(), ["broken", "next"]);
    }

    #[test]
    fn completion_for_unknown_utterance_is_ignored() {
        let (coord, synth) = coordinator();
        coord.enqueue(text("only"), "A", SpeakParams::default(), <_>::default());
        coord.event_sink().on_done("no-such-id");
        assert_eq!(synth.spoken(), ["only"]);
        assert_eq!(coord.current_group_id(), "A");
    }

    #[test]
    fn silence_is_dispatched_like_text() {
        let (coord, synth) = coordinator();
        coord.enqueue(
            UtteranceContent::Silence(std::time::Duration::from_millis(250)),
            "A",
            SpeakParams::default(),
            <_>::default(),
        );
        assert_eq!(synth.spoken(), ["<silence 250ms>"]);
    }
}
