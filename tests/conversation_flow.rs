#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use colloquy::test_utils::{ManualRoute, ScriptedRecognizer, ScriptedSynth};
use colloquy::{
    CaptureNode, ConversationEngine, DialogueConfig, DialogueGraph, DirectAudioRoute, MatchNode,
    MessageNode, MismatchNode, Phase, SpeechQueueCoordinator, UtteranceContent,
};

fn engine_for(
    graph: DialogueGraph,
    config: DialogueConfig,
) -> (
    ConversationEngine,
    SpeechQueueCoordinator,
    Arc<ScriptedSynth>,
    Arc<ScriptedRecognizer>,
) {
    let synth = ScriptedSynth::new();
    synth.set_auto_complete(true);
    let queue = SpeechQueueCoordinator::new(synth.clone(), Arc::new(DirectAudioRoute));
    synth.attach_sink(queue.event_sink());
    let recognizer = ScriptedRecognizer::new();
    let engine = ConversationEngine::new(
        config,
        graph,
        queue.clone(),
        recognizer.clone(),
        Arc::new(DirectAudioRoute),
    );
    (engine, queue, synth, recognizer)
}

/// welcome → question → {tea, coffee, mismatch}; each drink confirms.
fn drink_graph() -> DialogueGraph {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Welcome.").with_id("welcome"));
    graph.add_node(MessageNode::new("Tea or coffee?").with_id("question"));
    graph.add_node(MatchNode::new(["tea"]).with_id("tea"));
    graph.add_node(MatchNode::new(["coffee"]).with_id("coffee"));
    graph.add_node(
        MismatchNode::new(1)
            .listening_message("Please say tea or coffee.")
            .with_id("otherwise"),
    );
    graph.add_node(MessageNode::new("Tea it is.").with_id("tea-confirm"));
    graph.add_node(MessageNode::new("Coffee it is.").with_id("coffee-confirm"));
    graph.add_edge("welcome", "question").expect("edge");
    graph.add_edge("question", "tea").expect("edge");
    graph.add_edge("question", "coffee").expect("edge");
    graph.add_edge("question", "otherwise").expect("edge");
    graph.add_edge("tea", "tea-confirm").expect("edge");
    graph.add_edge("coffee", "coffee-confirm").expect("edge");
    graph
}

#[test]
fn full_walk_matches_a_branch_and_terminates() {
    let (engine, _queue, synth, recognizer) = engine_for(drink_graph(), DialogueConfig::default());
    engine.start("welcome").expect("start");

    assert_eq!(synth.spoken(), ["Welcome.", "Tea or coffee?"]);
    assert_eq!(engine.phase(), Phase::Listening);

    recognizer.emit_ready();
    recognizer.emit_results(&["coffee please"], None);

    assert_eq!(
        synth.spoken(),
        ["Welcome.", "Tea or coffee?", "Coffee it is."]
    );
    assert_eq!(engine.phase(), Phase::Terminated);
    assert!(!engine.is_active());
    assert_eq!(recognizer.stop_count(), 1);
}

#[test]
fn mismatch_guidance_replays_the_question_before_the_retry() {
    let (engine, _queue, synth, recognizer) = engine_for(drink_graph(), DialogueConfig::default());
    engine.start("welcome").expect("start");

    recognizer.emit_results(&["a pint of stout"], None);
    assert_eq!(
        synth.spoken(),
        [
            "Welcome.",
            "Tea or coffee?",
            "Please say tea or coffee.",
            "Tea or coffee?"
        ]
    );
    assert_eq!(engine.phase(), Phase::Listening);

    recognizer.emit_results(&["tea thanks"], None);
    assert_eq!(engine.phase(), Phase::Terminated);
    let spoken = synth.spoken();
    assert_eq!(spoken.last().map(String::as_str), Some("Tea it is."));
}

#[test]
fn exhausted_mismatch_auto_advances_past_the_mismatch_node() {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Ready?").with_id("question"));
    graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
    graph.add_node(MismatchNode::new(0).with_id("otherwise"));
    graph.add_node(MessageNode::new("Never mind, goodbye.").with_id("goodbye"));
    graph.add_edge("question", "yes").expect("edge");
    graph.add_edge("question", "otherwise").expect("edge");
    graph.add_edge("otherwise", "goodbye").expect("edge");

    let (engine, _queue, synth, recognizer) = engine_for(graph, DialogueConfig::default());
    engine.start("question").expect("start");

    // Budget is zero at entry: straight to the terminal branch, which has
    // no hook and so advances through the mismatch node's own edge.
    recognizer.emit_results(&["something else"], None);
    assert_eq!(
        synth.spoken(),
        ["Ready?", "Never mind, goodbye."]
    );
    assert_eq!(engine.phase(), Phase::Terminated);
}

#[test]
fn capture_without_hook_auto_advances() {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Leave a note.").with_id("prompt"));
    graph.add_node(CaptureNode::new().with_id("note"));
    graph.add_node(MessageNode::new("Noted, thanks.").with_id("thanks"));
    graph.add_edge("prompt", "note").expect("edge");
    graph.add_edge("note", "thanks").expect("edge");

    let (engine, _queue, synth, recognizer) = engine_for(graph, DialogueConfig::default());
    engine.start("prompt").expect("start");

    recognizer.emit_results(&["remember the milk"], None);
    assert_eq!(synth.spoken(), ["Leave a note.", "Noted, thanks."]);
    assert_eq!(engine.phase(), Phase::Terminated);
}

#[test]
fn hook_driven_advance_from_a_match_is_not_duplicated() {
    let matched = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&matched);
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Ready?").with_id("question"));
    graph.add_node(
        MatchNode::new(["yes"])
            .with_id("yes")
            .on_matched(move |engine, _heard| {
                count.fetch_add(1, Ordering::SeqCst);
                engine.next().expect("hook advance");
            }),
    );
    graph.add_node(MessageNode::new("Off we go.").with_id("go"));
    graph.add_edge("question", "yes").expect("edge");
    graph.add_edge("yes", "go").expect("edge");

    let (engine, _queue, synth, recognizer) = engine_for(graph, DialogueConfig::default());
    engine.start("question").expect("start");

    recognizer.emit_results(&["yes"], None);
    assert_eq!(matched.load(Ordering::SeqCst), 1);
    assert_eq!(synth.spoken(), ["Ready?", "Off we go."]);
    assert_eq!(engine.phase(), Phase::Terminated);

    // A straggling duplicate from the recognizer is stale and ignored.
    recognizer.emit_results(&["yes"], None);
    assert_eq!(synth.spoken(), ["Ready?", "Off we go."]);
}

#[test]
fn listening_waits_for_the_audio_route() {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Ready?").with_id("question"));
    graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
    graph.add_edge("question", "yes").expect("edge");

    let synth = ScriptedSynth::new();
    synth.set_auto_complete(true);
    let queue = SpeechQueueCoordinator::new(synth.clone(), Arc::new(DirectAudioRoute));
    synth.attach_sink(queue.event_sink());
    let recognizer = ScriptedRecognizer::new();
    let route = ManualRoute::new();
    let engine = ConversationEngine::new(
        DialogueConfig::default(),
        graph,
        queue,
        recognizer.clone(),
        route.clone(),
    );

    engine.start("question").expect("start");
    assert_eq!(engine.phase(), Phase::Listening);
    assert_eq!(recognizer.start_count(), 0);
    assert_eq!(route.parked_count(), 1);

    route.connect();
    assert_eq!(recognizer.start_count(), 1);

    recognizer.emit_results(&["yes"], None);
    assert_eq!(engine.phase(), Phase::Terminated);
}

#[test]
fn grouped_output_stays_held_during_a_listening_turn() {
    let (engine, queue, synth, recognizer) = engine_for(drink_graph(), DialogueConfig::default());
    engine.start("welcome").expect("start");
    assert_eq!(engine.phase(), Phase::Listening);

    // App output queued mid-turn must not play over the microphone.
    queue.enqueue(
        UtteranceContent::Text("New email arrived.".to_owned()),
        "notifications",
        <_>::default(),
        <_>::default(),
    );
    assert_eq!(synth.spoken(), ["Welcome.", "Tea or coffee?"]);

    recognizer.emit_results(&["tea"], None);
    // The turn released the hold, so the announcement drains only after
    // the confirmation prompt finishes — never over the microphone.
    let spoken = synth.spoken();
    assert_eq!(
        spoken,
        [
            "Welcome.",
            "Tea or coffee?",
            "Tea it is.",
            "New email arrived."
        ]
    );
    assert!(queue.is_empty());
}

#[test]
fn stop_mid_speak_then_next_continues_the_walk() {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("one").with_id("a"));
    graph.add_node(MessageNode::new("two").with_id("b"));
    graph.add_edge("a", "b").expect("edge");

    let synth = ScriptedSynth::new();
    let queue = SpeechQueueCoordinator::new(synth.clone(), Arc::new(DirectAudioRoute));
    synth.attach_sink(queue.event_sink());
    let recognizer = ScriptedRecognizer::new();
    let engine = ConversationEngine::new(
        DialogueConfig::default(),
        graph,
        queue,
        recognizer.clone(),
        Arc::new(DirectAudioRoute),
    );

    engine.start("a").expect("start");
    assert_eq!(engine.phase(), Phase::Speaking);
    assert_eq!(synth.pending_count(), 1);

    engine.stop();
    assert_eq!(synth.stop_count(), 1);
    assert_eq!(engine.phase(), Phase::Idle);
    assert!(engine.is_active());

    engine.next().expect("continue");
    assert_eq!(synth.spoken(), ["one", "two"]);
}

#[tokio::test]
async fn hung_listening_phase_is_timed_out_and_classified() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&invocations);
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("Ready?").with_id("question"));
    graph.add_node(MatchNode::new(["yes"]).with_id("yes"));
    graph.add_node(
        MismatchNode::new(2)
            .on_not_matched(move |_engine, _results| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .with_id("otherwise"),
    );
    graph.add_edge("question", "yes").expect("edge");
    graph.add_edge("question", "otherwise").expect("edge");

    let mut config = DialogueConfig::default();
    config.guard.listen_ceiling_secs = 1;
    config.listen.min_listen_window_ms = 0;

    let (engine, _queue, _synth, recognizer) = engine_for(graph, config);
    engine.start("question").expect("start");
    assert_eq!(engine.phase(), Phase::Listening);

    // The recognizer never responds; the watchdog force-stops the turn.
    tokio::time::sleep(Duration::from_millis(1_400)).await;
    assert!(recognizer.cancel_count() >= 1);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(engine.phase(), Phase::Idle);
}

#[tokio::test]
async fn hung_speaking_phase_is_timed_out_and_skipped() {
    let mut graph = DialogueGraph::new();
    graph.add_node(MessageNode::new("one").with_id("a"));
    graph.add_node(MessageNode::new("two").with_id("b"));
    graph.add_edge("a", "b").expect("edge");

    let mut config = DialogueConfig::default();
    config.guard.speak_ceiling_secs = 1;

    let synth = ScriptedSynth::new();
    // No auto-complete: the synthesis engine never reports done.
    let queue = SpeechQueueCoordinator::new(synth.clone(), Arc::new(DirectAudioRoute));
    synth.attach_sink(queue.event_sink());
    let recognizer = ScriptedRecognizer::new();
    let engine = ConversationEngine::new(
        config,
        graph,
        queue,
        recognizer,
        Arc::new(DirectAudioRoute),
    );

    engine.start("a").expect("start");
    tokio::time::sleep(Duration::from_millis(2_600)).await;

    // Both prompts were dispatched, force-stopped, and skipped past.
    assert_eq!(synth.spoken(), ["one", "two"]);
    assert_eq!(synth.stop_count(), 2);
    assert_eq!(engine.phase(), Phase::Terminated);
}
