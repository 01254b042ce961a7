//! Colloquy: turn-based spoken dialogue engine.
//!
//! This crate conducts a spoken dialogue as a walk over a directed graph:
//! play a prompt, listen for the reply, branch on whether the reply matches
//! expectations, and retry automatically on poor audio conditions.
//!
//! # Architecture
//!
//! Independent components wired together by the engine:
//! - **Graph**: dialogue nodes (Message/Match/Mismatch/Capture) with
//!   incoming-edge adjacency and fan-out resolution into action sets
//! - **Matcher**: whole-word phrase matching and confidence selection
//! - **Queue**: ordered groups of utterances with hold/release semantics
//! - **Engine**: the reactive state machine driving speak/listen turns
//! - **Speech**: capability traits implemented by platform adapters
//!
//! The concrete text-to-speech and speech-to-text engines, audio routing,
//! and UI glue are external collaborators injected through the traits in
//! [`speech`]; the engine owns no threads and advances only in response to
//! their completion callbacks.

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod queue;
pub mod speech;
pub mod test_utils;

pub use config::DialogueConfig;
pub use engine::{AcousticError, ConversationEngine, Phase};
pub use error::{DialogueError, Result};
pub use graph::{
    ActionSet, CaptureNode, DialogueGraph, MatchNode, MessageNode, MismatchNode, NextStep, Node,
};
pub use queue::{SpeechQueueCoordinator, SynthesisEventSink, UtteranceCallbacks};
pub use speech::{
    AudioRoutingGate, DirectAudioRoute, ListenCallbacks, RecognitionEngine, RecognitionError,
    SpeakParams, SynthesisEngine, UtteranceContent,
};
