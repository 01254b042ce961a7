//! Dialogue node variants and their callback records.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::engine::ConversationEngine;

/// Unique node identifier, caller-supplied or generated.
pub type NodeId = String;

/// Hook invoked with a handle to the running engine.
pub type EngineHook = Arc<dyn Fn(&ConversationEngine) + Send + Sync>;

/// Hook receiving the recognized utterance that matched or was captured.
pub type TranscriptHook = Arc<dyn Fn(&ConversationEngine, &str) + Send + Sync>;

/// Terminal hook receiving whatever recognition results are known.
pub type ResultsHook = Arc<dyn Fn(&ConversationEngine, &[String]) + Send + Sync>;

/// Optional notification hooks for a spoken message.
///
/// One record per operation instead of marker-interface listener bags:
/// every field is independently optional and there is no type sniffing.
#[derive(Clone, Default)]
pub struct MessageHooks {
    /// Synthesis of the message started.
    pub on_ready: Option<EngineHook>,
    /// The message finished playing. The engine advances afterwards
    /// regardless, so this hook is a notification, not a driver.
    pub on_done: Option<EngineHook>,
    /// The message failed to play.
    pub on_error: Option<EngineHook>,
}

/// A prompt spoken to the user.
#[derive(Clone)]
pub struct MessageNode {
    /// Unique identifier.
    pub id: NodeId,
    /// Text to speak.
    pub text: String,
    /// Optional notification hooks.
    pub hooks: MessageHooks,
}

impl MessageNode {
    /// Create a message node with a generated id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            hooks: MessageHooks::default(),
        }
    }

    /// Use a caller-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Hook invoked when synthesis starts.
    #[must_use]
    pub fn on_ready(mut self, hook: impl Fn(&ConversationEngine) + Send + Sync + 'static) -> Self {
        self.hooks.on_ready = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when the message finishes playing.
    #[must_use]
    pub fn on_done(mut self, hook: impl Fn(&ConversationEngine) + Send + Sync + 'static) -> Self {
        self.hooks.on_done = Some(Arc::new(hook));
        self
    }

    /// Hook invoked when the message fails to play.
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&ConversationEngine) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }
}

/// Expected phrases evaluated against one listening turn.
#[derive(Clone)]
pub struct MatchNode {
    /// Unique identifier.
    pub id: NodeId,
    /// Phrases satisfying this node, tested as whole words.
    pub phrases: Vec<String>,
    /// Whether partial (streaming) results may satisfy this node.
    pub allow_partial: bool,
    /// The recognizer is ready for speech.
    pub on_ready: Option<EngineHook>,
    /// A phrase matched; receives the recognized utterance. When absent
    /// the engine auto-advances.
    pub on_matched: Option<TranscriptHook>,
}

impl MatchNode {
    /// Create a match node with a generated id.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4().to_string(),
            phrases: phrases.into_iter().map(Into::into).collect(),
            allow_partial: false,
            on_ready: None,
            on_matched: None,
        }
    }

    /// Use a caller-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Allow partial results to satisfy this node.
    #[must_use]
    pub fn allow_partial(mut self) -> Self {
        self.allow_partial = true;
        self
    }

    /// Hook invoked when the recognizer is ready.
    #[must_use]
    pub fn on_ready(mut self, hook: impl Fn(&ConversationEngine) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(hook));
        self
    }

    /// Hook invoked with the recognized utterance on a match.
    #[must_use]
    pub fn on_matched(
        mut self,
        hook: impl Fn(&ConversationEngine, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_matched = Some(Arc::new(hook));
        self
    }
}

/// Retry policy applied when nothing in the listening turn matched.
///
/// The node carries the configured retry budget and escalation messages;
/// the live countdown is kept in the engine's side table so the node
/// itself stays immutable and shareable.
#[derive(Clone)]
pub struct MismatchNode {
    /// Unique identifier.
    pub id: NodeId,
    /// Configured retry budget.
    pub retries: u32,
    /// Spoken when the session stopped before the minimum listening window.
    pub unexpected_message: Option<String>,
    /// Spoken on a low-sound mismatch, when the low-sound flag is enabled.
    pub low_sound_message: Option<String>,
    /// Generic retry guidance spoken on an ordinary mismatch.
    pub listening_message: Option<String>,
    /// Terminal hook once the budget is exhausted; receives whatever
    /// results are known. When absent the engine auto-advances.
    pub on_not_matched: Option<ResultsHook>,
}

impl MismatchNode {
    /// Create a mismatch node with a generated id.
    pub fn new(retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            retries,
            unexpected_message: None,
            low_sound_message: None,
            listening_message: None,
            on_not_matched: None,
        }
    }

    /// Use a caller-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Message spoken when the user stopped speaking too early.
    #[must_use]
    pub fn unexpected_message(mut self, text: impl Into<String>) -> Self {
        self.unexpected_message = Some(text.into());
        self
    }

    /// Message spoken on a low-sound mismatch.
    #[must_use]
    pub fn low_sound_message(mut self, text: impl Into<String>) -> Self {
        self.low_sound_message = Some(text.into());
        self
    }

    /// Generic retry guidance message.
    #[must_use]
    pub fn listening_message(mut self, text: impl Into<String>) -> Self {
        self.listening_message = Some(text.into());
        self
    }

    /// Terminal hook invoked once the retry budget is exhausted.
    #[must_use]
    pub fn on_not_matched(
        mut self,
        hook: impl Fn(&ConversationEngine, &[String]) + Send + Sync + 'static,
    ) -> Self {
        self.on_not_matched = Some(Arc::new(hook));
        self
    }
}

/// Free-form transcript acceptance: no phrase matching.
#[derive(Clone)]
pub struct CaptureNode {
    /// Unique identifier.
    pub id: NodeId,
    /// Receives the most confident transcript. When absent the engine
    /// auto-advances.
    pub on_captured: Option<TranscriptHook>,
}

impl CaptureNode {
    /// Create a capture node with a generated id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            on_captured: None,
        }
    }

    /// Use a caller-supplied id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Hook invoked with the most confident transcript.
    #[must_use]
    pub fn on_captured(
        mut self,
        hook: impl Fn(&ConversationEngine, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_captured = Some(Arc::new(hook));
        self
    }
}

impl Default for CaptureNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of dialogue: a message to speak, or an action awaiting speech.
#[derive(Clone)]
pub enum Node {
    /// A prompt spoken to the user.
    Message(MessageNode),
    /// Expected phrases evaluated against one listening turn.
    Match(MatchNode),
    /// Retry policy for a listening turn that matched nothing.
    Mismatch(MismatchNode),
    /// Free-form transcript acceptance.
    Capture(CaptureNode),
}

impl Node {
    /// The node's unique identifier.
    pub fn id(&self) -> &str {
        match self {
            Self::Message(n) => &n.id,
            Self::Match(n) => &n.id,
            Self::Mismatch(n) => &n.id,
            Self::Capture(n) => &n.id,
        }
    }

    /// True for nodes evaluated against a listening turn
    /// (Match, Mismatch, Capture).
    pub fn is_action(&self) -> bool {
        !matches!(self, Self::Message(_))
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "Message",
            Self::Match(_) => "Match",
            Self::Mismatch(_) => "Mismatch",
            Self::Capture(_) => "Capture",
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind(), self.id())
    }
}

impl From<MessageNode> for Node {
    fn from(node: MessageNode) -> Self {
        Self::Message(node)
    }
}

impl From<MatchNode> for Node {
    fn from(node: MatchNode) -> Self {
        Self::Match(node)
    }
}

impl From<MismatchNode> for Node {
    fn from(node: MismatchNode) -> Self {
        Self::Mismatch(node)
    }
}

impl From<CaptureNode> for Node {
    fn from(node: CaptureNode) -> Self {
        Self::Capture(node)
    }
}
