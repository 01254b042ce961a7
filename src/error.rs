//! Error types for the dialogue engine.

/// Top-level error type for the dialogue system.
#[derive(Debug, thiserror::Error)]
pub enum DialogueError {
    /// An edge endpoint was referenced before the node was registered.
    #[error("unregistered node: {0}")]
    UnregisteredNode(String),

    /// Node lookup by id failed.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Fan-out from a node mixed Action and non-Action targets.
    #[error("invalid graph shape: {0}")]
    InvalidGraphShape(String),

    /// An operation that needs an active session was called outside one.
    #[error("conversation not started")]
    NotStarted,

    /// `start` was called while a session was already active.
    #[error("conversation already started")]
    SessionActive,

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech recognition error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Audio routing error.
    #[error("routing error: {0}")]
    Routing(String),

    /// A speaking or listening phase exceeded its guard ceiling.
    #[error("phase timeout: {0}")]
    Timeout(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, DialogueError>;
