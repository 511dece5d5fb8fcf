use thiserror::Error;

use crate::tree::NodeType;

/// Local invariant violations raised by the tree model.
///
/// These never indicate a fault: callers either ignore them (silent no-op) or
/// surface the message as an inline warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node '{0}' not found")]
    NotFound(String),

    #[error("Cannot delete {} nodes. Only issue nodes can be deleted.", .0.display_name())]
    ProtectedType(NodeType),

    #[error("the root node cannot be deleted")]
    ProtectedRoot,

    #[error("node '{0}' is only shown to keep its children in context and cannot be deleted")]
    GreyedOut(String),

    #[error("cannot move node '{0}' onto itself")]
    SelfParent(String),

    #[error("the root node cannot be moved")]
    RootMove,

    #[error("cannot move node '{node}' under its own descendant '{target}'")]
    DescendantParent { node: String, target: String },
}

/// Failures talking to the upstream tracker.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The tracker answered with an `errors` payload.
    #[error("{0}")]
    GraphQl(String),

    /// A mutation came back with `success: false`.
    #[error("upstream rejected {0}")]
    Rejected(String),

    #[error("malformed upstream response: {0}")]
    Decode(String),

    #[error("no upstream API token available")]
    MissingToken,
}

impl UpstreamError {
    /// Transport-level failures can be retried by the user; logical errors
    /// will come back the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transport(_) | UpstreamError::Http { .. }
        )
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Decode(err.to_string())
    }
}

/// Errors from interaction-controller operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("no edit is in progress")]
    NoDraft,

    #[error("another drag gesture is already active")]
    GestureActive,

    #[error("no drag gesture is active")]
    NoGesture,

    #[error("no context menu is open")]
    NoMenu,

    #[error("the map has not been rendered yet")]
    NotRendered,
}
