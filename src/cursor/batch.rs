use super::namespace::Namespace;
use crate::error::FetchError;
use mongodb::bson::{doc, Document};

pub type CursorId = i64;

/// Cursor id reported once the peer has exhausted (and closed) the cursor.
pub const EXHAUSTED_CURSOR_ID: CursorId = 0;

/// One decoded cursor batch. Documents keep wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchData {
    pub cursor_id: CursorId,
    pub namespace: Namespace,
    pub documents: Vec<Document>,
}

impl BatchData {
    pub fn is_exhausted(&self) -> bool {
        self.cursor_id == EXHAUSTED_CURSOR_ID
    }

    /// Builds the standard continuation command for this batch's cursor.
    pub fn get_more_command(&self) -> Document {
        doc! {
            "getMore": self.cursor_id,
            "collection": self.namespace.coll(),
        }
    }
}

/// What the caller wants the fetcher to do after a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NextAction {
    /// No decision was made.
    #[default]
    Invalid,
    /// Stop fetching. The cursor may remain open on the peer.
    NoAction,
    /// Schedule the continuation command returned alongside this action.
    GetMore,
    /// Reserved for exhaust cursors; treated as no continuation.
    ExhaustContinue,
}

/// Value returned by the fetcher callback for every invocation.
///
/// `continuation` is only consulted for a successful, non-exhausted batch
/// whose `action` is [`NextAction::GetMore`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub action: NextAction,
    pub continuation: Option<Document>,
}

impl Decision {
    pub fn stop() -> Self {
        Self {
            action: NextAction::NoAction,
            continuation: None,
        }
    }

    pub fn get_more(command: Document) -> Self {
        Self {
            action: NextAction::GetMore,
            continuation: Some(command),
        }
    }

    /// Continues `batch`'s cursor with [`BatchData::get_more_command`].
    pub fn get_more_for(batch: &BatchData) -> Self {
        Self::get_more(batch.get_more_command())
    }
}

/// How a finished fetcher ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The peer reported the terminal cursor id.
    Exhausted,
    /// The callback answered [`NextAction::NoAction`].
    Stopped,
    /// The callback left no usable continuation (no decision, no command, or
    /// an unsupported action).
    NoContinuation,
    /// A terminal status was delivered to the callback.
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}
