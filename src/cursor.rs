//! Cursor reply model: namespaces, decoded batches, caller decisions, and the
//! parser that validates raw cursor replies.

pub mod batch;
pub mod namespace;
pub mod parser;

pub use batch::{BatchData, CursorId, Decision, FetchOutcome, NextAction, EXHAUSTED_CURSOR_ID};
pub use namespace::Namespace;
pub use parser::{parse_cursor_response, BatchField};
