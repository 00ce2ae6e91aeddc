//! Validation of cursor-shaped command replies.
//!
//! A reply looks like
//! `{cursor: {id: <i64>, ns: "db.coll", firstBatch|nextBatch: [<doc>...]}, ok: 1}`.
//! Validation stops at the first violation and names the offending field.

use super::batch::{BatchData, CursorId};
use super::namespace::Namespace;
use crate::error::FetchError;
use mongodb::bson::{Bson, Document};

const CURSOR_FIELD: &str = "cursor";
const CURSOR_ID_FIELD: &str = "id";
const NAMESPACE_FIELD: &str = "ns";

// 2^63 as f64; every integral double strictly below it fits in an i64.
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Which batch array a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchField {
    /// Reply to the initial cursor-producing command.
    First,
    /// Reply to a continuation (`getMore`) command.
    Next,
}

impl BatchField {
    pub fn name(self) -> &'static str {
        match self {
            BatchField::First => "firstBatch",
            BatchField::Next => "nextBatch",
        }
    }
}

/// Converts a raw reply into a [`BatchData`] or a field-specific parse error.
pub fn parse_cursor_response(
    reply: &Document,
    batch_field: BatchField,
) -> Result<BatchData, FetchError> {
    let cursor = match reply.get(CURSOR_FIELD) {
        None => {
            return Err(FetchError::failed_to_parse(format!(
                "cursor response must contain '{CURSOR_FIELD}' field: {reply}"
            )))
        }
        Some(Bson::Document(cursor)) => cursor,
        Some(_) => {
            return Err(FetchError::failed_to_parse(format!(
                "'{CURSOR_FIELD}' field must be an object: {reply}"
            )))
        }
    };

    let cursor_id = parse_cursor_id(cursor, reply)?;
    let namespace = parse_namespace(cursor, reply)?;
    let documents = parse_documents(cursor, batch_field, reply)?;

    Ok(BatchData {
        cursor_id,
        namespace,
        documents,
    })
}

fn parse_cursor_id(cursor: &Document, reply: &Document) -> Result<CursorId, FetchError> {
    let value = cursor.get(CURSOR_ID_FIELD).ok_or_else(|| {
        FetchError::failed_to_parse(format!(
            "cursor response must contain '{CURSOR_FIELD}.{CURSOR_ID_FIELD}' field: {reply}"
        ))
    })?;

    let id = match value {
        Bson::Int64(id) => Some(*id),
        Bson::Int32(id) => Some(i64::from(*id)),
        Bson::Double(id)
            if id.is_finite()
                && id.fract() == 0.0
                && *id >= -I64_UPPER_BOUND
                && *id < I64_UPPER_BOUND =>
        {
            Some(*id as i64)
        }
        _ => None,
    };

    id.ok_or_else(|| {
        FetchError::failed_to_parse(format!(
            "'{CURSOR_FIELD}.{CURSOR_ID_FIELD}' field must be a 64-bit integral number: {reply}"
        ))
    })
}

fn parse_namespace(cursor: &Document, reply: &Document) -> Result<Namespace, FetchError> {
    let ns = match cursor.get(NAMESPACE_FIELD) {
        None => {
            return Err(FetchError::failed_to_parse(format!(
                "cursor response must contain '{CURSOR_FIELD}.{NAMESPACE_FIELD}' field: {reply}"
            )))
        }
        Some(Bson::String(ns)) => ns,
        Some(_) => {
            return Err(FetchError::failed_to_parse(format!(
                "'{CURSOR_FIELD}.{NAMESPACE_FIELD}' field must be a string: {reply}"
            )))
        }
    };

    Namespace::parse(ns).ok_or_else(|| {
        FetchError::bad_value(format!(
            "'{CURSOR_FIELD}.{NAMESPACE_FIELD}' contains an invalid namespace: {ns:?}"
        ))
    })
}

fn parse_documents(
    cursor: &Document,
    batch_field: BatchField,
    reply: &Document,
) -> Result<Vec<Document>, FetchError> {
    let field = batch_field.name();
    let elements = match cursor.get(field) {
        None => {
            return Err(FetchError::failed_to_parse(format!(
                "cursor response must contain '{CURSOR_FIELD}.{field}' field: {reply}"
            )))
        }
        Some(Bson::Array(elements)) => elements,
        Some(_) => {
            return Err(FetchError::failed_to_parse(format!(
                "'{CURSOR_FIELD}.{field}' field must be an array: {reply}"
            )))
        }
    };

    let mut documents = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        match element {
            Bson::Document(document) => documents.push(document.clone()),
            other => {
                return Err(FetchError::failed_to_parse(format!(
                    "found non-object {other} at index {index} in '{CURSOR_FIELD}.{field}' field: {reply}"
                )))
            }
        }
    }
    Ok(documents)
}
