use std::fmt;

/// Fully qualified collection identifier (`database.collection`).
///
/// The database part ends at the first `.`; the collection part may contain
/// further dots (`db.system.indexes`). Both parts are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    full: String,
    separator: usize,
}

impl Namespace {
    /// Returns `None` unless `value` has a non-empty database and collection part.
    pub fn parse(value: &str) -> Option<Self> {
        let separator = value.find('.')?;
        if separator == 0 || separator + 1 == value.len() {
            return None;
        }
        Some(Self {
            full: value.to_owned(),
            separator,
        })
    }

    pub fn db(&self) -> &str {
        &self.full[..self.separator]
    }

    pub fn coll(&self) -> &str {
        &self.full[self.separator + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
