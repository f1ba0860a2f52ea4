//! Comparison strategies for snapshots.
//!
//! A [`SnapshotStrategy`] decides how a value is stored and how a stored
//! payload is compared against a fresh value. Two strategies exist:
//! [`ExactValue`] stores a serde_json payload and compares structurally;
//! [`RenderedText`] stores a rendered text block and compares line by line.

mod exact;
mod text;

pub use exact::ExactValue;
pub use text::{DisplayRenderer, RenderedText, Renderer, Rendering, Section, SerdeRenderer};

use std::fmt;

use crate::error::Result;

/// Shown in place of a value that exists on one side only.
pub const ABSENT: &str = "<absent>";

/// One difference between a stored snapshot and a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    /// Where the difference is: a JSON pointer or `line N`.
    pub location: String,
    /// Stored side. None if the location only exists in the new value.
    pub old: Option<String>,
    /// New side. None if the location only exists in the stored value.
    pub new: Option<String>,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:\n  - {}\n  + {}",
            self.location,
            self.old.as_deref().unwrap_or(ABSENT),
            self.new.as_deref().unwrap_or(ABSENT)
        )
    }
}

/// Ordered differences found by a comparison. Empty means equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub entries: Vec<Discrepancy>,
}

impl Diff {
    /// True when the values matched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of discrepancies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(
        &mut self,
        location: impl Into<String>,
        old: Option<String>,
        new: Option<String>,
    ) {
        self.entries.push(Discrepancy {
            location: location.into(),
            old,
            new,
        });
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no differences");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// How values of type `T` are stored and compared.
pub trait SnapshotStrategy<T: ?Sized> {
    /// File extension of stored payloads, without the dot.
    fn extension(&self) -> &str;

    /// Encodes `value` as a payload.
    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    /// Compares a stored payload with `value`.
    fn compare(&self, stored: &[u8], value: &T) -> Result<Diff>;
}
