//! Dictionary handling
//!
//! A dictionary is an ordered list of candidate decryption keys, one per line.
//! It is read fully into memory once at startup and then shared: every
//! partitioned view holds the same underlying line storage behind an `Arc`
//! and only carries its own `[start, end)` bounds and cursor. This makes
//! handing a partition to a worker a cheap clone rather than a copy of the
//! word list.
//!
//! All range checks are local contract checks: an out-of-range read aborts
//! the offending operation with [`RangeError`], it never panics.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod partition;

pub use partition::{balanced_split, fixed_chunks, Partition, PartitionError};

/// Cursor or index operation outside the bounds of the current view.
#[derive(Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeError {
    #[error("index {index} outside view range [{start}, {end})")]
    OutOfRange {
        index: usize,
        start: usize,
        end: usize,
    },
}

/// A range-bounded, cursor-based view over the dictionary.
///
/// Invariant: `0 <= start <= cursor <= end <= lines.len()`. A view restricted
/// to `[start, end)` never reads outside that range. Cloning is shallow: the
/// line storage is shared, the cursor is independent per clone.
#[derive(Debug, Clone)]
pub struct DictionaryView {
    lines: Arc<Vec<String>>,
    start: usize,
    end: usize,
    cursor: usize,
}

impl DictionaryView {
    /// Load a dictionary file (newline-delimited UTF-8 candidate keys).
    ///
    /// A missing file yields an empty dictionary with a warning rather than
    /// a startup failure, so a coordinator can come up before its dictionary
    /// is provisioned.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if !path.exists() {
            eprintln!(
                "Warning: dictionary file {} not found, using empty dictionary",
                path.display()
            );
            return Ok(Self::from_lines(Vec::new()));
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionary file: {}", path.display()))?;

        let lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
        Ok(Self::from_lines(lines))
    }

    /// Build a view over an in-memory line list, spanning the whole list.
    pub fn from_lines(lines: Vec<String>) -> Self {
        let end = lines.len();
        Self {
            lines: Arc::new(lines),
            start: 0,
            end,
            cursor: 0,
        }
    }

    /// Read the line under the cursor and advance the cursor by one.
    pub fn read_line(&mut self) -> Result<&str, RangeError> {
        if self.cursor >= self.end {
            return Err(RangeError::OutOfRange {
                index: self.cursor,
                start: self.start,
                end: self.end,
            });
        }
        let line = &self.lines[self.cursor];
        self.cursor += 1;
        Ok(line)
    }

    /// Read a specific line without moving the cursor.
    pub fn read_line_at(&self, index: usize) -> Result<&str, RangeError> {
        if index < self.start || index >= self.end {
            return Err(RangeError::OutOfRange {
                index,
                start: self.start,
                end: self.end,
            });
        }
        Ok(&self.lines[index])
    }

    /// Move the cursor by `delta`, clamping to `[start, end]`.
    ///
    /// Clamping is the documented edge policy, not an error: partition
    /// slicing walks past the end on its final step and relies on landing
    /// exactly on `end`.
    pub fn seek(&mut self, delta: i64) {
        let target = self.cursor as i64 + delta;
        self.cursor = if target < self.start as i64 {
            self.start
        } else if target > self.end as i64 {
            self.end
        } else {
            target as usize
        };
    }

    /// Whether a `read_line` call would succeed.
    pub fn ready(&self) -> bool {
        self.cursor >= self.start && self.cursor < self.end
    }

    /// Reset the cursor to the start of the view.
    pub fn rewind(&mut self) {
        self.cursor = self.start;
    }

    /// Produce a view restricted to `[start, end)`, cursor at `start`.
    ///
    /// The restriction is checked against the full line storage, so a
    /// restricted view can be built from any other view over the same
    /// dictionary.
    pub fn restrict(&self, start: usize, end: usize) -> Result<DictionaryView, RangeError> {
        if end > self.lines.len() || start > end {
            return Err(RangeError::OutOfRange {
                index: end,
                start,
                end: self.lines.len(),
            });
        }
        Ok(DictionaryView {
            lines: Arc::clone(&self.lines),
            start,
            end,
            cursor: start,
        })
    }

    /// Current cursor position (absolute line index).
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// First line index of this view.
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last line index of this view.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of lines within the view bounds.
    pub fn count_lines(&self) -> usize {
        self.end - self.start
    }

    /// Number of lines in the whole underlying dictionary.
    pub fn count_all_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count_lines() == 0
    }
}
