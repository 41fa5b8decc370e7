//! Text model primitives: sizes, ranges, versioned text and change ranges.

use crate::VersionStamp;
use std::sync::Arc;

pub use text_size::{TextRange, TextSize};

/// A text blob paired with the version it was produced at.
///
/// The text is shared behind an `Arc` so snapshots, trees and retention
/// holders can hand it around without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAndVersion {
    pub text: Arc<String>,
    pub version: VersionStamp,
}

impl TextAndVersion {
    pub fn new(text: impl Into<String>, version: VersionStamp) -> Self {
        Self {
            text: Arc::new(text.into()),
            version,
        }
    }

    pub fn from_shared(text: Arc<String>, version: VersionStamp) -> Self {
        Self { text, version }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// The single region that differs between an old and a new text.
///
/// `span` is expressed in old-text coordinates; `new_len` is the length of the
/// text that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextChangeRange {
    pub span: TextRange,
    pub new_len: TextSize,
}

impl TextChangeRange {
    pub const fn new(span: TextRange, new_len: TextSize) -> Self {
        Self { span, new_len }
    }

    /// A change that touches nothing.
    pub fn none() -> Self {
        Self::new(TextRange::empty(TextSize::from(0)), TextSize::from(0))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.span.is_empty() && self.new_len == TextSize::from(0)
    }

    /// The replaced region in new-text coordinates.
    #[inline]
    pub fn new_range(&self) -> TextRange {
        TextRange::at(self.span.start(), self.new_len)
    }

    /// Signed growth of the text caused by this change.
    #[inline]
    pub fn delta(&self) -> i64 {
        i64::from(u32::from(self.new_len)) - i64::from(u32::from(self.span.len()))
    }

    /// Computes the encompassing change by stripping the common prefix and
    /// suffix of the two texts. Both ends land on UTF-8 character boundaries.
    pub fn between(old: &str, new: &str) -> Self {
        let old_bytes = old.as_bytes();
        let new_bytes = new.as_bytes();
        let min_len = old_bytes.len().min(new_bytes.len());

        let mut prefix = old_bytes
            .iter()
            .zip(new_bytes)
            .take_while(|(a, b)| a == b)
            .count();
        while prefix > 0 && !(old.is_char_boundary(prefix) && new.is_char_boundary(prefix)) {
            prefix -= 1;
        }

        let mut suffix = old_bytes
            .iter()
            .rev()
            .zip(new_bytes.iter().rev())
            .take(min_len - prefix)
            .take_while(|(a, b)| a == b)
            .count();
        while suffix > 0
            && !(old.is_char_boundary(old.len() - suffix)
                && new.is_char_boundary(new.len() - suffix))
        {
            suffix -= 1;
        }

        let span_end = old.len() - suffix;
        let new_len = new.len() - suffix - prefix;
        Self::new(
            TextRange::new(to_size(prefix), to_size(span_end)),
            to_size(new_len),
        )
    }

    /// Merges two consecutive changes (`self` first, then `next` applied to
    /// the result) into one change over the original text.
    pub fn compose(self, next: TextChangeRange) -> Self {
        if self.is_empty() {
            return next;
        }
        if next.is_empty() {
            return self;
        }

        let first_new = self.new_range();
        let start = self.span.start().min(next.span.start());

        // End in intermediate coordinates, then map back to the original text.
        let intermediate_end = first_new.end().max(next.span.end());
        let original_end = i64::from(u32::from(intermediate_end)) - self.delta();
        let original_end = TextSize::from(original_end.max(i64::from(u32::from(start))) as u32);

        let new_end = i64::from(u32::from(intermediate_end)) + next.delta();
        let new_len = (new_end - i64::from(u32::from(start))).max(0) as u32;

        Self::new(TextRange::new(start, original_end), TextSize::from(new_len))
    }
}

fn to_size(len: usize) -> TextSize {
    TextSize::from(u32::try_from(len).unwrap_or(u32::MAX))
}
