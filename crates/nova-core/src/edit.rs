//! Text edits and edit batches.

use thiserror::Error;

use crate::{TextChangeRange, TextRange, TextSize};

/// Replacement of `range` in the old text by `replacement`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TextEdit {
    pub range: TextRange,
    pub replacement: String,
}

impl TextEdit {
    pub fn new(range: TextRange, replacement: impl Into<String>) -> Self {
        Self {
            range,
            replacement: replacement.into(),
        }
    }

    pub fn insert(offset: TextSize, text: impl Into<String>) -> Self {
        Self::new(TextRange::empty(offset), text)
    }

    pub fn delete(range: TextRange) -> Self {
        Self::new(range, String::new())
    }

    fn growth(&self) -> i64 {
        self.replacement.len() as i64 - i64::from(u32::from(self.range.len()))
    }

    /// The single change range covering a batch of normalized edits.
    ///
    /// `edits` must be sorted and non-overlapping (see [`normalize_text_edits`]).
    /// Returns `None` for an empty batch.
    pub fn encompassing_change(edits: &[TextEdit]) -> Option<TextChangeRange> {
        let span = TextRange::new(edits.first()?.range.start(), edits.last()?.range.end());
        let new_len = i64::from(u32::from(span.len())) + edits.iter().map(TextEdit::growth).sum::<i64>();
        let new_len = u32::try_from(new_len.max(0)).unwrap_or(u32::MAX);
        Some(TextChangeRange::new(span, TextSize::from(new_len)))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EditError {
    #[error("edit range {range:?} is out of bounds for text length {text_len:?}")]
    RangeOutOfBounds { range: TextRange, text_len: TextSize },
    #[error("offset {offset:?} is not a char boundary")]
    InvalidUtf8Boundary { offset: TextSize },
    #[error("edit {first:?} overlaps edit {second:?}")]
    OverlappingEdits { first: TextRange, second: TextRange },
}

/// Applies a batch of edits, all expressed against `text`.
///
/// Edit order in `edits` does not matter.
pub fn apply_text_edits(text: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    let mut edits = edits.to_vec();
    normalize_text_edits(text, &mut edits)?;

    let growth: i64 = edits.iter().map(TextEdit::growth).sum();
    let capacity = usize::try_from(text.len() as i64 + growth).unwrap_or(0);
    let mut out = String::with_capacity(capacity);
    let mut cursor = 0;
    for edit in &edits {
        let start = usize::from(edit.range.start());
        out.push_str(&text[cursor..start]);
        out.push_str(&edit.replacement);
        cursor = usize::from(edit.range.end());
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

/// Validates `edits` against `text`, sorts them by position and merges edits
/// that touch.
///
/// Two inserts at the same offset are ambiguous and rejected as overlapping.
pub fn normalize_text_edits(text: &str, edits: &mut Vec<TextEdit>) -> Result<(), EditError> {
    let text_len = TextSize::of(text);
    for edit in edits.iter() {
        check_edit(text, text_len, edit.range)?;
    }
    edits.sort_by_key(|edit| (edit.range.start(), edit.range.end()));

    let mut merged: Vec<TextEdit> = Vec::with_capacity(edits.len());
    for edit in edits.drain(..) {
        let Some(last) = merged.last_mut() else {
            merged.push(edit);
            continue;
        };
        let same_point = last.range.is_empty() && edit.range.is_empty() && last.range == edit.range;
        if last.range.end() > edit.range.start() || same_point {
            return Err(EditError::OverlappingEdits {
                first: last.range,
                second: edit.range,
            });
        }
        if last.range.end() == edit.range.start() {
            last.range = last.range.cover(edit.range);
            last.replacement.push_str(&edit.replacement);
        } else {
            merged.push(edit);
        }
    }
    *edits = merged;
    Ok(())
}

fn check_edit(text: &str, text_len: TextSize, range: TextRange) -> Result<(), EditError> {
    if range.end() > text_len {
        return Err(EditError::RangeOutOfBounds { range, text_len });
    }
    for offset in [range.start(), range.end()] {
        if !text.is_char_boundary(usize::from(offset)) {
            return Err(EditError::InvalidUtf8Boundary { offset });
        }
    }
    Ok(())
}
