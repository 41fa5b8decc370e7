use nova_core::TextChangeRange;
use text_size::{TextRange, TextSize};

use crate::parser::{parse_block_fragment, parse_outline, OutlineParse};
use crate::{ParseError, SyntaxKind, SyntaxNode};

/// How a tree was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReparseStrategy {
    /// Parsed from scratch.
    Full,
    /// One body block was reparsed and spliced into the previous tree.
    Incremental,
    /// An incremental reparse was requested but a full parse was needed.
    FullFallback,
}

#[derive(Debug)]
struct ReparsePlan {
    target: SyntaxNode,
    /// Range of the reparsed block in the *old* text.
    old_range: TextRange,
    /// Range of the reparsed block in the *new* text.
    new_range: TextRange,
}

/// Reparses `new_text` reusing `old` where possible.
///
/// Only the innermost body block that strictly contains the change (braces
/// excluded) is reparsed. Anything else, including an edit that touches a
/// brace, a block that was never closed, or a fragment that no longer forms
/// exactly one balanced block, falls back to a full parse. The result is
/// always identical to `parse_outline(new_text)`.
pub fn reparse_outline(
    old: &OutlineParse,
    change: TextChangeRange,
    new_text: &str,
) -> (OutlineParse, ReparseStrategy) {
    let fallback = |reason: &'static str| {
        tracing::trace!(target = "nova.syntax", reason, "incremental reparse fell back to full parse");
        (parse_outline(new_text), ReparseStrategy::FullFallback)
    };

    let old_len = i64::from(u32::from(old.syntax().text_range().end()));
    if old_len + change.delta() != new_text.len() as i64 {
        return fallback("change does not match new text length");
    }

    let Some(plan) = build_plan(old, change) else {
        return fallback("no enclosing body block");
    };

    let start = u32::from(plan.new_range.start()) as usize;
    let end = u32::from(plan.new_range.end()) as usize;
    if end > new_text.len() || !new_text.is_char_boundary(start) || !new_text.is_char_boundary(end)
    {
        return fallback("block range is not on character boundaries");
    }

    let Some(fragment) = parse_block_fragment(&new_text[start..end], plan.target.kind()) else {
        return fallback("fragment is not a single balanced block");
    };

    let green = plan.target.replace_with(fragment);
    let errors = shift_errors(&old.errors, plan.old_range, change.delta());

    let result = OutlineParse { green, errors };
    debug_assert_eq!(result.syntax().text().to_string(), new_text);
    (result, ReparseStrategy::Incremental)
}

fn build_plan(old: &OutlineParse, change: TextChangeRange) -> Option<ReparsePlan> {
    let edit = change.span;
    let target = old
        .syntax()
        .descendants()
        .filter(|node| node.kind().is_reparsable_block())
        .filter(|node| strictly_inside(edit, node.text_range()))
        .last()?;

    // A block that hit end of file has no closing brace to anchor the splice.
    if target.last_token().map(|t| t.kind()) != Some(SyntaxKind::RBrace) {
        return None;
    }

    let old_range = target.text_range();
    let new_end = i64::from(u32::from(old_range.end())) + change.delta();
    let new_end = u32::try_from(new_end).ok()?;
    let new_range = TextRange::new(old_range.start(), TextSize::from(new_end));

    Some(ReparsePlan {
        target,
        old_range,
        new_range,
    })
}

/// `edit` lies between the block's braces without touching either of them.
fn strictly_inside(edit: TextRange, block: TextRange) -> bool {
    let one = TextSize::from(1);
    block.len() >= TextSize::from(2)
        && edit.start() >= block.start() + one
        && edit.end() <= block.end() - one
}

/// The reparsed block had no errors before and has none after; everything
/// behind it moves by `delta`.
fn shift_errors(errors: &[ParseError], old_range: TextRange, delta: i64) -> Vec<ParseError> {
    errors
        .iter()
        .map(|error| {
            if error.range.start() < old_range.end() {
                return error.clone();
            }
            let shift = |offset: TextSize| {
                TextSize::from((i64::from(u32::from(offset)) + delta).max(0) as u32)
            };
            ParseError {
                message: error.message.clone(),
                range: TextRange::new(shift(error.range.start()), shift(error.range.end())),
            }
        })
        .collect()
}
