//! Parser service interfaces and the outline reference parser.
//!
//! The workspace model never looks inside syntax trees. It needs four
//! capabilities, expressed by [`ParserService`] and [`SyntaxTree`]:
//! - a full parse of a text,
//! - an incremental reparse of an existing tree against a changed text,
//! - structural equivalence, optionally restricted to top-level
//!   declarations (signatures, not bodies),
//! - the text a tree was parsed from.
//!
//! Languages plug in by implementing these traits. [`OutlineParser`] is the
//! built-in implementation: a lossless rowan tree over the brace structure of
//! a file, with block-level incremental reparsing.

mod equivalence;
mod incremental;
mod lexer;
mod parser;
mod syntax_kind;
mod tree;

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use nova_core::TextChangeRange;
use serde::{Deserialize, Serialize};
use text_size::TextRange;

pub use equivalence::green_equivalent;
pub use incremental::{reparse_outline, ReparseStrategy};
pub use lexer::{lex, Token};
pub use parser::{parse_outline, OutlineParse, CONTAINER_KEYWORDS};
pub use syntax_kind::{OutlineLanguage, SyntaxElement, SyntaxKind, SyntaxNode, SyntaxToken};
pub use tree::{OutlineParser, OutlineTree, OUTLINE_LANGUAGE};

/// Kind of source a document holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Regular,
    Script,
}

/// Options that influence parsing.
///
/// Changing a document's options always forces a full parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub kind: SourceKind,
    pub features: BTreeSet<String>,
}

impl ParseOptions {
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    pub message: String,
    pub range: TextRange,
}

/// An immutable syntax tree produced by a [`ParserService`].
pub trait SyntaxTree: Send + Sync + fmt::Debug {
    fn file_path(&self) -> Option<&Path>;

    fn options(&self) -> &ParseOptions;

    /// The full text the tree was parsed from.
    fn text(&self) -> String;

    fn text_len(&self) -> usize;

    fn errors(&self) -> &[ParseError];

    /// Incrementally reparses against `new_text`, where `change` is the
    /// encompassing change from this tree's text to `new_text`.
    fn with_changed_text(&self, new_text: &str, change: TextChangeRange) -> Arc<dyn SyntaxTree>;

    /// Structural equivalence ignoring trivia. With `top_level_only`, only
    /// declarations visible to dependents are compared.
    fn is_equivalent_to(&self, other: &dyn SyntaxTree, top_level_only: bool) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Full parser for one language.
pub trait ParserService: Send + Sync + fmt::Debug {
    fn language(&self) -> &str;

    fn parse(&self, text: &str, options: &ParseOptions, path: Option<&Path>) -> Arc<dyn SyntaxTree>;
}

#[cfg(test)]
mod tests;
