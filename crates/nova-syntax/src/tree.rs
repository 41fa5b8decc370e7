use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nova_core::TextChangeRange;
use rowan::GreenNode;

use crate::equivalence::green_equivalent;
use crate::incremental::{reparse_outline, ReparseStrategy};
use crate::parser::{parse_outline, OutlineParse};
use crate::{ParseError, ParseOptions, ParserService, SyntaxNode, SyntaxTree};

/// Language name served by [`OutlineParser`].
pub const OUTLINE_LANGUAGE: &str = "outline";

/// Parser service for the outline grammar.
#[derive(Debug, Default)]
pub struct OutlineParser {
    full_parses: AtomicU64,
}

impl OutlineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of from-scratch parses requested through [`ParserService::parse`].
    pub fn full_parses(&self) -> u64 {
        self.full_parses.load(Ordering::Relaxed)
    }
}

impl ParserService for OutlineParser {
    fn language(&self) -> &str {
        OUTLINE_LANGUAGE
    }

    fn parse(&self, text: &str, options: &ParseOptions, path: Option<&Path>) -> Arc<dyn SyntaxTree> {
        self.full_parses.fetch_add(1, Ordering::Relaxed);
        Arc::new(OutlineTree {
            parse: parse_outline(text),
            options: options.clone(),
            path: path.map(Path::to_path_buf),
            strategy: ReparseStrategy::Full,
        })
    }
}

/// An immutable outline syntax tree.
#[derive(Debug)]
pub struct OutlineTree {
    parse: OutlineParse,
    options: ParseOptions,
    path: Option<PathBuf>,
    strategy: ReparseStrategy,
}

impl OutlineTree {
    pub fn syntax(&self) -> SyntaxNode {
        self.parse.syntax()
    }

    pub fn green(&self) -> &GreenNode {
        &self.parse.green
    }

    /// How this tree was produced from its predecessor.
    pub fn strategy(&self) -> ReparseStrategy {
        self.strategy
    }

    /// Downcasts a tree produced by [`OutlineParser`].
    pub fn from_dyn(tree: &dyn SyntaxTree) -> Option<&OutlineTree> {
        tree.as_any().downcast_ref::<OutlineTree>()
    }
}

impl SyntaxTree for OutlineTree {
    fn file_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn options(&self) -> &ParseOptions {
        &self.options
    }

    fn text(&self) -> String {
        self.syntax().text().to_string()
    }

    fn text_len(&self) -> usize {
        u32::from(self.syntax().text_range().end()) as usize
    }

    fn errors(&self) -> &[ParseError] {
        &self.parse.errors
    }

    fn with_changed_text(&self, new_text: &str, change: TextChangeRange) -> Arc<dyn SyntaxTree> {
        let (parse, strategy) = reparse_outline(&self.parse, change, new_text);
        Arc::new(OutlineTree {
            parse,
            options: self.options.clone(),
            path: self.path.clone(),
            strategy,
        })
    }

    fn is_equivalent_to(&self, other: &dyn SyntaxTree, top_level_only: bool) -> bool {
        match OutlineTree::from_dyn(other) {
            Some(other) => green_equivalent(&self.parse.green, &other.parse.green, top_level_only),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
