use rowan::{GreenNode, GreenNodeBuilder};
use text_size::{TextRange, TextSize};

use crate::lexer::{lex, Token};
use crate::{ParseError, SyntaxKind, SyntaxNode};

/// Identifiers that turn an item's brace block into a member list.
pub const CONTAINER_KEYWORDS: &[&str] = &["class", "interface", "module", "namespace"];

/// Result of parsing a complete outline source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineParse {
    pub green: GreenNode,
    pub errors: Vec<ParseError>,
}

impl OutlineParse {
    pub fn syntax(&self) -> SyntaxNode {
        SyntaxNode::new_root(self.green.clone())
    }
}

pub fn parse_outline(text: &str) -> OutlineParse {
    let mut parser = Parser::new(text);
    parser.source_file();
    parser.finish()
}

/// Parses `text` as exactly one balanced block of `kind` (`Body` or `Block`).
///
/// Returns `None` unless the whole fragment is consumed by a single
/// terminated block without errors.
pub(crate) fn parse_block_fragment(text: &str, kind: SyntaxKind) -> Option<GreenNode> {
    debug_assert!(kind.is_reparsable_block());

    let mut parser = Parser::new(text);
    if parser.current() != Some(SyntaxKind::LBrace) {
        return None;
    }
    parser.block(kind);
    if !parser.at_eof() || !parser.errors.is_empty() {
        return None;
    }
    Some(parser.builder.finish())
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    offset: u32,
    builder: GreenNodeBuilder<'static>,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            tokens: lex(text),
            pos: 0,
            offset: 0,
            builder: GreenNodeBuilder::new(),
            errors: Vec::new(),
        }
    }

    fn finish(self) -> OutlineParse {
        OutlineParse {
            green: self.builder.finish(),
            errors: self.errors,
        }
    }

    fn current(&self) -> Option<SyntaxKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn current_text(&self) -> &'a str {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let start = self.offset as usize;
                &self.text[start..start + token.len as usize]
            }
            None => "",
        }
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bump(&mut self) {
        let Some(token) = self.tokens.get(self.pos).copied() else {
            return;
        };
        let text = self.current_text();
        self.builder.token(token.kind.into(), text);
        self.offset += token.len;
        self.pos += 1;
    }

    fn bump_trivia(&mut self) {
        while self.current().is_some_and(SyntaxKind::is_trivia) {
            self.bump();
        }
    }

    fn error_here(&mut self, message: &str) {
        let at = TextSize::from(self.offset);
        self.errors.push(ParseError {
            message: message.to_string(),
            range: TextRange::empty(at),
        });
    }

    fn source_file(&mut self) {
        self.builder.start_node(SyntaxKind::SourceFile.into());
        loop {
            self.bump_trivia();
            match self.current() {
                None => break,
                Some(SyntaxKind::RBrace) => {
                    self.error_here("unexpected `}`");
                    self.builder.start_node(SyntaxKind::Error.into());
                    self.bump();
                    self.builder.finish_node();
                }
                Some(_) => self.item(),
            }
        }
        self.builder.finish_node();
    }

    fn item(&mut self) {
        self.builder.start_node(SyntaxKind::Item.into());
        let mut container = false;
        loop {
            match self.current() {
                None => {
                    self.error_here("expected `;` or `{`");
                    break;
                }
                Some(SyntaxKind::Semicolon) => {
                    self.bump();
                    break;
                }
                Some(SyntaxKind::LBrace) => {
                    if container {
                        self.member_list();
                    } else {
                        self.block(SyntaxKind::Body);
                    }
                    break;
                }
                Some(SyntaxKind::RBrace) => {
                    // Left for the enclosing member list to close.
                    self.error_here("expected `;` or `{`");
                    break;
                }
                Some(SyntaxKind::Ident) => {
                    container |= CONTAINER_KEYWORDS.contains(&self.current_text());
                    self.bump();
                }
                Some(_) => self.bump(),
            }
        }
        self.builder.finish_node();
    }

    fn member_list(&mut self) {
        self.builder.start_node(SyntaxKind::MemberList.into());
        self.bump();
        loop {
            self.bump_trivia();
            match self.current() {
                None => {
                    self.error_here("unterminated member list");
                    break;
                }
                Some(SyntaxKind::RBrace) => {
                    self.bump();
                    break;
                }
                Some(_) => self.item(),
            }
        }
        self.builder.finish_node();
    }

    fn block(&mut self, kind: SyntaxKind) {
        self.builder.start_node(kind.into());
        self.bump();
        loop {
            match self.current() {
                None => {
                    self.error_here("unterminated block");
                    break;
                }
                Some(SyntaxKind::RBrace) => {
                    self.bump();
                    break;
                }
                Some(SyntaxKind::LBrace) => self.block(SyntaxKind::Block),
                Some(_) => self.bump(),
            }
        }
        self.builder.finish_node();
    }
}
