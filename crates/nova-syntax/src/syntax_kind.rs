use rowan::Language;

/// Token and node kinds of the outline grammar.
///
/// The outline grammar only knows about the brace structure of a file:
/// items terminated by `;` or a brace block, member lists that nest further
/// items, and opaque bodies whose contents are never part of the item's
/// signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SyntaxKind {
    // Tokens
    Whitespace = 0,
    LineComment,
    Ident,
    Number,
    Punct,
    Semicolon,
    LBrace,
    RBrace,

    // Nodes
    SourceFile,
    /// A declaration: signature tokens followed by `;`, a member list or a body.
    Item,
    /// `{ item* }` owned by a container item (`class`, `module`, ...).
    MemberList,
    /// `{ ... }` owned by a non-container item.
    Body,
    /// A nested `{ ... }` inside a body.
    Block,
    Error,

    #[doc(hidden)]
    __Last,
}

impl SyntaxKind {
    #[inline]
    pub fn is_trivia(self) -> bool {
        matches!(self, SyntaxKind::Whitespace | SyntaxKind::LineComment)
    }

    /// Nodes whose contents can be reparsed in isolation.
    #[inline]
    pub fn is_reparsable_block(self) -> bool {
        matches!(self, SyntaxKind::Body | SyntaxKind::Block)
    }
}

impl From<SyntaxKind> for rowan::SyntaxKind {
    fn from(value: SyntaxKind) -> Self {
        rowan::SyntaxKind(value as u16)
    }
}

/// Rowan language marker for the outline grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutlineLanguage {}

impl Language for OutlineLanguage {
    type Kind = SyntaxKind;

    fn kind_from_raw(raw: rowan::SyntaxKind) -> SyntaxKind {
        if raw.0 < SyntaxKind::__Last as u16 {
            // SAFETY: the value is within the range of the `repr(u16)` enum.
            unsafe { std::mem::transmute::<u16, SyntaxKind>(raw.0) }
        } else {
            SyntaxKind::Error
        }
    }

    fn kind_to_raw(kind: SyntaxKind) -> rowan::SyntaxKind {
        kind.into()
    }
}

pub type SyntaxNode = rowan::SyntaxNode<OutlineLanguage>;
pub type SyntaxToken = rowan::SyntaxToken<OutlineLanguage>;
pub type SyntaxElement = rowan::SyntaxElement<OutlineLanguage>;
