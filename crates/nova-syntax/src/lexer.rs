use crate::SyntaxKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: SyntaxKind,
    /// Length in bytes.
    pub len: u32,
}

/// Splits `text` into tokens. Lossless: token lengths sum to `text.len()`.
///
/// The only multi-line-sensitive token is `//` comments, which stop before
/// the line terminator. Every other token is decided by its first character,
/// so lexing can restart at any token boundary.
pub fn lex(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(first) = rest.chars().next() {
        let (kind, len) = if first.is_whitespace() {
            (SyntaxKind::Whitespace, prefix_len(rest, char::is_whitespace))
        } else if rest.starts_with("//") {
            let len = rest.find(['\n', '\r']).unwrap_or(rest.len());
            (SyntaxKind::LineComment, len)
        } else if first.is_alphabetic() || first == '_' {
            (
                SyntaxKind::Ident,
                prefix_len(rest, |c| c.is_alphanumeric() || c == '_'),
            )
        } else if first.is_ascii_digit() {
            (SyntaxKind::Number, prefix_len(rest, |c| c.is_ascii_digit()))
        } else {
            let kind = match first {
                '{' => SyntaxKind::LBrace,
                '}' => SyntaxKind::RBrace,
                ';' => SyntaxKind::Semicolon,
                _ => SyntaxKind::Punct,
            };
            (kind, first.len_utf8())
        };

        tokens.push(Token {
            kind,
            len: len as u32,
        });
        rest = &rest[len..];
    }

    tokens
}

fn prefix_len(text: &str, pred: impl Fn(char) -> bool) -> usize {
    text.char_indices()
        .find(|&(_, c)| !pred(c))
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
