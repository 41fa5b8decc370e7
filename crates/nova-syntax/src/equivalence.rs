use rowan::{GreenNodeData, GreenTokenData, NodeOrToken};

use crate::SyntaxKind;

/// Structural equivalence of two green trees, ignoring trivia and positions.
///
/// With `top_level_only`, the contents of item bodies are ignored as well:
/// two trees are then equivalent when they declare the same items with the
/// same signatures. Subtrees shared between the two trees (as produced by
/// incremental reparsing) compare equal without being walked.
pub fn green_equivalent(a: &GreenNodeData, b: &GreenNodeData, top_level_only: bool) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    if a.kind() != b.kind() {
        return false;
    }
    if top_level_only && a.kind() == SyntaxKind::Body.into() {
        return true;
    }

    let mut left = significant_children(a);
    let mut right = significant_children(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return true,
            (Some(NodeOrToken::Node(l)), Some(NodeOrToken::Node(r))) => {
                if !green_equivalent(l, r, top_level_only) {
                    return false;
                }
            }
            (Some(NodeOrToken::Token(l)), Some(NodeOrToken::Token(r))) => {
                if !tokens_equal(l, r) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

fn significant_children<'a>(
    node: &'a GreenNodeData,
) -> impl Iterator<Item = NodeOrToken<&'a GreenNodeData, &'a GreenTokenData>> + 'a {
    node.children().filter(|child| match child {
        NodeOrToken::Token(token) => !is_trivia(token),
        NodeOrToken::Node(_) => true,
    })
}

fn is_trivia(token: &GreenTokenData) -> bool {
    token.kind() == SyntaxKind::Whitespace.into() || token.kind() == SyntaxKind::LineComment.into()
}

fn tokens_equal(a: &GreenTokenData, b: &GreenTokenData) -> bool {
    a.kind() == b.kind() && a.text() == b.text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_outline;

    fn equivalent(a: &str, b: &str, top_level_only: bool) -> bool {
        let a = parse_outline(a);
        let b = parse_outline(b);
        green_equivalent(&a.green, &b.green, top_level_only)
    }

    #[test]
    fn trivia_is_ignored() {
        assert!(equivalent(
            "class A { fn f() { x; } }",
            "class   A {\n  // doc\n  fn f() {\n    x;\n  }\n}",
            false
        ));
    }

    #[test]
    fn body_edits_are_not_top_level_changes() {
        let before = "class A { fn f() { x; } field; }";
        let after = "class A { fn f() { y { z; } } field; }";
        assert!(equivalent(before, after, true));
        assert!(!equivalent(before, after, false));
    }

    #[test]
    fn signature_and_member_edits_are_top_level_changes() {
        let base = "class A { fn f() { x; } }";
        assert!(!equivalent(base, "class A { fn g() { x; } }", true));
        assert!(!equivalent(base, "class A { fn f() { x; } fn h(); }", true));
        assert!(!equivalent(base, "class B { fn f() { x; } }", true));
    }
}
