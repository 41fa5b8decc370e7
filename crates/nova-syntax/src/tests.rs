use std::path::Path;
use std::sync::Arc;

use nova_core::TextChangeRange;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::{
    green_equivalent, parse_outline, OutlineLanguage, OutlineParser, OutlineTree, ParseOptions,
    ParserService, ReparseStrategy, SourceKind, SyntaxKind, SyntaxTree,
};

const PROPTEST_CASES: u32 = 256;

#[test]
fn syntax_kind_raw_roundtrip_is_total_for_valid_range() {
    use rowan::Language;

    for raw in 0..SyntaxKind::__Last as u16 {
        let kind = OutlineLanguage::kind_from_raw(rowan::SyntaxKind(raw));
        assert_eq!(OutlineLanguage::kind_to_raw(kind).0, raw);
    }
    assert_eq!(
        OutlineLanguage::kind_from_raw(rowan::SyntaxKind(u16::MAX)),
        SyntaxKind::Error
    );
}

#[test]
fn parser_service_produces_lossless_trees() {
    let parser = OutlineParser::new();
    let options = ParseOptions {
        kind: SourceKind::Script,
        ..ParseOptions::default()
    }
    .with_feature("preview");
    let text = "module m { fn main() { run; } }";

    let tree = parser.parse(text, &options, Some(Path::new("/src/main.outline")));
    assert_eq!(tree.text(), text);
    assert_eq!(tree.text_len(), text.len());
    assert_eq!(tree.options(), &options);
    assert_eq!(tree.file_path(), Some(Path::new("/src/main.outline")));
    assert!(tree.errors().is_empty());
    assert_eq!(parser.full_parses(), 1);
}

#[test]
fn changed_text_keeps_options_and_path() {
    let parser = OutlineParser::new();
    let old_text = "fn f() { a; }";
    let new_text = "fn f() { a; b; }";
    let tree = parser.parse(old_text, &ParseOptions::default(), Some(Path::new("f.outline")));

    let new_tree = tree.with_changed_text(new_text, TextChangeRange::between(old_text, new_text));
    assert_eq!(new_tree.text(), new_text);
    assert_eq!(new_tree.file_path(), Some(Path::new("f.outline")));
    assert_eq!(
        OutlineTree::from_dyn(new_tree.as_ref()).unwrap().strategy(),
        ReparseStrategy::Incremental
    );
    // Incremental reparses do not go through the parser service.
    assert_eq!(parser.full_parses(), 1);

    assert!(tree.is_equivalent_to(new_tree.as_ref(), true));
    assert!(!tree.is_equivalent_to(new_tree.as_ref(), false));
}

#[derive(Debug)]
struct ForeignTree;

impl SyntaxTree for ForeignTree {
    fn file_path(&self) -> Option<&Path> {
        None
    }

    fn options(&self) -> &ParseOptions {
        unimplemented!()
    }

    fn text(&self) -> String {
        String::new()
    }

    fn text_len(&self) -> usize {
        0
    }

    fn errors(&self) -> &[crate::ParseError] {
        &[]
    }

    fn with_changed_text(&self, _: &str, _: TextChangeRange) -> Arc<dyn SyntaxTree> {
        Arc::new(ForeignTree)
    }

    fn is_equivalent_to(&self, _: &dyn SyntaxTree, _: bool) -> bool {
        false
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[test]
fn trees_of_other_languages_are_never_equivalent() {
    let tree = OutlineParser::new().parse("", &ParseOptions::default(), None);
    assert!(!tree.is_equivalent_to(&ForeignTree, true));
}

fn arb_piece() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "class A ", "fn f() ", "x", "y1", " ", "\n", "{", "}", ";", "// c\n", "module ", "(", ")",
        "é", "if z ",
    ])
}

fn arb_source() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_piece(), 0..24).prop_map(|pieces| pieces.concat())
}

fn char_boundaries(text: &str) -> Vec<usize> {
    let mut out: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    out.push(text.len());
    out
}

/// A source text plus one replacement edit on character boundaries.
fn arb_edit() -> impl Strategy<Value = (String, String)> {
    (arb_source(), prop::collection::vec(arb_piece(), 0..3)).prop_flat_map(|(text, insert)| {
        let points = char_boundaries(&text);
        let insert = insert.concat();
        (Just(text), Just(insert), prop::sample::select(points.clone()), prop::sample::select(points))
            .prop_map(|(text, insert, a, b)| {
                let (start, end) = if a <= b { (a, b) } else { (b, a) };
                let mut new_text = text.clone();
                new_text.replace_range(start..end, &insert);
                (text, new_text)
            })
    })
}

/// Sources whose edits land inside a body, so the incremental path is taken.
fn arb_body_edit() -> impl Strategy<Value = (String, String)> {
    (arb_source(), arb_source(), prop::collection::vec(arb_piece(), 0..4)).prop_map(
        |(before, body, insert)| {
            let insert: String = insert.concat();
            let balanced_body = body.replace(['{', '}'], "");
            // The `;` terminates any unfinished item so `target` never joins a container.
            let text = format!("{before}\n;\nfn target() {{ {balanced_body} }}\n");
            let offset = text.rfind('}').unwrap_or(text.len());
            let mut new_text = text.clone();
            new_text.insert_str(offset, &insert.replace(['{', '}'], ""));
            (text, new_text)
        },
    )
}

fn check_incremental_matches_full(old: &str, new: &str) -> Result<ReparseStrategy, TestCaseError> {
    let parser = OutlineParser::new();
    let tree = parser.parse(old, &ParseOptions::default(), None);
    let reparsed = tree.with_changed_text(new, TextChangeRange::between(old, new));
    let full = parse_outline(new);

    let reparsed = OutlineTree::from_dyn(reparsed.as_ref()).unwrap();
    prop_assert_eq!(reparsed.text(), new);
    prop_assert_eq!(reparsed.green(), &full.green);
    prop_assert_eq!(reparsed.errors(), full.errors.as_slice());
    prop_assert!(green_equivalent(reparsed.green(), &full.green, false));
    Ok(reparsed.strategy())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: PROPTEST_CASES, .. ProptestConfig::default() })]

    #[test]
    fn incremental_reparse_matches_full_parse((old, new) in arb_edit()) {
        check_incremental_matches_full(&old, &new)?;
    }

    #[test]
    fn body_edits_reparse_incrementally((old, new) in arb_body_edit()) {
        let strategy = check_incremental_matches_full(&old, &new)?;
        // Comments in the inserted text can swallow the closing brace.
        if !new.contains("//") && old != new {
            prop_assert_eq!(strategy, ReparseStrategy::Incremental);
        }
    }
}
