//! HTML extraction.
//!
//! Parses the document, drops `script` and `style` subtrees, and returns the
//! concatenated body text. Documents with no `body` element fall back to the
//! text of the whole document.

use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};

use super::ExtractedText;

pub fn extract(input: &str) -> ExtractedText {
    let document = Html::parse_document(input);

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    collect_text(*root, &mut text);
    ExtractedText::plain(text.trim().to_string())
}

/// Depth-first text collection that skips script/style subtrees.
fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    if let Some(el) = node.value().as_element() {
        let name = el.name();
        if name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style") {
            return;
        }
    }
    if let Some(t) = node.value().as_text() {
        out.push_str(t);
    }
    for child in node.children() {
        collect_text(child, out);
    }
}
