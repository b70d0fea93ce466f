//! Markdown extraction with YAML frontmatter.
//!
//! A document that begins with a `---` line followed by a YAML block closed
//! by another `---` line yields that block as the frontmatter mapping and the
//! remainder as the body. Only mapping results count; a YAML scalar or array
//! between the fences, a parse error, or a missing closing fence all mean
//! "no frontmatter" and the whole input is the body. A lone `---` later in
//! the document is ordinary content.

use serde_json::{Map, Value};

use super::ExtractedText;

pub fn extract(input: &str) -> ExtractedText {
    match split_frontmatter(input) {
        Some((frontmatter, body)) => ExtractedText {
            text: body.to_string(),
            frontmatter: Some(frontmatter),
            data: None,
        },
        None => ExtractedText::plain(input.to_string()),
    }
}

/// Split `input` into (frontmatter mapping, body) when a valid fence pair
/// opens the document.
fn split_frontmatter(input: &str) -> Option<(Map<String, Value>, &str)> {
    let rest = input.strip_prefix("---")?;
    // The opening fence must be a whole line.
    let rest = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n'))?;

    let (yaml, body) = find_closing_fence(rest)?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(yaml).ok()?;
    let json = serde_json::to_value(parsed).ok()?;
    match json {
        Value::Object(map) => Some((map, body)),
        _ => None,
    }
}

/// Find the first line that is exactly `---` and split around it.
fn find_closing_fence(rest: &str) -> Option<(&str, &str)> {
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let body_start = offset + line.len();
            return Some((&rest[..offset], &rest[body_start..]));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frontmatter_and_body_split() {
        let doc = "---\ntitle: Hello\ntags:\n  - api\n---\n\n# H\n\nBody.";
        let out = extract(doc);
        let fm = out.frontmatter.expect("frontmatter");
        assert_eq!(fm.get("title"), Some(&json!("Hello")));
        assert_eq!(fm.get("tags"), Some(&json!(["api"])));
        assert_eq!(out.text, "\n# H\n\nBody.");
    }

    #[test]
    fn no_fence_means_whole_body() {
        let out = extract("# Just a heading\n");
        assert!(out.frontmatter.is_none());
        assert_eq!(out.text, "# Just a heading\n");
    }

    #[test]
    fn lone_fence_inside_body_is_content() {
        let doc = "intro\n---\nnot frontmatter\n";
        let out = extract(doc);
        assert!(out.frontmatter.is_none());
        assert_eq!(out.text, doc);
    }

    #[test]
    fn unclosed_fence_means_no_frontmatter() {
        let doc = "---\ntitle: Hello\nno closing fence";
        let out = extract(doc);
        assert!(out.frontmatter.is_none());
        assert_eq!(out.text, doc);
    }

    #[test]
    fn scalar_yaml_is_not_frontmatter() {
        let doc = "---\njust a string\n---\nbody";
        let out = extract(doc);
        assert!(out.frontmatter.is_none());
        assert_eq!(out.text, doc);
    }

    #[test]
    fn array_yaml_is_not_frontmatter() {
        let doc = "---\n- a\n- b\n---\nbody";
        assert!(extract(doc).frontmatter.is_none());
    }

    #[test]
    fn crlf_fences_are_accepted() {
        let doc = "---\r\ntitle: Hi\r\n---\r\nbody";
        let out = extract(doc);
        assert_eq!(out.frontmatter.expect("frontmatter").get("title"), Some(&json!("Hi")));
        assert_eq!(out.text, "body");
    }

    #[test]
    fn invalid_yaml_is_not_frontmatter() {
        let doc = "---\n{ broken: [\n---\nbody";
        assert!(extract(doc).frontmatter.is_none());
    }
}
