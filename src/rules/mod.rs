//! Inference rule engine.
//!
//! Rules are declared in config as a JSON-Schema match object, a `set`
//! mapping of template values, and an optional transform (inline or a name
//! into the shared `maps` table). Compilation turns each match schema into a
//! validator extended with a string-level `glob` keyword; evaluation runs
//! matching rules in declaration order and merges their output.

pub mod transform;

use std::collections::HashMap;
use std::path::Path;

use jsonschema::paths::{LazyLocation, Location};
use jsonschema::{Keyword, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::AppError;
use crate::extract::{ExtractedText, extension_of};
use crate::identity::forward_slash;

// ── File attributes ───────────────────────────────────────────────────────────

/// Derived per-file view used for rule matching and template resolution.
/// Constructed on demand; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttributes {
    /// Full path, forward-slash normalized.
    pub path: String,
    pub dir: String,
    pub name: String,
    /// Extension including the leading dot, lowercased.
    pub ext: String,
    pub size: u64,
    /// Last-modified timestamp, ISO-8601.
    pub modified: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontmatter: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl FileAttributes {
    /// Build attributes for `path` from its on-disk metadata and extraction
    /// output.
    pub fn from_path(path: &Path, extracted: &ExtractedText) -> Result<Self, AppError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| AppError::Rules(format!("stat {}: {e}", path.display())))?;
        let modified = meta
            .modified()
            .map(|t| {
                chrono::DateTime::<chrono::Utc>::from(t)
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            })
            .unwrap_or_default();

        let full = forward_slash(&path.to_string_lossy());
        let dir = path
            .parent()
            .map(|p| forward_slash(&p.to_string_lossy()))
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: full,
            dir,
            name,
            ext: extension_of(path),
            size: meta.len(),
            modified,
            frontmatter: extracted.frontmatter.clone(),
            data: extracted.data.clone(),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ── Rule types ────────────────────────────────────────────────────────────────

/// One declared inference rule.
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceRule {
    /// JSON-Schema object matched against the file attributes.
    #[serde(rename = "match")]
    pub match_schema: Value,
    /// Metadata assignments; string values support `${dotted.path}` templates.
    #[serde(default)]
    pub set: Map<String, Value>,
    /// Optional transform: inline definition or a name into the shared table.
    #[serde(default)]
    pub transform: Option<TransformSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransformSpec {
    Named(String),
    Inline(Value),
}

/// A rule plus its compiled matcher.
pub struct CompiledRule {
    pub rule: InferenceRule,
    matcher: Validator,
}

impl CompiledRule {
    pub fn matches(&self, attrs: &Value) -> bool {
        self.matcher.is_valid(attrs)
    }
}

/// Shared named-transform table (the config's `maps` section).
pub type NamedTransforms = HashMap<String, Value>;

/// Compiled rules plus the named-transform table they resolve against.
/// Swapped as a whole on config reload.
pub struct RuleSet {
    pub rules: Vec<CompiledRule>,
    pub maps: NamedTransforms,
}

impl RuleSet {
    pub fn compile(rules: Vec<InferenceRule>, maps: NamedTransforms) -> Result<Self, AppError> {
        Ok(Self { rules: compile(rules)?, maps })
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new(), maps: NamedTransforms::new() }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run all matching rules against `attrs` in declaration order.
    pub fn evaluate(&self, attrs: &FileAttributes) -> Map<String, Value> {
        evaluate(&self.rules, &self.maps, attrs)
    }
}

// ── Compilation ───────────────────────────────────────────────────────────────

/// Compile every rule's match schema. Any invalid schema is a configuration
/// error and fails the whole load.
pub fn compile(rules: Vec<InferenceRule>) -> Result<Vec<CompiledRule>, AppError> {
    rules
        .into_iter()
        .enumerate()
        .map(|(i, rule)| {
            let matcher = jsonschema::options()
                .with_keyword("glob", glob_keyword_factory)
                .build(&rule.match_schema)
                .map_err(|e| AppError::Rules(format!("rule {i}: invalid match schema: {e}")))?;
            Ok(CompiledRule { rule, matcher })
        })
        .collect()
}

/// String-level `glob` keyword: the instance matches a glob pattern with
/// gitignore-style semantics (`*`/`?` stop at separators, `**` crosses them,
/// dot files match by default).
struct GlobKeyword {
    pattern: glob::Pattern,
}

const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl Keyword for GlobKeyword {
    fn validate<'i>(
        &self,
        instance: &'i Value,
        location: &LazyLocation,
    ) -> Result<(), ValidationError<'i>> {
        if self.is_valid(instance) {
            Ok(())
        } else {
            Err(ValidationError::custom(
                Location::new(),
                location.into(),
                instance,
                "glob pattern mismatch",
            ))
        }
    }

    fn is_valid(&self, instance: &Value) -> bool {
        match instance.as_str() {
            Some(s) => self.pattern.matches_with(s, GLOB_OPTIONS),
            // Like other string-level keywords, non-strings are out of scope.
            None => true,
        }
    }
}

fn glob_keyword_factory<'a>(
    _parent: &'a Map<String, Value>,
    value: &'a Value,
    path: Location,
) -> Result<Box<dyn Keyword>, ValidationError<'a>> {
    let Some(pattern) = value.as_str() else {
        return Err(ValidationError::custom(
            Location::new(),
            path,
            value,
            "glob keyword expects a string pattern",
        ));
    };
    match glob::Pattern::new(pattern) {
        Ok(pattern) => Ok(Box::new(GlobKeyword { pattern })),
        Err(e) => Err(ValidationError::custom(
            Location::new(),
            path,
            value,
            format!("invalid glob pattern: {e}"),
        )),
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

/// Run all matching rules in declaration order and return the merged
/// mapping. Within one rule, transform output overrides `set` output;
/// across rules, later rules override earlier ones.
pub fn evaluate(
    rules: &[CompiledRule],
    maps: &NamedTransforms,
    attrs: &FileAttributes,
) -> Map<String, Value> {
    let attrs_value = attrs.to_value();
    let env = json!({ "input": attrs_value });
    let mut merged = Map::new();

    for compiled in rules {
        if !compiled.matches(&attrs_value) {
            continue;
        }

        for (key, value) in &compiled.rule.set {
            merged.insert(key.clone(), resolve_template_value(value, &attrs_value));
        }

        let Some(spec) = &compiled.rule.transform else {
            continue;
        };
        let def = match spec {
            TransformSpec::Inline(def) => def,
            TransformSpec::Named(name) => match maps.get(name) {
                Some(def) => def,
                None => {
                    warn!(map = %name, path = %attrs.path, "named transform not found, skipping");
                    continue;
                }
            },
        };

        match transform::parse(def).and_then(|expr| transform::eval(&expr, &env)) {
            Ok(Value::Object(out)) => merged.extend(out),
            Ok(other) => {
                warn!(path = %attrs.path, output = %other, "transform produced non-mapping output, discarding");
            }
            Err(e) => {
                warn!(path = %attrs.path, error = %e, "transform failed, skipping");
            }
        }
    }

    merged
}

/// Substitute `${dotted.path}` occurrences in string values; other values
/// pass through unchanged.
fn resolve_template_value(value: &Value, attrs: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_template(s, attrs)),
        other => other.clone(),
    }
}

fn resolve_template(template: &str, attrs: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup_as_string(attrs, &after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                // Unclosed placeholder: keep it literally.
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Missing and null resolve to the empty string; strings insert directly;
/// anything else inserts its JSON form.
fn lookup_as_string(attrs: &Value, dotted: &str) -> String {
    let mut cur = attrs;
    for seg in dotted.split('.') {
        match cur.as_object().and_then(|m| m.get(seg)) {
            Some(next) => cur = next,
            None => return String::new(),
        }
    }
    match cur {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(path: &str, frontmatter: Option<Value>) -> FileAttributes {
        FileAttributes {
            path: path.to_string(),
            dir: path.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default(),
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            ext: ".md".to_string(),
            size: 42,
            modified: "2026-07-01T12:00:00Z".to_string(),
            frontmatter: frontmatter.and_then(|v| v.as_object().cloned()),
            data: None,
        }
    }

    fn rule(json_rule: Value) -> InferenceRule {
        serde_json::from_value(json_rule).expect("rule deserializes")
    }

    #[test]
    fn glob_keyword_matches_paths() {
        let rules = compile(vec![rule(json!({
            "match": {
                "type": "object",
                "properties": { "path": { "glob": "**/meetings/*.md" } },
                "required": ["path"]
            },
            "set": { "domain": "meetings" }
        }))])
        .expect("compile");

        let hit = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/meetings/standup.md", None));
        assert_eq!(hit.get("domain"), Some(&json!("meetings")));

        let miss = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/notes/standup.md", None));
        assert!(miss.is_empty());
    }

    #[test]
    fn later_rule_wins_on_key_conflict() {
        let rules = compile(vec![
            rule(json!({ "match": { "type": "object" }, "set": { "k": "first" } })),
            rule(json!({ "match": { "type": "object" }, "set": { "k": "second" } })),
        ])
        .expect("compile");

        let out = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/a.md", None));
        assert_eq!(out.get("k"), Some(&json!("second")));
    }

    #[test]
    fn transform_wins_over_set_within_a_rule() {
        let rules = compile(vec![rule(json!({
            "match": { "type": "object" },
            "set": { "k": "from-set" },
            "transform": { "k": "from-transform" }
        }))])
        .expect("compile");

        let out = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/a.md", None));
        assert_eq!(out.get("k"), Some(&json!("from-transform")));
    }

    #[test]
    fn template_substitutes_attributes() {
        let rules = compile(vec![rule(json!({
            "match": { "type": "object" },
            "set": {
                "source": "file ${name} in ${dir}",
                "missing": "<${nope.deep}>",
                "size_note": "${size} bytes"
            }
        }))])
        .expect("compile");

        let out = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/docs/a.md", None));
        assert_eq!(out.get("source"), Some(&json!("file a.md in /w/docs")));
        assert_eq!(out.get("missing"), Some(&json!("<>")));
        assert_eq!(out.get("size_note"), Some(&json!("42 bytes")));
    }

    #[test]
    fn named_transform_resolves_from_maps() {
        let rules = compile(vec![rule(json!({
            "match": { "type": "object" },
            "transform": "project_from_dir"
        }))])
        .expect("compile");

        let mut maps = NamedTransforms::new();
        maps.insert(
            "project_from_dir".to_string(),
            json!({ "project": { "$fn": "slice", "args": [
                { "$fn": "split", "args": ["$.input.dir", "/"] }, -1
            ] } }),
        );

        let out = evaluate(&rules, &maps, &attrs("/w/alpha/a.md", None));
        assert_eq!(out.get("project"), Some(&json!(["alpha"])));
    }

    #[test]
    fn missing_named_transform_keeps_set_output() {
        let rules = compile(vec![rule(json!({
            "match": { "type": "object" },
            "set": { "kept": true },
            "transform": "no_such_map"
        }))])
        .expect("compile");

        let out = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/a.md", None));
        assert_eq!(out.get("kept"), Some(&json!(true)));
    }

    #[test]
    fn non_mapping_transform_output_is_discarded() {
        let rules = compile(vec![rule(json!({
            "match": { "type": "object" },
            "set": { "kept": 1 },
            "transform": { "$fn": "toLowerCase", "args": ["ABC"] }
        }))])
        .expect("compile");

        let out = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/a.md", None));
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("kept"), Some(&json!(1)));
    }

    #[test]
    fn frontmatter_is_matchable() {
        let rules = compile(vec![rule(json!({
            "match": {
                "type": "object",
                "properties": {
                    "frontmatter": {
                        "type": "object",
                        "properties": { "kind": { "const": "adr" } },
                        "required": ["kind"]
                    }
                },
                "required": ["frontmatter"]
            },
            "set": { "domain": "decisions" }
        }))])
        .expect("compile");

        let hit = evaluate(
            &rules,
            &NamedTransforms::new(),
            &attrs("/w/a.md", Some(json!({ "kind": "adr" }))),
        );
        assert_eq!(hit.get("domain"), Some(&json!("decisions")));

        let miss = evaluate(&rules, &NamedTransforms::new(), &attrs("/w/a.md", None));
        assert!(miss.is_empty());
    }

    #[test]
    fn invalid_schema_is_a_config_error() {
        let result = compile(vec![rule(json!({
            "match": { "type": "not-a-type" }
        }))]);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_glob_pattern_fails_compile() {
        let result = compile(vec![rule(json!({
            "match": { "type": "object", "properties": { "path": { "glob": "[unclosed" } } }
        }))]);
        assert!(result.is_err());
    }
}
