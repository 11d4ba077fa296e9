//! Call-script templates
//!
//! A template is an assistant configuration stored as JSON, with
//! `{{identifier}}` placeholders inside any string value. Placeholders
//! without a matching context key are left verbatim.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("valid regex"));

/// Variables injected into a template
pub type TemplateContext = HashMap<String, ContextValue>;

/// A context variable: text or a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Text(String),
    Number(serde_json::Number),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for ContextValue {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

/// Replace placeholders in every string of a JSON tree
///
/// Non-string scalars are copied unchanged
#[must_use]
pub fn substitute(value: &Value, context: &TemplateContext) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, context)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, context)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, context)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

/// Replace placeholders in a single string
#[must_use]
pub fn substitute_str(text: &str, context: &TemplateContext) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            context
                .get(&caps[1])
                .map_or_else(|| caps[0].to_string(), ToString::to_string)
        })
        .into_owned()
}

/// Catalog of named templates
///
/// Looks in a directory first, then in the templates compiled into the binary
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    dir: PathBuf,
    use_embedded: bool,
}

impl TemplateCatalog {
    /// Templates compiled into the binary
    const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[
        ("default", include_str!("../../templates/default.json")),
        (
            "clinic-blood-test",
            include_str!("../../templates/clinic-blood-test.json"),
        ),
    ];

    /// Create a catalog rooted at a directory, with embedded fallbacks
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            use_embedded: true,
        }
    }

    /// Create a catalog that only reads from the directory
    #[must_use]
    pub fn directory_only(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            use_embedded: false,
        }
    }

    /// Directory templates are read from
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load a template and substitute context variables into it
    ///
    /// # Errors
    ///
    /// Returns `TemplateNotFound` if no template has this name, or the
    /// underlying error if the file exists but cannot be read or parsed
    pub fn resolve(&self, name: &str, context: &TemplateContext) -> Result<Value> {
        let template = self.load(name)?;
        Ok(substitute(&template, context))
    }

    /// Load a template without substitution
    ///
    /// # Errors
    ///
    /// Same as [`Self::resolve`]
    pub fn load(&self, name: &str) -> Result<Value> {
        // Names map to files; anything that could escape the directory is unknown
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(Error::TemplateNotFound(name.to_string()));
        }

        let path = self.dir.join(format!("{name}.json"));
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self
                .embedded(name)
                .ok_or_else(|| Error::TemplateNotFound(name.to_string()))?
                .to_string(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(template = %name, "loaded template");
        Ok(serde_json::from_str(&content)?)
    }

    /// Names of all available templates, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }

        if self.use_embedded {
            names.extend(Self::EMBEDDED_TEMPLATES.iter().map(|(n, _)| (*n).to_string()));
        }

        names.sort();
        names.dedup();
        names
    }

    fn embedded(&self, name: &str) -> Option<&'static str> {
        if !self.use_embedded {
            return None;
        }
        Self::EMBEDDED_TEMPLATES
            .iter()
            .find(|(id, _)| *id == name)
            .map(|(_, json)| *json)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> TemplateContext {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), ContextValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_substitutes_multiple_placeholders() {
        let out = substitute(&json!({ "a": "{{x}}-{{y}}" }), &ctx(&[("x", "1"), ("y", "2")]));
        assert_eq!(out, json!({ "a": "1-2" }));
    }

    #[test]
    fn test_unknown_placeholders_stay_verbatim() {
        let template = json!({ "greeting": "Hello {{name}}" });
        let once = substitute(&template, &TemplateContext::new());
        let twice = substitute(&once, &TemplateContext::new());

        assert_eq!(once, json!({ "greeting": "Hello {{name}}" }));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_recurses_into_arrays_and_objects() {
        let template = json!({
            "model": {
                "messages": [{ "role": "system", "content": "Call {{clinic}} for {{who}}" }],
                "temperature": 0.3
            },
            "endCallFunctionEnabled": true,
            "tags": ["{{clinic}}", null, 7]
        });

        let out = substitute(&template, &ctx(&[("clinic", "Miyashita"), ("who", "Taro")]));

        assert_eq!(
            out,
            json!({
                "model": {
                    "messages": [{ "role": "system", "content": "Call Miyashita for Taro" }],
                    "temperature": 0.3
                },
                "endCallFunctionEnabled": true,
                "tags": ["Miyashita", null, 7]
            })
        );
    }

    #[test]
    fn test_numbers_render_like_json() {
        let mut context = TemplateContext::new();
        context.insert("minutes".to_string(), ContextValue::from(10_i64));

        assert_eq!(substitute_str("{{minutes}} min", &context), "10 min");
    }

    #[test]
    fn test_keys_are_not_substituted() {
        let out = substitute(&json!({ "{{x}}": "{{x}}" }), &ctx(&[("x", "v")]));
        assert_eq!(out, json!({ "{{x}}": "v" }));
    }

    #[test]
    fn test_non_identifier_braces_are_ignored() {
        let context = ctx(&[("a b", "nope")]);
        assert_eq!(substitute_str("{{a b}} {{ }}", &context), "{{a b}} {{ }}");
    }

    #[test]
    fn test_context_value_deserializes_untagged() {
        let context: TemplateContext =
            serde_json::from_value(json!({ "name": "Taro", "age": 42 })).unwrap();

        assert_eq!(context["name"], ContextValue::Text("Taro".to_string()));
        assert_eq!(context["age"].to_string(), "42");
    }

    #[test]
    fn test_loads_from_directory_before_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.json"), r#"{"name":"{{who}}"}"#).unwrap();

        let catalog = TemplateCatalog::new(dir.path());
        let out = catalog.resolve("default", &ctx(&[("who", "local")])).unwrap();

        assert_eq!(out, json!({ "name": "local" }));
    }

    #[test]
    fn test_embedded_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::new(dir.path());

        let out = catalog.load("clinic-blood-test").unwrap();
        assert!(out["firstMessage"].as_str().unwrap().contains("{{patientName}}"));
    }

    #[test]
    fn test_unknown_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::new(dir.path());

        let err = catalog.resolve("no-such-template", &TemplateContext::new()).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(ref n) if n == "no-such-template"));
        assert_eq!(err.to_string(), "Template not found: no-such-template");
    }

    #[test]
    fn test_directory_only_skips_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = TemplateCatalog::directory_only(dir.path());

        assert_eq!(catalog.dir(), dir.path());
        assert!(matches!(catalog.load("default"), Err(Error::TemplateNotFound(_))));
        assert!(catalog.names().is_empty());
    }

    #[test]
    fn test_path_like_names_are_not_found() {
        let catalog = TemplateCatalog::new("templates");
        assert!(matches!(catalog.load("../Cargo"), Err(Error::TemplateNotFound(_))));
        assert!(matches!(catalog.load("a/b"), Err(Error::TemplateNotFound(_))));
    }

    #[test]
    fn test_other_read_failures_are_not_masked() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be fails with something other than NotFound
        std::fs::create_dir(dir.path().join("broken.json")).unwrap();

        let err = TemplateCatalog::new(dir.path()).load("broken").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let err = TemplateCatalog::new(dir.path()).load("bad").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_names_merge_directory_and_embedded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("survey.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let names = TemplateCatalog::new(dir.path()).names();
        assert_eq!(names, vec!["clinic-blood-test", "default", "survey"]);
    }
}
