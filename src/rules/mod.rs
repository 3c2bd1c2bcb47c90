//! Multi-format secret locator loading.
//!
//! Each rule file is decoded by trying JSON, YAML, and TOML in order,
//! accepting the first decode whose top-level value is a container. The
//! decoded tree is then classified into one of four schemas and
//! normalized into [`SecretLocator`]s keyed by raw pattern string, so
//! logically identical patterns from different files collapse
//! deterministically.
//!
//! Loading never aborts a run: an undecodable file or a malformed locator
//! is logged and skipped.

pub mod catalog;
mod pattern;

pub use pattern::{compile_pattern, group_exists};

use crate::error::{RuleError, RuleResult};
use crate::types::{SecretGroup, SecretLocator};
use ahash::AHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Locators keyed by raw pattern string.
pub type LocatorMap = AHashMap<String, Arc<SecretLocator>>;

/// A rule source: a file on disk or a bundled, named rule set.
#[derive(Debug, Clone)]
pub enum RuleSource {
    Path(PathBuf),
    Bundled {
        name: String,
        contents: &'static str,
    },
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Bundled { name, .. } => write!(f, "bundled:{name}"),
        }
    }
}

/// Resolves `--rules` arguments to sources: an existing path wins,
/// otherwise the bundled catalogue is consulted by name. Unresolvable
/// entries are dropped with a warning.
#[must_use]
pub fn resolve_sources(specs: &[String]) -> Vec<RuleSource> {
    let mut sources = Vec::with_capacity(specs.len());
    for spec in specs {
        let path = PathBuf::from(spec);
        if path.is_file() {
            sources.push(RuleSource::Path(path));
        } else if let Some(contents) = catalog::lookup(spec) {
            sources.push(RuleSource::Bundled {
                name: spec.clone(),
                contents,
            });
        } else {
            tracing::warn!(
                "{}; skipping (bundled sets: {})",
                RuleError::UnknownRuleSet { name: spec.clone() },
                catalog::names().join(", ")
            );
        }
    }
    sources
}

/// Loads and merges locators from every source. Later sources overwrite
/// earlier ones on identical pattern strings.
#[must_use]
pub fn load_locators(sources: &[RuleSource]) -> LocatorMap {
    let mut locators = LocatorMap::new();
    for source in sources {
        let contents = match source {
            RuleSource::Path(path) => match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("cannot read rule file {}: {e}; skipping", path.display());
                    continue;
                }
            },
            RuleSource::Bundled { contents, .. } => (*contents).to_string(),
        };

        let Some(value) = decode_container(&contents) else {
            tracing::warn!(
                "{}",
                RuleError::Undecodable {
                    path: source.to_string()
                }
            );
            continue;
        };

        let before = locators.len();
        load_value(value, &mut locators);
        tracing::debug!(
            "loaded {} locators from {source}",
            locators.len().saturating_sub(before)
        );
    }
    tracing::info!("loaded {} secret locators", locators.len());
    locators
}

/// Tries JSON, YAML, then TOML; accepts the first decode whose top-level
/// value is a list or mapping rather than a scalar.
fn decode_container(contents: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(contents) {
        if is_container(&v) {
            return Some(v);
        }
    }
    if let Ok(v) = serde_yaml::from_str::<Value>(contents) {
        if is_container(&v) {
            return Some(v);
        }
    }
    if let Ok(v) = toml::from_str::<Value>(contents) {
        if is_container(&v) {
            return Some(v);
        }
    }
    None
}

fn is_container(value: &Value) -> bool {
    value.is_array() || value.is_object()
}

/// The four recognized rule file layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleSchema {
    /// List of locator mappings with a `pattern` string.
    Native,
    /// Mapping with a `patterns` list of `{pattern: {regex, name, ...}}`.
    SecretsPatternsDb,
    /// Mapping with a `rules` list of `{id, regex, secretGroup?, ...}`.
    Gitleaks,
    /// Any other mapping of name to pattern string(s).
    SimpleKeyValue,
}

impl RuleSchema {
    fn detect(value: &Value) -> Self {
        if value.is_array() {
            Self::Native
        } else if value.get("patterns").is_some_and(Value::is_array) {
            Self::SecretsPatternsDb
        } else if value.get("rules").is_some_and(Value::is_array) {
            Self::Gitleaks
        } else {
            Self::SimpleKeyValue
        }
    }
}

fn load_value(value: Value, locators: &mut LocatorMap) {
    match RuleSchema::detect(&value) {
        RuleSchema::Native => load_native(value, locators),
        RuleSchema::SecretsPatternsDb => load_secrets_patterns_db(value, locators),
        RuleSchema::Gitleaks => load_gitleaks(value, locators),
        RuleSchema::SimpleKeyValue => load_simple_key_value(value, locators),
    }
}

/// Intermediate form shared by all schemas before compilation.
struct RawLocator {
    id: Option<String>,
    name: Option<String>,
    pattern: String,
    secret_group: SecretGroup,
    description: Option<String>,
    confidence: Option<String>,
    severity: Option<String>,
    tags: Vec<String>,
}

impl RawLocator {
    /// Synthesizes missing identity, compiles the pattern, and validates
    /// the secret group.
    fn finish(self) -> RuleResult<(String, SecretLocator)> {
        let (id, name) = match (self.id, self.name) {
            (Some(id), Some(name)) => (id, name),
            (Some(id), None) => {
                let name = title_case(&id);
                (id, name)
            }
            (None, Some(name)) => (kebab_case(&name), name),
            (None, None) => {
                return Err(RuleError::Malformed {
                    reason: format!("locator for pattern {:?} has neither id nor name", self.pattern),
                })
            }
        };

        let compiled = compile_pattern(&self.pattern)?;
        if !group_exists(&compiled, &self.secret_group) {
            return Err(RuleError::SecretGroup {
                id,
                group: self.secret_group.to_string(),
            });
        }

        Ok((
            self.pattern.clone(),
            SecretLocator {
                id,
                name,
                pattern: compiled,
                pattern_source: self.pattern,
                secret_group: self.secret_group,
                description: self.description,
                confidence: self.confidence,
                severity: self.severity,
                tags: self.tags,
            },
        ))
    }
}

fn insert(locators: &mut LocatorMap, raw: RawLocator) {
    match raw.finish() {
        Ok((key, locator)) => {
            locators.insert(key, Arc::new(locator));
        }
        Err(e) => tracing::warn!("skipping locator: {e}"),
    }
}

#[derive(Deserialize)]
struct NativeEntry {
    id: Option<String>,
    name: Option<String>,
    pattern: String,
    #[serde(default)]
    secret_group: Option<SecretGroup>,
    description: Option<String>,
    confidence: Option<String>,
    severity: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn load_native(value: Value, locators: &mut LocatorMap) {
    let Value::Array(entries) = value else { return };
    for entry in entries {
        match serde_json::from_value::<NativeEntry>(entry) {
            Ok(e) => insert(
                locators,
                RawLocator {
                    id: e.id,
                    name: e.name,
                    pattern: e.pattern,
                    secret_group: e.secret_group.unwrap_or_default(),
                    description: e.description,
                    confidence: e.confidence,
                    severity: e.severity,
                    tags: e.tags,
                },
            ),
            Err(e) => tracing::warn!(
                "skipping locator: {}",
                RuleError::Malformed {
                    reason: e.to_string()
                }
            ),
        }
    }
}

#[derive(Deserialize)]
struct SpdbEntry {
    pattern: SpdbPattern,
}

#[derive(Deserialize)]
struct SpdbPattern {
    name: String,
    regex: String,
    confidence: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

fn load_secrets_patterns_db(mut value: Value, locators: &mut LocatorMap) {
    let Some(entries) = value.get_mut("patterns").map(Value::take) else {
        return;
    };
    let Value::Array(entries) = entries else { return };
    for entry in entries {
        match serde_json::from_value::<SpdbEntry>(entry) {
            Ok(e) => insert(
                locators,
                RawLocator {
                    id: Some(kebab_case(&e.pattern.name)),
                    name: Some(e.pattern.name),
                    pattern: e.pattern.regex,
                    secret_group: SecretGroup::default(),
                    description: e.pattern.description,
                    confidence: e.pattern.confidence,
                    severity: None,
                    tags: e.pattern.tags,
                },
            ),
            Err(e) => tracing::warn!(
                "skipping locator: {}",
                RuleError::Malformed {
                    reason: e.to_string()
                }
            ),
        }
    }
}

#[derive(Deserialize)]
struct GitleaksRule {
    id: String,
    regex: String,
    description: Option<String>,
    #[serde(rename = "secretGroup")]
    secret_group: Option<usize>,
    #[serde(default)]
    keywords: Vec<String>,
    // `entropy` and `allowlist` are validity classification, which this
    // tool does not do; both are dropped here.
}

fn load_gitleaks(mut value: Value, locators: &mut LocatorMap) {
    let Some(entries) = value.get_mut("rules").map(Value::take) else {
        return;
    };
    let Value::Array(entries) = entries else { return };
    for entry in entries {
        match serde_json::from_value::<GitleaksRule>(entry) {
            Ok(r) => insert(
                locators,
                RawLocator {
                    name: Some(title_case(&r.id)),
                    id: Some(r.id),
                    pattern: r.regex,
                    secret_group: r.secret_group.map_or_else(SecretGroup::default, SecretGroup::Index),
                    description: r.description,
                    confidence: None,
                    severity: None,
                    tags: r.keywords,
                },
            ),
            Err(e) => tracing::warn!(
                "skipping locator: {}",
                RuleError::Malformed {
                    reason: e.to_string()
                }
            ),
        }
    }
}

fn load_simple_key_value(value: Value, locators: &mut LocatorMap) {
    let Value::Object(entries) = value else { return };
    for (name, patterns) in entries {
        let patterns: Vec<String> = match patterns {
            Value::String(s) => vec![s],
            Value::Array(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            other => {
                tracing::warn!(
                    "skipping locator: {}",
                    RuleError::Malformed {
                        reason: format!("'{name}' maps to {other} rather than pattern string(s)")
                    }
                );
                continue;
            }
        };

        for (i, pattern) in patterns.into_iter().enumerate() {
            let (id, display) = if i == 0 {
                (kebab_case(&name), name.clone())
            } else {
                (format!("{}-{i}", kebab_case(&name)), format!("{name} {i}"))
            };
            insert(
                locators,
                RawLocator {
                    id: Some(id),
                    name: Some(display),
                    pattern,
                    secret_group: SecretGroup::default(),
                    description: None,
                    confidence: None,
                    severity: None,
                    tags: Vec::new(),
                },
            );
        }
    }
}

/// `"AWS Access Token"` → `"aws-access-token"`.
fn kebab_case(name: &str) -> String {
    name.replace(' ', "-").to_lowercase()
}

/// `"aws-access-token"` → `"Aws Access Token"`.
fn title_case(id: &str) -> String {
    id.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
