//! Result grouping and serialization.
//!
//! Results render to plain records and group by original input file, by
//! locator id, or both. Attribution back to an input goes through the
//! decompile outcome whose file set contains the result's file path.

use crate::error::OutputError;
use crate::types::{DecompileOutcome, SecretResult};
use ahash::AHashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Text,
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            other => Err(format!("unknown output format '{other}'")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Yaml => write!(f, "yaml"),
        }
    }
}

/// How results are grouped in the output document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    File,
    Locator,
    #[default]
    Both,
}

impl FromStr for GroupBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "locator" => Ok(Self::Locator),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown groupby '{other}'")),
        }
    }
}

/// Default output path: `./secrets_output.<format>`.
#[must_use]
pub fn default_output_path(format: OutputFormat) -> PathBuf {
    PathBuf::from(format!("./secrets_output.{}", format.extension()))
}

/// One result as a plain record.
fn record(result: &SecretResult) -> Value {
    json!({
        "secret": result.secret_string(),
        "file_path": result.file_path.display().to_string(),
        "line_number": result.line_number,
        "locator": result.locator.id,
    })
}

/// Groups results per the chosen strategy into one serializable tree.
#[must_use]
pub fn group_results(
    results: &[SecretResult],
    outcomes: &[DecompileOutcome],
    groupby: GroupBy,
) -> Value {
    match groupby {
        GroupBy::File => Value::Object(by_input_file(results, outcomes)),
        GroupBy::Locator => Value::Object(by_locator(results)),
        GroupBy::Both => json!({
            "by_file": by_input_file(results, outcomes),
            "by_locator": by_locator(results),
        }),
    }
}

fn by_input_file(results: &[SecretResult], outcomes: &[DecompileOutcome]) -> Map<String, Value> {
    // Scanned file -> originating input, via outcome membership.
    let mut origin: AHashMap<&Path, &Path> = AHashMap::new();
    for outcome in outcomes {
        if let Some(files) = &outcome.decompiled_files {
            for file in files {
                origin.entry(file.as_path()).or_insert(&outcome.input_path);
            }
        }
    }

    let mut grouped = Map::new();
    for result in results {
        let Some(input) = origin.get(result.file_path.as_path()) else {
            tracing::debug!(
                "result in {} has no decompile outcome; omitted from by-file grouping",
                result.file_path.display()
            );
            continue;
        };
        let key = input.display().to_string();
        push_record(&mut grouped, key, result);
    }
    grouped
}

fn by_locator(results: &[SecretResult]) -> Map<String, Value> {
    let mut grouped = Map::new();
    for result in results {
        push_record(&mut grouped, result.locator.id.clone(), result);
    }
    grouped
}

fn push_record(grouped: &mut Map<String, Value>, key: String, result: &SecretResult) {
    if let Value::Array(list) = grouped.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
        list.push(record(result));
    }
}

/// Writes the grouped tree to `path` in the chosen format.
///
/// JSON uses a 4-space indent; YAML uses block style; text is the
/// pretty-printed mapping.
///
/// # Errors
///
/// Returns `OutputError` when the file cannot be created or
/// serialization fails.
pub fn write_output(path: &Path, format: OutputFormat, value: &Value) -> Result<(), OutputError> {
    let file = std::fs::File::create(path).map_err(|source| OutputError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(file);

    match format {
        OutputFormat::Json => {
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
            let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
            value.serialize(&mut ser)?;
        }
        OutputFormat::Yaml => serde_yaml::to_writer(&mut writer, value)?,
        OutputFormat::Text => {
            write!(writer, "{value:#}").map_err(|source| OutputError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    writer.flush().map_err(|source| OutputError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::compile_pattern;
    use crate::types::{SecretGroup, SecretLocator};
    use std::sync::Arc;

    fn result(secret: &[u8], file: &str, line: u64, locator_id: &str) -> SecretResult {
        SecretResult {
            secret: secret.to_vec(),
            file_path: PathBuf::from(file),
            line_number: line,
            locator: Arc::new(SecretLocator {
                id: locator_id.to_string(),
                name: locator_id.to_string(),
                pattern: compile_pattern("x").unwrap(),
                pattern_source: "x".to_string(),
                secret_group: SecretGroup::default(),
                description: None,
                confidence: None,
                severity: None,
                tags: Vec::new(),
            }),
        }
    }

    fn outcome(input: &str, files: &[&str]) -> DecompileOutcome {
        DecompileOutcome {
            input_path: PathBuf::from(input),
            output_dir: PathBuf::from("/out"),
            decompiled_files: Some(files.iter().map(PathBuf::from).collect()),
            success: true,
        }
    }

    #[test]
    fn test_by_file_attributes_to_input() {
        let results = vec![
            result(b"AKIA123", "/out/a/Main.java", 3, "aws"),
            result(b"AIza456", "/out/a/Api.java", 7, "gcp"),
        ];
        let outcomes = vec![outcome("app.apk", &["/out/a/Main.java", "/out/a/Api.java"])];

        let grouped = group_results(&results, &outcomes, GroupBy::File);
        let list = grouped.get("app.apk").and_then(Value::as_array).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["secret"], "AKIA123");
        assert_eq!(list[0]["line_number"], 3);
        assert_eq!(list[1]["locator"], "gcp");
    }

    #[test]
    fn test_by_locator_keys_on_id() {
        let results = vec![
            result(b"a", "/f1", 1, "aws"),
            result(b"b", "/f2", 2, "aws"),
            result(b"c", "/f3", 3, "gcp"),
        ];
        let grouped = group_results(&results, &[], GroupBy::Locator);
        assert_eq!(grouped["aws"].as_array().unwrap().len(), 2);
        assert_eq!(grouped["gcp"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_both_emits_both_mappings() {
        let results = vec![result(b"a", "/out/f", 1, "aws")];
        let outcomes = vec![outcome("x.jar", &["/out/f"])];
        let grouped = group_results(&results, &outcomes, GroupBy::Both);
        assert!(grouped.get("by_file").is_some());
        assert!(grouped.get("by_locator").is_some());
    }

    #[test]
    fn test_invalid_utf8_secret_renders_escaped() {
        let r = result(&[0xde, 0xad, b'!'], "/f", 1, "bin");
        let rec = record(&r);
        assert_eq!(rec["secret"], "\\xde\\xad!");
    }

    #[test]
    fn test_default_output_paths() {
        assert_eq!(
            default_output_path(OutputFormat::Json),
            PathBuf::from("./secrets_output.json")
        );
        assert_eq!(
            default_output_path(OutputFormat::Text),
            PathBuf::from("./secrets_output.txt")
        );
    }

    #[test]
    fn test_write_json_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let results = vec![result(b"tok", "/out/f", 2, "aws")];
        let outcomes = vec![outcome("a.apk", &["/out/f"])];
        let grouped = group_results(&results, &outcomes, GroupBy::Both);

        write_output(&path, OutputFormat::Json, &grouped).unwrap();
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, grouped);
    }
}
