//! Error types for apksift.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Only configuration errors are fatal;
//! everything else degrades to a logged warning and a skipped item.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum SiftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal configuration errors, raised before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no usable decompiler binaries (requested: {requested})")]
    NoValidBinaries { requested: String },

    #[error("enjarify is required for {tools} but --enjarify-choice is 'never'")]
    EnjarifyForbidden { tools: String },

    #[error("enjarify binary not found on PATH and no override given")]
    EnjarifyMissing,

    #[error("cannot create working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-file or per-locator rule loading failures.
///
/// These are never fatal to a run; the loader logs them and skips
/// the offending file or locator.
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("rule set '{name}' is neither a file nor a bundled rule set")]
    UnknownRuleSet { name: String },

    #[error("{path}: not decodable as JSON, YAML, or TOML")]
    Undecodable { path: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("locator '{id}': secret group {group} does not exist in pattern")]
    SecretGroup { id: String, group: String },

    #[error("malformed locator entry: {reason}")]
    Malformed { reason: String },
}

/// Result serialization failures.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Result type alias for rule loading.
pub type RuleResult<T> = std::result::Result<T, RuleError>;
