//! Bundled rule catalogue.
//!
//! The `rules/` asset directory is embedded at build time; symbolic
//! rule-set names given to `--rules` resolve against it by file stem.

use include_dir::{include_dir, Dir};

static BUNDLED_RULES: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/rules");

/// Rule set used when `--rules` is not given.
pub const DEFAULT_RULE_SET: &str = "default";

/// Looks up a bundled rule set by stem or full file name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static str> {
    BUNDLED_RULES
        .files()
        .find(|f| {
            f.path().file_stem().is_some_and(|s| s == name)
                || f.path().file_name().is_some_and(|s| s == name)
        })
        .and_then(include_dir::File::contents_utf8)
}

/// Names of all bundled rule sets, for help output.
#[must_use]
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUNDLED_RULES
        .files()
        .filter_map(|f| f.path().file_stem())
        .filter_map(|s| s.to_str())
        .collect();
    names.sort_unstable();
    names
}
