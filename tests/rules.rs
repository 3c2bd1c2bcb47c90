//! Rule loading across all four accepted schemas.

mod common;

use apksift::rules::{self, RuleSource};
use common::TestEnv;

fn load_fixture(name: &str) -> rules::LocatorMap {
    let env = TestEnv::new();
    let files = env.write_rule_files();
    let (_, path) = files
        .iter()
        .find(|(n, _)| *n == name)
        .expect("unknown fixture");
    rules::load_locators(&[RuleSource::Path(path.clone())])
}

#[test]
fn test_load_all_formats() {
    for (name, _) in common::RULE_FIXTURES {
        let locators = load_fixture(name);
        assert_eq!(locators.len(), 3, "{name} should yield 3 locators");
        // Keys are the raw pattern strings and are necessarily distinct.
        for (key, locator) in &locators {
            assert_eq!(key, &locator.pattern_source);
        }
    }
}

#[test]
fn test_secrets_patterns_db_ids_from_names() {
    let locators = load_fixture("secret_patterns_db.yml");
    let mut ids: Vec<_> = locators.values().map(|l| l.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["aws-access-token", "gcp-api-key", "generic-api-key"]);
}

#[test]
fn test_gitleaks_names_from_ids() {
    let locators = load_fixture("gitleaks.toml");
    let aws = locators
        .values()
        .find(|l| l.id == "aws-access-token")
        .expect("aws rule loaded");
    assert_eq!(aws.name, "Aws Access Token");
    // Keywords carry over as tags; entropy and allowlist are dropped.
    assert!(aws.tags.contains(&"akia".to_string()));
}

#[test]
fn test_simple_key_value_auto_ids() {
    let locators = load_fixture("simple_key_value.json");
    let mut ids: Vec<_> = locators.values().map(|l| l.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(
        ids,
        vec!["aws-access-key-id-value", "gcp-api-key", "generic-api-key"]
    );
}

#[test]
fn test_bundled_name_resolution() {
    let sources = rules::resolve_sources(&["default".to_string()]);
    assert_eq!(sources.len(), 1);
    assert!(matches!(sources[0], RuleSource::Bundled { .. }));

    let locators = rules::load_locators(&sources);
    assert!(!locators.is_empty());
}

#[test]
fn test_every_bundled_set_loads() {
    for name in rules::catalog::names() {
        let sources = rules::resolve_sources(&[name.to_string()]);
        let locators = rules::load_locators(&sources);
        assert!(!locators.is_empty(), "bundled set '{name}' yields locators");
    }
}

#[test]
fn test_unknown_rule_set_skipped() {
    let sources = rules::resolve_sources(&["no-such-set".to_string()]);
    assert!(sources.is_empty());
}

#[test]
fn test_path_wins_over_bundled_name() {
    let env = TestEnv::new();
    let path = env.write_file("default", common::SIMPLE_KEY_VALUE_JSON);
    let sources = rules::resolve_sources(&[path.display().to_string()]);
    assert!(matches!(sources[0], RuleSource::Path(_)));
}

#[test]
fn test_scalar_file_skipped() {
    let env = TestEnv::new();
    let path = env.write_file("scalar.yml", "just a plain string\n");
    let locators = rules::load_locators(&[RuleSource::Path(path)]);
    assert!(locators.is_empty());
}

#[test]
fn test_missing_file_skipped() {
    let locators = rules::load_locators(&[RuleSource::Path("/no/such/rules.json".into())]);
    assert!(locators.is_empty());
}

#[test]
fn test_cross_file_deduplication() {
    let env = TestEnv::new();
    let files = env.write_rule_files();
    let sources: Vec<RuleSource> = files
        .iter()
        .map(|(_, p)| RuleSource::Path(p.clone()))
        .collect();

    let locators = rules::load_locators(&sources);
    // Twelve locators across four files collapse onto five distinct
    // pattern strings: the gcp pattern is shared by all four fixtures,
    // the long generic pattern by three, and each aws variant by two.
    assert_eq!(locators.len(), 5);
}
