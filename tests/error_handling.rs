//! Configuration error behavior: the only fatal failures.

mod common;

use apksift::decompiler::{Decompiler, DecompilerConfig, EnjarifyChoice, ToolKind};
use apksift::error::ConfigError;
use common::TestEnv;
use std::path::PathBuf;

#[test]
fn test_no_valid_binaries_is_fatal() {
    let env = TestEnv::new();
    let err = Decompiler::new(DecompilerConfig {
        tools: vec![
            (ToolKind::Jadx, Some(PathBuf::from("/no/such/jadx"))),
            (ToolKind::Cfr, Some(PathBuf::from("/no/such/cfr"))),
        ],
        working_dir: env.path("work"),
        ..DecompilerConfig::default()
    })
    .unwrap_err();

    match err {
        ConfigError::NoValidBinaries { requested } => {
            assert!(requested.contains("jadx"));
            assert!(requested.contains("cfr"));
        }
        other => panic!("expected NoValidBinaries, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn test_enjarify_forbidden_names_the_tools() {
    let env = TestEnv::new();
    let cfr = common::fake_decompiler(env.dir.path());
    let err = Decompiler::new(DecompilerConfig {
        tools: vec![(ToolKind::Cfr, Some(cfr))],
        enjarify_choice: EnjarifyChoice::Never,
        working_dir: env.path("work"),
        ..DecompilerConfig::default()
    })
    .unwrap_err();

    match err {
        ConfigError::EnjarifyForbidden { tools } => assert!(tools.contains("cfr")),
        other => panic!("expected EnjarifyForbidden, got {other:?}"),
    }
}

#[cfg(unix)]
#[test]
fn test_enjarify_missing_binary_is_fatal() {
    let env = TestEnv::new();
    let jadx = common::fake_decompiler(env.dir.path());
    let err = Decompiler::new(DecompilerConfig {
        tools: vec![(ToolKind::Jadx, Some(jadx))],
        enjarify_choice: EnjarifyChoice::Always,
        enjarify_path: Some(PathBuf::from("/no/such/enjarify")),
        working_dir: env.path("work"),
        ..DecompilerConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::EnjarifyMissing));
}

#[cfg(unix)]
#[test]
fn test_one_bad_binary_does_not_abort() {
    let env = TestEnv::new();
    let jadx = common::fake_decompiler(env.dir.path());
    let decompiler = Decompiler::new(DecompilerConfig {
        tools: vec![
            (ToolKind::Jadx, Some(jadx)),
            (ToolKind::Procyon, Some(PathBuf::from("/no/such/procyon"))),
        ],
        working_dir: env.path("work"),
        ..DecompilerConfig::default()
    })
    .expect("valid jadx keeps construction alive");
    assert_eq!(decompiler.binaries().len(), 1);
}

#[test]
fn test_error_messages_are_descriptive() {
    let err = ConfigError::EnjarifyForbidden {
        tools: "cfr, procyon".to_string(),
    };
    let message = err.to_string();
    assert!(message.contains("cfr, procyon"));
    assert!(message.contains("never"));
}
