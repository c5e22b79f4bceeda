mod support;

use std::fs;

use support::harness::{fixtures_dir, load_program};
use unsafe_drop::classifier::{KnownFunction, KnownFunctions, Token};
use unsafe_drop::config;
use unsafe_drop::program::ProgramBuilder;
use unsafe_drop::reconcile::ReconcileScope;
use unsafe_drop::{AnalysisSettings, Analyzer};

#[test]
fn config_can_widen_reconcile_scope() {
    let cfg_path = fixtures_dir().join("config/all_call_sites/unsafe-drop.toml");
    let cfg = config::load_config_file(&cfg_path).expect("config should load");

    let settings = AnalysisSettings::from_config(&cfg);
    assert_eq!(settings.scope, ReconcileScope::AllCallSites);
    assert!(!settings.run.parallel);

    let program = load_program("cross_function.json");
    let analysis = Analyzer::new(settings)
        .analyze(&program)
        .expect("analysis should succeed");
    assert_eq!(analysis.findings.len(), 1);
}

#[test]
fn config_is_found_in_a_parent_directory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let nested = tmp.path().join("target/programs");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(
        tmp.path().join(config::DEFAULT_CONFIG_FILE_NAME),
        "[analysis]\nentry-points = [\"start\"]\n",
    )
    .expect("write config");

    let (path, cfg) = config::load_config(None, &nested)
        .expect("config should load")
        .expect("config should be found");
    assert_eq!(path, tmp.path().join(config::DEFAULT_CONFIG_FILE_NAME));
    assert_eq!(cfg.analysis.entry_points, vec!["start".to_string()]);
}

#[test]
fn missing_config_is_not_an_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let found = config::find_config_file(tmp.path());
    // A config further up the real filesystem would be picked up too.
    if let Some(path) = found {
        assert!(!path.starts_with(tmp.path()));
    }
}

#[test]
fn explicit_path_must_parse() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("broken.toml");
    fs::write(&path, "[analysis\n").expect("write config");

    let err = config::load_config(Some(&path), tmp.path()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));
}

#[test]
fn configured_known_functions_drive_classification() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join(config::DEFAULT_CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
[[classifier.known]]
name = "mycrate::Slab::release"
token = "drop"
consumers = [0]
"#,
    )
    .expect("write config");
    let cfg = config::load_config_file(&path).expect("config should load");
    assert_eq!(
        cfg.classifier.known,
        vec![KnownFunction {
            name: "mycrate::Slab::release".to_string(),
            token: Token::Drop,
            consumers: vec![0],
            factory_outputs: vec![],
        }]
    );

    let known = AnalysisSettings::from_config(&cfg).known_functions();
    assert_eq!(
        known.get("mycrate::Slab::release").map(|k| k.token),
        Some(Token::Drop)
    );
    assert_eq!(known.len(), KnownFunctions::builtin().len() + 1);

    let mut b = ProgramBuilder::new();
    let s = b.value("s");
    let p = b.value("p");
    let v = b.value("v");
    b.define("main", &[], |f| {
        f.call("alloc::vec::Vec<u8>::as_mut_ptr", &[s], Some(p));
        f.call("alloc::vec::Vec<u8>::from_raw_parts", &[p], Some(v));
        f.call("mycrate::Slab::release", &[p], None);
        f.call("mycrate::Slab::release", &[p], None);
        f.call("alloc::vec::Vec<u8>::from_raw_parts", &[p], None);
        f.ret(None);
    });
    let program = b.build();

    let plain = Analyzer::new(AnalysisSettings::default())
        .analyze(&program)
        .expect("analysis");
    assert!(plain.findings.is_empty());

    let configured = Analyzer::new(AnalysisSettings::from_config(&cfg))
        .analyze(&program)
        .expect("analysis");
    assert_eq!(configured.findings.len(), 1);
}

#[test]
fn out_of_range_known_positions_are_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join(config::DEFAULT_CONFIG_FILE_NAME);
    fs::write(
        &path,
        r#"
[[classifier.known]]
name = "x::f"
token = "unsafe-construct"
consumers = [-1]
"#,
    )
    .expect("write config");
    let err = config::load_config_file(&path).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("failed to parse config file"));
    assert!(msg.contains("consumer position -1"));
}

#[test]
fn empty_entry_points_are_rejected_before_solving() {
    let mut settings = AnalysisSettings::default();
    settings.run.entry_points.clear();
    let err = Analyzer::new(settings)
        .analyze(&load_program("clean.json"))
        .unwrap_err();
    assert!(matches!(err, unsafe_drop::error::UnsafeDropError::Config(_)));
}
