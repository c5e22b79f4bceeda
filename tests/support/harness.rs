#![allow(dead_code)]

use std::path::{Path, PathBuf};

use unsafe_drop::program::Program;
use unsafe_drop::reconcile::ReconcileScope;
use unsafe_drop::run::RunSettings;
use unsafe_drop::{Analysis, AnalysisSettings, Analyzer};

pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn load_program(name: &str) -> Program {
    let path = fixtures_dir().join("programs").join(name);
    Program::from_path(&path).unwrap_or_else(|e| panic!("{}: {e}", path.display()))
}

pub fn analyze_with(program: &Program, scope: ReconcileScope, parallel: bool) -> Analysis {
    let settings = AnalysisSettings {
        run: RunSettings {
            parallel,
            ..RunSettings::default()
        },
        scope,
        known: Vec::new(),
    };
    Analyzer::new(settings)
        .analyze(program)
        .expect("analysis should succeed")
}

pub fn analyze(program: &Program, scope: ReconcileScope) -> Analysis {
    analyze_with(program, scope, true)
}
