mod support;

use std::collections::BTreeSet;

use support::harness::{analyze, analyze_with, load_program};
use unsafe_drop::classifier::Token;
use unsafe_drop::program::{InstId, ProgramBuilder, ValueId};
use unsafe_drop::reconcile::ReconcileScope;
use unsafe_drop::state::{ErrorKind, State};

fn states(list: &[State]) -> BTreeSet<State> {
    list.iter().copied().collect()
}

#[test]
fn rewrap_after_free_in_one_function() {
    let program = load_program("uaf_rewrap.json");
    let analysis = analyze(&program, ReconcileScope::UnsafeConstructSites);

    assert_eq!(analysis.findings.len(), 1);
    let finding = &analysis.findings[0];
    assert_eq!(finding.instruction, InstId(4));
    assert_eq!(finding.function, "main");
    assert_eq!(finding.token, Token::UnsafeConstruct);
    assert_eq!(finding.kinds, BTreeSet::from([ErrorKind::UseAfterFree]));
    assert_eq!(
        finding.values.get(&ValueId(1)),
        Some(&states(&[State::UseAfterFreeError]))
    );
    assert_eq!(
        finding.values.get(&ValueId(2)),
        Some(&states(&[State::RawWrapped]))
    );
    assert_eq!(finding.values.len(), 2);
}

#[test]
fn rewrap_after_double_drop() {
    let program = load_program("double_free.json");
    let analysis = analyze(&program, ReconcileScope::UnsafeConstructSites);

    assert_eq!(analysis.findings.len(), 1);
    let finding = &analysis.findings[0];
    assert_eq!(finding.instruction, InstId(4));
    assert_eq!(finding.kinds, BTreeSet::from([ErrorKind::DoubleFree]));
    assert_eq!(
        finding.states(),
        states(&[State::RawWrapped, State::DoubleFreeError])
    );
}

#[test]
fn cross_function_drop_is_reported_once_at_the_drop() {
    let program = load_program("cross_function.json");
    let analysis = analyze(&program, ReconcileScope::AllCallSites);

    assert_eq!(analysis.findings.len(), 1, "{:#?}", analysis.findings);
    let finding = &analysis.findings[0];
    assert_eq!(finding.instruction, InstId(4));
    assert_eq!(finding.function, "consume");
    assert_eq!(finding.token, Token::Drop);
    assert_eq!(
        finding.values.get(&ValueId(6)),
        Some(&states(&[State::UseAfterFreeError]))
    );
    assert_eq!(
        finding.values.get(&ValueId(7)),
        Some(&states(&[State::RawWrapped]))
    );
}

#[test]
fn cross_function_drop_is_outside_construct_scope() {
    let program = load_program("cross_function.json");
    let analysis = analyze(&program, ReconcileScope::UnsafeConstructSites);
    assert!(analysis.findings.is_empty());
}

#[test]
fn neither_run_alone_reports() {
    let program = load_program("uaf_rewrap.json");
    let analysis = analyze(&program, ReconcileScope::AllCallSites);

    // The consuming run never sees the rebuilt owner.
    assert!(analysis.runs.consuming.states_of(ValueId(2)).is_none());
    // The factory run sees it, but only as a live owner.
    assert_eq!(
        analysis.runs.factory.states_of(ValueId(2)),
        Some(&states(&[State::RawWrapped]))
    );
    assert_eq!(analysis.findings.len(), 1);
}

#[test]
fn one_finding_per_instruction() {
    let mut b = ProgramBuilder::new();
    let s = b.value("s");
    let p = b.value("p");
    let q = b.value("q");
    let v = b.value("v");
    let w = b.value("w");
    b.define("main", &[], |f| {
        f.call("alloc::vec::Vec<u8>::as_mut_ptr", &[s], Some(p));
        f.call("alloc::vec::Vec<u8>::as_mut_ptr", &[s], Some(q));
        f.call("alloc::vec::Vec<u8>::from_raw_parts", &[p], Some(v));
        f.call("core::ptr::drop_in_place<u8>", &[p], None);
        f.call("core::ptr::drop_in_place<u8>", &[q], None);
        f.call("core::ptr::drop_in_place<u8>", &[q], None);
        f.call("core::ptr::read<u8>", &[p], None);
        f.call("alloc::vec::Vec<u8>::from_raw_parts", &[p], Some(w));
        f.ret(None);
    });
    let program = b.build();

    let analysis = analyze_with(&program, ReconcileScope::UnsafeConstructSites, false);
    assert_eq!(analysis.findings.len(), 1);
    let finding = &analysis.findings[0];
    assert_eq!(finding.instruction, InstId(7));
    assert_eq!(
        finding.kinds,
        BTreeSet::from([ErrorKind::UseAfterFree, ErrorKind::DoubleFree])
    );
    assert_eq!(
        finding.values.keys().copied().collect::<Vec<_>>(),
        vec![p, q, v]
    );
}

#[test]
fn analysis_is_deterministic() {
    let program = load_program("cross_function.json");
    let first = analyze_with(&program, ReconcileScope::AllCallSites, true);
    let second = analyze_with(&program, ReconcileScope::AllCallSites, false);
    assert_eq!(first.findings, second.findings);
    assert_eq!(first.runs, second.runs);
}
