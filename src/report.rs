//! Rendering of findings, run dumps and lookup tables.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::classifier::{FunctionInfo, Token};
use crate::delta::{ConstructMode, delta};
use crate::program::{InstId, Program, ValueId};
use crate::reconcile::Finding;
use crate::run::{RunPair, RunResult};
use crate::state::{ErrorKind, State};

/// Stable id for a finding, derived from where it is and what it is.
pub fn finding_id(finding: &Finding) -> String {
    let mut hasher = Sha256::new();
    hasher.update(finding.function.as_bytes());
    hasher.update(finding.callee.as_bytes());
    hasher.update(finding.instruction.0.to_string().as_bytes());
    for kind in &finding.kinds {
        hasher.update(kind.as_str().as_bytes());
    }
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

fn state_set(states: &BTreeSet<State>) -> String {
    format!("{{{}}}", states.iter().join(", "))
}

// ============================================================================
// Findings
// ============================================================================

pub fn render_pretty(program: &Program, findings: &[Finding]) -> String {
    let mut out = String::new();
    for finding in findings {
        out.push_str(&format!(
            "finding[{}] at {} in `{}`\n",
            finding.kinds.iter().join(", "),
            finding.instruction,
            finding.function
        ));
        out.push_str(&format!("  call: {} ({})\n", finding.callee, finding.token));
        for (value, states) in &finding.values {
            out.push_str(&format!(
                "  {}: {}\n",
                program.value_label(*value),
                state_set(states)
            ));
        }
        out.push('\n');
    }
    out.push_str(&format!("{} finding(s)\n", findings.len()));
    out
}

#[derive(Serialize)]
struct JsonValue<'a> {
    value: u32,
    name: String,
    states: &'a BTreeSet<State>,
}

#[derive(Serialize)]
struct JsonFinding<'a> {
    id: String,
    instruction: InstId,
    function: &'a str,
    callee: &'a str,
    token: Token,
    kinds: &'a BTreeSet<ErrorKind>,
    values: Vec<JsonValue<'a>>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: String,
    total: usize,
    findings: Vec<JsonFinding<'a>>,
}

pub fn render_json(program: &Program, findings: &[Finding]) -> Result<String, serde_json::Error> {
    render_json_at(program, findings, Utc::now())
}

/// JSON report with an explicit timestamp.
pub fn render_json_at(
    program: &Program,
    findings: &[Finding],
    generated_at: DateTime<Utc>,
) -> Result<String, serde_json::Error> {
    let findings = findings
        .iter()
        .map(|f| JsonFinding {
            id: finding_id(f),
            instruction: f.instruction,
            function: &f.function,
            callee: &f.callee,
            token: f.token,
            kinds: &f.kinds,
            values: f
                .values
                .iter()
                .map(|(v, states)| JsonValue {
                    value: v.0,
                    name: program.value_label(*v),
                    states,
                })
                .collect(),
        })
        .collect_vec();

    let report = JsonReport {
        generated_at: generated_at.to_rfc3339(),
        total: findings.len(),
        findings,
    };
    serde_json::to_string_pretty(&report)
}

// ============================================================================
// Debug output
// ============================================================================

/// Per-value state sets of one run, filtered or not, under a `label` such as
/// `filtered` or `unfiltered`.
pub fn render_run_dump(program: &Program, label: &str, run: &RunResult<State>) -> String {
    let mut out = format!("{label} run {}\n", run.mode());
    if run.states().is_empty() {
        out.push_str("  (no values)\n");
    }
    push_values(&mut out, program, run.states().iter());
    out
}

fn push_values<'a>(
    out: &mut String,
    program: &Program,
    values: impl Iterator<Item = (&'a ValueId, &'a BTreeSet<State>)>,
) {
    for (value, states) in values {
        out.push_str(&format!(
            "  {}: {}\n",
            program.value_label(*value),
            state_set(states)
        ));
    }
}

fn push_section<'a>(
    out: &mut String,
    program: &Program,
    title: &str,
    values: impl Iterator<Item = (&'a ValueId, &'a BTreeSet<State>)>,
) {
    out.push_str(title);
    out.push('\n');
    let before = out.len();
    push_values(out, program, values);
    if out.len() == before {
        out.push_str("  (none)\n");
    }
}

fn has_memory_error(states: &BTreeSet<State>) -> bool {
    states.iter().any(|s| s.is_memory_error())
}

fn has_raw_companion(states: &BTreeSet<State>) -> bool {
    has_memory_error(states)
        && (states.contains(&State::RawReferenced) || states.contains(&State::RawWrapped))
}

/// Values that reached a use-after-free or double-free in either filtered run.
///
/// The trailing sections also list error values that were raw-referenced or
/// raw-wrapped, per run and merged over both runs. They are informational:
/// reconciliation joins raw-wrapped companions only.
pub fn render_error_values(program: &Program, runs: &RunPair) -> String {
    let mut out = String::new();
    for run in runs.runs() {
        push_section(
            &mut out,
            program,
            &format!("error values ({})", run.mode()),
            run.states().iter().filter(|(_, set)| has_memory_error(set)),
        );
    }
    for run in runs.runs() {
        push_section(
            &mut out,
            program,
            &format!(
                "error values also raw-referenced or raw-wrapped ({}, not reconciled)",
                run.mode()
            ),
            run.states().iter().filter(|(_, set)| has_raw_companion(set)),
        );
    }
    let merged = runs.merged_states();
    push_section(
        &mut out,
        program,
        "error values also raw-referenced or raw-wrapped (merged, not reconciled)",
        merged.iter().filter(|(_, set)| has_raw_companion(set)),
    );
    out
}

/// Full transition table, one block per construct mode.
pub fn render_delta_table() -> String {
    let width = State::ALL
        .iter()
        .map(|s| s.as_str().len())
        .max()
        .unwrap_or_default();
    let mut out = String::new();
    for mode in ConstructMode::BOTH {
        out.push_str(&format!("{mode}\n"));
        out.push_str(&format!(
            "{:width$}  {}\n",
            "",
            Token::ALL.iter().map(|t| format!("{:width$}", t.as_str())).join("  ")
        ));
        for state in State::ALL {
            let row = Token::ALL
                .iter()
                .map(|t| format!("{:width$}", delta(*t, state, mode).as_str()))
                .join("  ");
            out.push_str(&format!("{:width$}  {}\n", state.as_str(), row).trim_end());
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub fn render_function_info(identifier: &str, mode: ConstructMode, info: &FunctionInfo) -> String {
    format!(
        "{identifier}\n  mode: {mode}\n  token: {}\n  provenance: {}\n  factory: {}\n  outputs: [{}]\n  consumers: [{}]\n",
        info.token,
        info.provenance.as_str(),
        info.is_factory,
        info.factory_output_positions.iter().join(", "),
        info.consumer_input_positions.iter().join(", "),
    )
}
