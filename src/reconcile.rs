//! Dual-run reconciliation.
//!
//! A single monotone pass tracks one token stream per value, so it loses the
//! link between a raw pointer and the owner later rebuilt from it. The
//! consuming run surfaces errors on the original values; the factory run tracks
//! the rebuilt owners. Joining both at the same instruction recovers sites where
//! a rewrapped pointer and a freed value of the same allocation coexist.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::classifier::{Classifier, Token};
use crate::program::{InstId, Program, ValueId};
use crate::run::FilteredRunResult;
use crate::state::{ErrorKind, State};

/// Which call instructions are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileScope {
    /// Only calls whose token is `UnsafeConstruct`.
    #[default]
    UnsafeConstructSites,
    /// Every call instruction.
    AllCallSites,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub instruction: InstId,
    pub function: String,
    pub callee: String,
    pub token: Token,
    /// Contributing values from both runs, with their unioned states.
    pub values: BTreeMap<ValueId, BTreeSet<State>>,
    pub kinds: BTreeSet<ErrorKind>,
}

impl Finding {
    pub fn states(&self) -> BTreeSet<State> {
        self.values.values().flatten().copied().collect()
    }
}

pub struct Reconciler<'a> {
    program: &'a Program,
    classifier: &'a Classifier,
    scope: ReconcileScope,
}

impl<'a> Reconciler<'a> {
    pub fn new(program: &'a Program, classifier: &'a Classifier) -> Self {
        Self {
            program,
            classifier,
            scope: ReconcileScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: ReconcileScope) -> Self {
        self.scope = scope;
        self
    }

    /// Cross-reference a consuming-mode and a factory-mode result.
    ///
    /// Findings come back in program order, at most one per instruction.
    pub fn reconcile(
        &self,
        consuming: &FilteredRunResult<State>,
        factory: &FilteredRunResult<State>,
    ) -> Vec<Finding> {
        crate::instrument_block!("reconcile", {
            let wrapped = factory.values_where(|s| s == State::RawWrapped);
            let errored = consuming.values_where(State::is_memory_error);
            crate::debug_event!(
                wrapped = wrapped.len(),
                errored = errored.len(),
                "reconciling runs"
            );

            let mut seen = HashSet::new();
            let mut findings = Vec::new();
            for (function, inst) in self.program.instructions() {
                let Some(callee) = inst.callee() else {
                    continue;
                };
                if !seen.insert(inst.id) {
                    continue;
                }
                let token = self.classifier.token_of(callee);
                if self.scope == ReconcileScope::UnsafeConstructSites
                    && token != Token::UnsafeConstruct
                {
                    continue;
                }

                let mut values: BTreeMap<ValueId, BTreeSet<State>> = BTreeMap::new();
                let observed = consuming
                    .at(inst.id)
                    .filter(|(v, _)| errored.contains(v))
                    .chain(factory.at(inst.id).filter(|(v, _)| wrapped.contains(v)));
                for (value, state) in observed {
                    values.entry(value).or_default().insert(state);
                }

                let kinds: BTreeSet<ErrorKind> = values
                    .values()
                    .flatten()
                    .filter_map(|s| s.error_kind())
                    .collect();
                let rewrapped = values.values().any(|set| set.contains(&State::RawWrapped));
                if kinds.is_empty() || !rewrapped {
                    continue;
                }

                crate::debug_event!(
                    instruction = %inst.id,
                    function = %function.name,
                    callee,
                    "reconciled finding"
                );
                findings.push(Finding {
                    instruction: inst.id,
                    function: function.name.clone(),
                    callee: callee.to_string(),
                    token,
                    values,
                    kinds,
                });
            }
            findings
        })
    }
}
