//! Run Executor: one solver invocation per construct mode.
//!
//! A [`RunResult`] is the raw table a solver produced plus the set of states
//! each value was ever observed in. Filtering removes values whose states carry
//! no information about memory misuse.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::delta::ConstructMode;
use crate::description::{AllowListDescription, TypestateDescription, UnsafeDropDescription};
use crate::error::{Result, UnsafeDropError};
use crate::program::{InstId, Program, ValueId};
use crate::solver::{DEFAULT_MAX_ITERATIONS, DataflowSolver, SolverError, StateTable, WorklistSolver};
use crate::state::State;

/// Which calls the solver is allowed to query transitions for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Coverage {
    /// Every call is potentially interesting.
    #[default]
    Full,
    /// Only curated or heuristically recognised calls.
    AllowList,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult<S> {
    mode: ConstructMode,
    table: StateTable<S>,
    states: BTreeMap<ValueId, BTreeSet<S>>,
}

impl<S: Copy + Ord> RunResult<S> {
    pub fn from_table(mode: ConstructMode, table: StateTable<S>) -> Self {
        let mut states: BTreeMap<ValueId, BTreeSet<S>> = BTreeMap::new();
        for (_, value, state) in table.cells() {
            states.entry(value).or_default().insert(state);
        }
        Self {
            mode,
            table,
            states,
        }
    }

    pub fn mode(&self) -> ConstructMode {
        self.mode
    }

    pub fn table(&self) -> &StateTable<S> {
        &self.table
    }

    /// Every state each value was observed in, over all program points.
    pub fn states(&self) -> &BTreeMap<ValueId, BTreeSet<S>> {
        &self.states
    }

    pub fn states_of(&self, value: ValueId) -> Option<&BTreeSet<S>> {
        self.states.get(&value)
    }

    /// Values observed at least once in a state accepted by `pred`.
    pub fn values_where(&self, pred: impl Fn(S) -> bool) -> BTreeSet<ValueId> {
        self.states
            .iter()
            .filter(|(_, set)| set.iter().any(|s| pred(*s)))
            .map(|(v, _)| *v)
            .collect()
    }

    pub fn at(&self, inst: InstId) -> impl Iterator<Item = (ValueId, S)> + '_ {
        self.table.at(inst)
    }

    /// Drop values whose state set is a non-empty subset of `{bottom, uninit}`
    /// or contains the description's error state.
    pub fn filter<D>(self, description: &D) -> FilteredRunResult<S>
    where
        D: TypestateDescription<State = S>,
    {
        let noise = |set: &BTreeSet<S>| {
            set.contains(&description.error())
                || set
                    .iter()
                    .all(|s| *s == description.bottom() || *s == description.uninit())
        };
        let kept: BTreeMap<ValueId, BTreeSet<S>> = self
            .states
            .into_iter()
            .filter(|(_, set)| !noise(set))
            .collect();
        let table = self.table.retain_values(|v| kept.contains_key(&v));
        FilteredRunResult(RunResult {
            mode: self.mode,
            table,
            states: kept,
        })
    }
}

/// A [`RunResult`] with uninformative values removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredRunResult<S>(RunResult<S>);

impl<S: Copy + Ord> FilteredRunResult<S> {
    /// Filtering again leaves the result unchanged.
    pub fn filter<D>(self, description: &D) -> Self
    where
        D: TypestateDescription<State = S>,
    {
        self.0.filter(description)
    }
}

impl<S> std::ops::Deref for FilteredRunResult<S> {
    type Target = RunResult<S>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Filtered results of both modes over the same program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPair {
    pub consuming: FilteredRunResult<State>,
    pub factory: FilteredRunResult<State>,
}

impl RunPair {
    pub fn runs(&self) -> [&FilteredRunResult<State>; 2] {
        [&self.consuming, &self.factory]
    }

    /// Per-value union of both runs' state sets.
    pub fn merged_states(&self) -> BTreeMap<ValueId, BTreeSet<State>> {
        let mut merged: BTreeMap<ValueId, BTreeSet<State>> = BTreeMap::new();
        for run in self.runs() {
            for (value, states) in run.states() {
                merged.entry(*value).or_default().extend(states);
            }
        }
        merged
    }
}

/// Both modes before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfilteredRunPair {
    pub consuming: RunResult<State>,
    pub factory: RunResult<State>,
}

// ============================================================================
// Executor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    pub entry_points: Vec<String>,
    pub coverage: Coverage,
    /// Run both modes concurrently in [`RunExecutor::run_pair`].
    pub parallel: bool,
    pub max_iterations: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            entry_points: vec!["main".to_string()],
            coverage: Coverage::Full,
            parallel: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Drives a solver over one program. Holds only shared, read-only inputs, so
/// the two mode runs can proceed on separate threads.
pub struct RunExecutor<'p, V = WorklistSolver> {
    program: &'p Program,
    classifier: Arc<Classifier>,
    solver: V,
    settings: RunSettings,
}

impl<'p> RunExecutor<'p, WorklistSolver> {
    pub fn new(program: &'p Program, classifier: Arc<Classifier>, settings: RunSettings) -> Self {
        let solver = WorklistSolver::new().with_max_iterations(settings.max_iterations);
        Self {
            program,
            classifier,
            solver,
            settings,
        }
    }
}

impl<'p, V: DataflowSolver> RunExecutor<'p, V> {
    /// Swap in a different solver implementation.
    pub fn with_solver<W: DataflowSolver>(self, solver: W) -> RunExecutor<'p, W> {
        RunExecutor {
            program: self.program,
            classifier: self.classifier,
            solver,
            settings: self.settings,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    fn solve(&self, mode: ConstructMode) -> std::result::Result<StateTable<State>, SolverError> {
        let entries = &self.settings.entry_points;
        match self.settings.coverage {
            Coverage::Full => {
                let description = UnsafeDropDescription::new(self.classifier.clone(), mode);
                self.solver.solve(self.program, &description, entries)
            }
            Coverage::AllowList => {
                let description = AllowListDescription::new(self.classifier.clone(), mode);
                self.solver.solve(self.program, &description, entries)
            }
        }
    }

    /// One unfiltered run. A solver failure abandons the run.
    pub fn run(&self, mode: ConstructMode) -> Result<RunResult<State>> {
        let table = crate::instrument_block!("run", { self.solve(mode) });
        let table = table.map_err(|source| UnsafeDropError::solver(mode, source))?;
        let result = RunResult::from_table(mode, table);
        crate::debug_event!(
            mode = %mode,
            cells = result.table().len(),
            values = result.states().len(),
            "run finished"
        );
        Ok(result)
    }

    pub fn run_filtered(&self, mode: ConstructMode) -> Result<FilteredRunResult<State>> {
        Ok(self.filter(self.run(mode)?))
    }

    /// Filter a result against this executor's classifier, in the result's own mode.
    pub fn filter(&self, result: RunResult<State>) -> FilteredRunResult<State> {
        let description = UnsafeDropDescription::new(self.classifier.clone(), result.mode());
        result.filter(&description)
    }

    /// Both modes unfiltered, concurrently when `parallel` is set. The
    /// consuming run's failure is reported first.
    pub fn run_pair_unfiltered(&self) -> Result<UnfilteredRunPair> {
        let (consuming, factory) = if self.settings.parallel {
            rayon::join(
                || self.run(ConstructMode::Consuming),
                || self.run(ConstructMode::Factory),
            )
        } else {
            (
                self.run(ConstructMode::Consuming),
                self.run(ConstructMode::Factory),
            )
        };
        Ok(UnfilteredRunPair {
            consuming: consuming?,
            factory: factory?,
        })
    }

    pub fn filter_pair(&self, unfiltered: UnfilteredRunPair) -> RunPair {
        RunPair {
            consuming: self.filter(unfiltered.consuming),
            factory: self.filter(unfiltered.factory),
        }
    }

    pub fn run_pair(&self) -> Result<RunPair> {
        Ok(self.filter_pair(self.run_pair_unfiltered()?))
    }
}
