//! Dataflow solving over a [`Program`].
//!
//! [`DataflowSolver`] is the seam between the typestate engine and whatever
//! computes fixed points. [`WorklistSolver`] is the bundled implementation: a
//! Kildall-style worklist over basic blocks, made interprocedural with
//! per-function entry/exit summaries that are joined across call sites.
//!
//! Table cells hold the state of a value on entry to an instruction, joined
//! over every path and calling context that reaches it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;

use crate::classifier::RETURN_POSITION;
use crate::description::TypestateDescription;
use crate::program::{Function, InstId, Instruction, Op, Program, ValueId};

pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;

// ============================================================================
// Result table
// ============================================================================

/// Joined states keyed by program point, then by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTable<S> {
    cells: BTreeMap<InstId, BTreeMap<ValueId, S>>,
}

impl<S> Default for StateTable<S> {
    fn default() -> Self {
        Self {
            cells: BTreeMap::new(),
        }
    }
}

impl<S: Copy + Eq> StateTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, inst: InstId, value: ValueId, state: S) {
        self.cells.entry(inst).or_default().insert(value, state);
    }

    /// Join `state` into a cell. Returns true when the cell changed.
    pub fn join_cell(
        &mut self,
        inst: InstId,
        value: ValueId,
        state: S,
        join: impl Fn(S, S) -> S,
    ) -> bool {
        let row = self.cells.entry(inst).or_default();
        match row.get_mut(&value) {
            Some(existing) => {
                let joined = join(*existing, state);
                let changed = joined != *existing;
                *existing = joined;
                changed
            }
            None => {
                row.insert(value, state);
                true
            }
        }
    }

    pub fn get(&self, inst: InstId, value: ValueId) -> Option<S> {
        self.cells.get(&inst).and_then(|row| row.get(&value)).copied()
    }

    /// Every (value, state) pair recorded at `inst`.
    pub fn at(&self, inst: InstId) -> impl Iterator<Item = (ValueId, S)> + '_ {
        self.cells
            .get(&inst)
            .into_iter()
            .flat_map(|row| row.iter().map(|(v, s)| (*v, *s)))
    }

    pub fn cells(&self) -> impl Iterator<Item = (InstId, ValueId, S)> + '_ {
        self.cells
            .iter()
            .flat_map(|(inst, row)| row.iter().map(move |(v, s)| (*inst, *v, *s)))
    }

    /// Copy of the table keeping only values accepted by `keep`.
    pub fn retain_values(&self, keep: impl Fn(ValueId) -> bool) -> Self {
        let cells = self
            .cells
            .iter()
            .filter_map(|(inst, row)| {
                let row: BTreeMap<ValueId, S> = row
                    .iter()
                    .filter(|(v, _)| keep(**v))
                    .map(|(v, s)| (*v, *s))
                    .collect();
                (!row.is_empty()).then_some((*inst, row))
            })
            .collect();
        Self { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// ============================================================================
// Solver interface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("entry point `{0}` is not defined in the program")]
    UnknownEntryPoint(String),

    #[error("entry point `{0}` has no body")]
    EntryWithoutBody(String),

    #[error("instruction id {0} appears more than once")]
    DuplicateInstruction(InstId),

    #[error("block {block} of `{function}` jumps to missing block {target}")]
    InvalidSuccessor {
        function: String,
        block: usize,
        target: usize,
    },

    #[error("block {block} of `{function}` has no successors and does not end in a return")]
    MissingReturn { function: String, block: usize },

    #[error("no fixed point after {limit} iterations")]
    IterationLimit { limit: usize },
}

impl SolverError {
    /// Solver stage that produced the failure.
    pub fn stage(&self) -> &'static str {
        match self {
            SolverError::IterationLimit { .. } => "propagate",
            _ => "validate",
        }
    }
}

/// Computes the joined state of every tracked value at every reachable point.
pub trait DataflowSolver: Send + Sync {
    fn solve<D: TypestateDescription>(
        &self,
        program: &Program,
        description: &D,
        entry_points: &[String],
    ) -> Result<StateTable<D::State>, SolverError>;
}

// ============================================================================
// Worklist solver
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorklistSolver {
    max_iterations: usize,
}

impl Default for WorklistSolver {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl WorklistSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound on processed blocks plus processed functions.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

impl DataflowSolver for WorklistSolver {
    fn solve<D: TypestateDescription>(
        &self,
        program: &Program,
        description: &D,
        entry_points: &[String],
    ) -> Result<StateTable<D::State>, SolverError> {
        validate(program, entry_points)?;

        let mut propagation = Propagation::new(program, description, self.max_iterations);
        for entry in entry_points {
            propagation.enqueue(entry.as_str());
        }
        propagation.run()?;

        crate::debug_event!(
            functions = propagation.visited.len(),
            cells = propagation.table.len(),
            iterations = propagation.iterations,
            "fixed point reached"
        );
        Ok(propagation.table)
    }
}

fn validate(program: &Program, entry_points: &[String]) -> Result<(), SolverError> {
    for entry in entry_points {
        let candidates: Vec<&Function> = program
            .functions
            .iter()
            .filter(|f| &f.name == entry)
            .collect();
        if candidates.is_empty() {
            return Err(SolverError::UnknownEntryPoint(entry.clone()));
        }
        if !candidates.iter().any(|f| f.has_body()) {
            return Err(SolverError::EntryWithoutBody(entry.clone()));
        }
    }

    let mut seen = HashSet::new();
    for function in &program.functions {
        for (index, block) in function.blocks.iter().enumerate() {
            if let Some(&target) = block
                .successors
                .iter()
                .find(|&&t| t >= function.blocks.len())
            {
                return Err(SolverError::InvalidSuccessor {
                    function: function.name.clone(),
                    block: index,
                    target,
                });
            }
            let returns = matches!(
                block.instructions.last().map(|i| &i.op),
                Some(Op::Return { .. })
            );
            if block.successors.is_empty() && !returns {
                return Err(SolverError::MissingReturn {
                    function: function.name.clone(),
                    block: index,
                });
            }
            for inst in &block.instructions {
                if !seen.insert(inst.id) {
                    return Err(SolverError::DuplicateInstruction(inst.id));
                }
            }
        }
    }
    Ok(())
}

type Facts<S> = BTreeMap<ValueId, S>;

struct Summary<S> {
    /// Parameter states joined over every call site.
    entry: Facts<S>,
    /// Parameter states joined over every return.
    exit: Facts<S>,
    ret: Option<S>,
}

impl<S> Default for Summary<S> {
    fn default() -> Self {
        Self {
            entry: BTreeMap::new(),
            exit: BTreeMap::new(),
            ret: None,
        }
    }
}

/// Per-function outcome of one intraprocedural pass.
struct PassOutcome<'p, S> {
    exit: Facts<S>,
    ret: Option<S>,
    callee_entries: BTreeMap<&'p str, Facts<S>>,
}

struct Propagation<'p, 'd, D: TypestateDescription> {
    description: &'d D,
    bodies: HashMap<&'p str, &'p Function>,
    summaries: HashMap<&'p str, Summary<D::State>>,
    callers: HashMap<&'p str, BTreeSet<&'p str>>,
    visited: HashSet<&'p str>,
    worklist: VecDeque<&'p str>,
    queued: HashSet<&'p str>,
    table: StateTable<D::State>,
    iterations: usize,
    limit: usize,
}

impl<'p, 'd, D: TypestateDescription> Propagation<'p, 'd, D> {
    fn new(program: &'p Program, description: &'d D, limit: usize) -> Self {
        let mut bodies = HashMap::new();
        for function in program.functions.iter().filter(|f| f.has_body()) {
            bodies.entry(function.name.as_str()).or_insert(function);
        }
        Self {
            description,
            bodies,
            summaries: HashMap::new(),
            callers: HashMap::new(),
            visited: HashSet::new(),
            worklist: VecDeque::new(),
            queued: HashSet::new(),
            table: StateTable::new(),
            iterations: 0,
            limit,
        }
    }

    fn enqueue(&mut self, name: &str) {
        let Some((&key, _)) = self.bodies.get_key_value(name) else {
            return;
        };
        if self.queued.insert(key) {
            self.worklist.push_back(key);
        }
    }

    fn tick(&mut self) -> Result<(), SolverError> {
        self.iterations += 1;
        if self.iterations > self.limit {
            return Err(SolverError::IterationLimit { limit: self.limit });
        }
        Ok(())
    }

    fn join(&self, a: D::State, b: D::State) -> D::State {
        self.description.join(a, b)
    }

    fn join_into(&self, dst: &mut Facts<D::State>, src: &Facts<D::State>) -> bool {
        let mut changed = false;
        for (value, state) in src {
            match dst.get_mut(value) {
                Some(existing) => {
                    let joined = self.join(*existing, *state);
                    if joined != *existing {
                        *existing = joined;
                        changed = true;
                    }
                }
                None => {
                    dst.insert(*value, *state);
                    changed = true;
                }
            }
        }
        changed
    }

    fn run(&mut self) -> Result<(), SolverError> {
        while let Some(name) = self.worklist.pop_front() {
            self.queued.remove(name);
            self.tick()?;
            let first_visit = self.visited.insert(name);
            crate::trace_event!(function = name, first_visit, "analyzing function");

            let outcome = self.analyze_function(name)?;

            let mut summary = self.summaries.remove(name).unwrap_or_default();
            let mut exit_changed = self.join_into(&mut summary.exit, &outcome.exit);
            if let Some(ret) = outcome.ret {
                let joined = summary.ret.map_or(ret, |old| self.join(old, ret));
                exit_changed |= summary.ret != Some(joined);
                summary.ret = Some(joined);
            }
            self.summaries.insert(name, summary);

            if exit_changed {
                let callers: Vec<&'p str> = self
                    .callers
                    .get(name)
                    .map(|c| c.iter().copied().collect())
                    .unwrap_or_default();
                for caller in callers {
                    self.enqueue(caller);
                }
            }

            for (callee, facts) in outcome.callee_entries {
                let mut summary = self.summaries.remove(callee).unwrap_or_default();
                let entry_changed = self.join_into(&mut summary.entry, &facts);
                self.summaries.insert(callee, summary);
                if entry_changed || !self.visited.contains(callee) {
                    self.enqueue(callee);
                }
            }
        }
        Ok(())
    }

    fn analyze_function(&mut self, name: &'p str) -> Result<PassOutcome<'p, D::State>, SolverError> {
        let function = self.bodies[name];
        let entry = self
            .summaries
            .get(name)
            .map(|s| s.entry.clone())
            .unwrap_or_default();

        let block_count = function.blocks.len();
        let mut block_in: Vec<Facts<D::State>> = vec![BTreeMap::new(); block_count];
        let mut reached = vec![false; block_count];
        let mut queued = vec![false; block_count];
        let mut local = VecDeque::from([0usize]);
        block_in[0] = entry;
        reached[0] = true;
        queued[0] = true;

        let mut outcome = PassOutcome {
            exit: BTreeMap::new(),
            ret: None,
            callee_entries: BTreeMap::new(),
        };

        while let Some(index) = local.pop_front() {
            queued[index] = false;
            self.tick()?;

            let block = &function.blocks[index];
            let mut facts = block_in[index].clone();
            for inst in &block.instructions {
                let description = self.description;
                for (value, state) in &facts {
                    self.table
                        .join_cell(inst.id, *value, *state, |a, b| description.join(a, b));
                }
                self.transfer(name, function, inst, &mut facts, &mut outcome);
            }

            for &succ in &block.successors {
                let first = !reached[succ];
                reached[succ] = true;
                let mut incoming = std::mem::take(&mut block_in[succ]);
                let changed = self.join_into(&mut incoming, &facts);
                block_in[succ] = incoming;
                if (changed || first) && !queued[succ] {
                    queued[succ] = true;
                    local.push_back(succ);
                }
            }
        }
        Ok(outcome)
    }

    fn transfer(
        &mut self,
        caller: &'p str,
        function: &'p Function,
        inst: &'p Instruction,
        facts: &mut Facts<D::State>,
        outcome: &mut PassOutcome<'p, D::State>,
    ) {
        match &inst.op {
            Op::Call {
                callee,
                args,
                result,
            } => {
                if let Some(&target) = self.bodies.get(callee.as_str()) {
                    self.descend(caller, target, args, *result, facts, outcome);
                } else {
                    self.apply_call(callee, args, *result, facts);
                }
            }
            Op::Return { value } => {
                for param in &function.params {
                    if let Some(state) = facts.get(param).copied() {
                        let joined = outcome
                            .exit
                            .get(param)
                            .map_or(state, |old| self.join(*old, state));
                        outcome.exit.insert(*param, joined);
                    }
                }
                if let Some(state) = value.and_then(|v| facts.get(&v).copied()) {
                    outcome.ret = Some(outcome.ret.map_or(state, |old| self.join(old, state)));
                }
            }
            Op::Other { .. } => {}
        }
    }

    /// Call into a function with a body: flow arguments to parameters and read
    /// back the callee's current summary.
    fn descend(
        &mut self,
        caller: &'p str,
        target: &'p Function,
        args: &[ValueId],
        result: Option<ValueId>,
        facts: &mut Facts<D::State>,
        outcome: &mut PassOutcome<'p, D::State>,
    ) {
        let name = target.name.as_str();
        self.callers.entry(name).or_default().insert(caller);

        let mut passed = outcome.callee_entries.remove(name).unwrap_or_default();
        for (arg, param) in args.iter().zip(&target.params) {
            if let Some(state) = facts.get(arg).copied() {
                let joined = passed.get(param).map_or(state, |old| self.join(*old, state));
                passed.insert(*param, joined);
            }
        }
        outcome.callee_entries.insert(name, passed);

        let Some(summary) = self.summaries.get(name) else {
            return;
        };
        for (arg, param) in args.iter().zip(&target.params) {
            if let Some(&after) = summary.exit.get(param) {
                let joined = facts.get(arg).map_or(after, |now| self.join(*now, after));
                facts.insert(*arg, joined);
            }
        }
        if let (Some(result), Some(ret)) = (result, summary.ret) {
            facts.insert(result, ret);
        }
    }

    /// Call to a body-less function: consult the description.
    fn apply_call(
        &self,
        callee: &str,
        args: &[ValueId],
        result: Option<ValueId>,
        facts: &mut Facts<D::State>,
    ) {
        let description = self.description;
        if !description.is_api_function(callee) {
            return;
        }
        let info = description.function_info(callee);

        for &pos in &info.consumer_input_positions {
            let Some(arg) = usize::try_from(pos).ok().and_then(|i| args.get(i)) else {
                continue;
            };
            let current = facts.get(arg).copied().unwrap_or_else(|| description.uninit());
            facts.insert(*arg, description.next_state(callee, current));
        }

        if info.is_factory {
            let produced = description.next_state(callee, description.uninit());
            for &pos in &info.factory_output_positions {
                let target = if pos == RETURN_POSITION {
                    result
                } else {
                    usize::try_from(pos).ok().and_then(|i| args.get(i).copied())
                };
                if let Some(value) = target {
                    facts.insert(value, produced);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classifier, KnownFunctions};
    use crate::delta::ConstructMode;
    use crate::description::UnsafeDropDescription;
    use crate::program::{DeclarationIndex, ProgramBuilder};
    use crate::state::State;
    use std::sync::Arc;

    const AS_MUT_PTR: &str = "alloc::vec::Vec<u8>::as_mut_ptr";
    const DROP: &str = "core::ptr::drop_in_place<u8>";
    const READ: &str = "core::ptr::read<u8>";

    fn solve(program: &Program, mode: ConstructMode) -> StateTable<State> {
        let classifier = Arc::new(Classifier::new(
            Arc::new(KnownFunctions::builtin()),
            Arc::new(DeclarationIndex::new(program)),
        ));
        let description = UnsafeDropDescription::new(classifier, mode);
        WorklistSolver::new()
            .solve(program, &description, &["main".to_string()])
            .expect("solver should reach a fixed point")
    }

    #[test]
    fn straight_line_use_after_free() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let mut last = InstId(0);
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            f.call(DROP, &[p], None);
            f.call(READ, &[p], None);
            last = f.ret(None);
        });
        let program = b.build();
        let table = solve(&program, ConstructMode::Consuming);

        assert_eq!(table.get(InstId(0), p), None);
        assert_eq!(table.get(InstId(1), p), Some(State::RawReferenced));
        assert_eq!(table.get(InstId(1), s), Some(State::RawReferenced));
        assert_eq!(table.get(InstId(2), p), Some(State::Dropped));
        assert_eq!(table.get(last, p), Some(State::UseAfterFreeError));
    }

    #[test]
    fn branches_join_at_merge_point() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let mut merge_ret = InstId(0);
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            let then_block = f.new_block();
            f.call(DROP, &[p], None);
            let else_block = f.new_block();
            f.other("nop");
            let merge = f.new_block();
            merge_ret = f.ret(None);
            f.edge(0, then_block);
            f.edge(0, else_block);
            f.edge(then_block, merge);
            f.edge(else_block, merge);
        });
        let program = b.build();
        let table = solve(&program, ConstructMode::Consuming);

        assert_eq!(table.get(merge_ret, p), Some(State::Dropped));
    }

    #[test]
    fn loop_drop_becomes_double_free() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let mut drop_inst = InstId(0);
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            let body = f.new_block();
            drop_inst = f.call(DROP, &[p], None);
            let exit = f.new_block();
            f.ret(None);
            f.edge(0, body);
            f.edge(body, body);
            f.edge(body, exit);
        });
        let program = b.build();
        let table = solve(&program, ConstructMode::Consuming);

        assert_eq!(table.get(drop_inst, p), Some(State::DoubleFreeError));
    }

    #[test]
    fn callee_effects_flow_back_to_arguments() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let q = b.value("q");
        let r = b.value("r");
        let mut after_call = InstId(0);
        b.define("release", &[q], |f| {
            f.call(DROP, &[q], None);
            f.ret(Some(q));
        });
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            f.call("release", &[p], Some(r));
            after_call = f.ret(None);
        });
        let program = b.build();
        let table = solve(&program, ConstructMode::Consuming);

        assert_eq!(table.get(InstId(0), q), Some(State::RawReferenced));
        assert_eq!(table.get(after_call, p), Some(State::Dropped));
        assert_eq!(table.get(after_call, r), Some(State::Dropped));
    }

    #[test]
    fn factory_mode_tracks_rebuilt_owner() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let v = b.value("v");
        let mut after = InstId(0);
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            f.call("alloc::vec::Vec<u8>::from_raw_parts", &[p], Some(v));
            after = f.ret(None);
        });
        let program = b.build();

        let consuming = solve(&program, ConstructMode::Consuming);
        assert_eq!(consuming.get(after, v), None);
        assert_eq!(consuming.get(after, p), Some(State::RawWrapped));

        let factory = solve(&program, ConstructMode::Factory);
        assert_eq!(factory.get(after, v), Some(State::RawWrapped));
    }

    #[test]
    fn callee_without_return_is_rejected() {
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let q = b.value("q");
        b.define("release", &[q], |f| {
            f.call(DROP, &[q], None);
        });
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            f.call("release", &[p], None);
            f.ret(None);
        });
        let program = b.build();
        let classifier = Arc::new(Classifier::new(
            Arc::new(KnownFunctions::builtin()),
            Arc::new(DeclarationIndex::new(&program)),
        ));
        let d = UnsafeDropDescription::new(classifier, ConstructMode::Consuming);

        let err = WorklistSolver::new()
            .solve(&program, &d, &["main".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            SolverError::MissingReturn {
                function: "release".to_string(),
                block: 0,
            }
        );
        assert_eq!(err.stage(), "validate");
    }

    #[test]
    fn output_slot_receives_the_rebuilt_owner() {
        const FROM_RAW_PARTS: &str = "alloc::vec::Vec<u8>::from_raw_parts";
        let mut b = ProgramBuilder::new();
        let s = b.value("s");
        let p = b.value("p");
        let n = b.value("n");
        let out = b.value("out");
        b.declare(FROM_RAW_PARTS, 4, Some(0));
        let mut after = InstId(0);
        b.define("main", &[], |f| {
            f.call(AS_MUT_PTR, &[s], Some(p));
            f.call(FROM_RAW_PARTS, &[out, p, n, n], None);
            after = f.ret(None);
        });
        let program = b.build();

        let factory = solve(&program, ConstructMode::Factory);
        assert_eq!(factory.get(after, out), Some(State::RawWrapped));
        assert_eq!(factory.get(after, p), Some(State::RawWrapped));
        assert_eq!(factory.get(after, n), None);

        let consuming = solve(&program, ConstructMode::Consuming);
        assert_eq!(consuming.get(after, out), None);
        assert_eq!(consuming.get(after, p), Some(State::RawWrapped));
    }

    #[test]
    fn validation_failures() {
        let mut b = ProgramBuilder::new();
        b.declare("ext", 0, None);
        b.define("main", &[], |f| {
            f.ret(None);
        });
        let program = b.build();
        let classifier = Arc::new(Classifier::new(
            Arc::new(KnownFunctions::builtin()),
            Arc::new(DeclarationIndex::new(&program)),
        ));
        let d = UnsafeDropDescription::new(classifier, ConstructMode::Consuming);
        let solver = WorklistSolver::new();

        let err = solver
            .solve(&program, &d, &["nope".to_string()])
            .unwrap_err();
        assert_eq!(err, SolverError::UnknownEntryPoint("nope".to_string()));
        assert_eq!(err.stage(), "validate");

        let err = solver.solve(&program, &d, &["ext".to_string()]).unwrap_err();
        assert_eq!(err, SolverError::EntryWithoutBody("ext".to_string()));

        let mut broken = program.clone();
        broken.functions[1].blocks[0].successors.push(7);
        let err = solver.solve(&broken, &d, &["main".to_string()]).unwrap_err();
        assert!(matches!(err, SolverError::InvalidSuccessor { target: 7, .. }));

        let mut duplicated = program.clone();
        let copy = duplicated.functions[1].blocks[0].instructions[0].clone();
        duplicated.functions[1].blocks[0].instructions.push(copy);
        let err = solver
            .solve(&duplicated, &d, &["main".to_string()])
            .unwrap_err();
        assert_eq!(err, SolverError::DuplicateInstruction(InstId(0)));

        let mut open_ended = program.clone();
        open_ended.functions[1].blocks[0].instructions.clear();
        let err = solver
            .solve(&open_ended, &d, &["main".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            SolverError::MissingReturn {
                function: "main".to_string(),
                block: 0,
            }
        );

        let err = WorklistSolver::new()
            .with_max_iterations(1)
            .solve(&program, &d, &["main".to_string()])
            .unwrap_err();
        assert_eq!(err, SolverError::IterationLimit { limit: 1 });
        assert_eq!(err.stage(), "propagate");
    }

    #[test]
    fn retain_values_drops_empty_rows() {
        let mut table = StateTable::new();
        table.insert(InstId(0), ValueId(1), State::Used);
        table.insert(InstId(1), ValueId(2), State::Dropped);
        let kept = table.retain_values(|v| v == ValueId(1));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept.at(InstId(1)).count(), 0);
        assert_eq!(kept.get(InstId(0), ValueId(1)), Some(State::Used));
    }
}
