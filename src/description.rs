//! Typestate descriptions: what a dataflow solver is configured against.
//!
//! A description bundles the lattice sentinels, the join, and the per-call
//! classification callbacks. Solvers are generic over [`TypestateDescription`]
//! so alternative lattices or coverage policies plug in without touching them.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::classifier::{Classifier, FunctionInfo, Token};
use crate::delta::{ConstructMode, delta};
use crate::state::State;

/// Capability interface consumed by a [`crate::solver::DataflowSolver`].
pub trait TypestateDescription: Send + Sync {
    type State: Copy + Eq + Ord + Hash + Debug + Send + Sync;

    /// Full classification of a call target.
    fn function_info(&self, callee: &str) -> FunctionInfo;

    /// Token-seen-at-call callback: the successor of `state` after calling `callee`.
    fn next_state(&self, callee: &str, state: Self::State) -> Self::State;

    fn is_factory_function(&self, callee: &str) -> bool {
        self.function_info(callee).is_factory
    }

    fn is_consuming_function(&self, callee: &str) -> bool {
        self.function_info(callee).is_consuming()
    }

    /// Whether the solver should query transitions for calls to `callee` at all.
    fn is_api_function(&self, callee: &str) -> bool;

    fn factory_positions(&self, callee: &str) -> BTreeSet<i32> {
        self.function_info(callee).factory_output_positions
    }

    fn consumer_positions(&self, callee: &str) -> BTreeSet<i32> {
        self.function_info(callee).consumer_input_positions
    }

    fn bottom(&self) -> Self::State;
    fn top(&self) -> Self::State;
    fn uninit(&self) -> Self::State;
    fn start(&self) -> Self::State;
    fn error(&self) -> Self::State;
    fn join(&self, a: Self::State, b: Self::State) -> Self::State;
}

// ============================================================================
// Full-coverage description
// ============================================================================

/// Vertical-lattice description where every call is potentially interesting.
#[derive(Debug, Clone)]
pub struct UnsafeDropDescription {
    classifier: Arc<Classifier>,
    mode: ConstructMode,
}

impl UnsafeDropDescription {
    pub fn new(classifier: Arc<Classifier>, mode: ConstructMode) -> Self {
        Self { classifier, mode }
    }

    pub fn token_of(&self, callee: &str) -> Token {
        self.classifier.classify(callee, self.mode).token
    }
}

impl TypestateDescription for UnsafeDropDescription {
    type State = State;

    fn function_info(&self, callee: &str) -> FunctionInfo {
        self.classifier.classify(callee, self.mode)
    }

    fn next_state(&self, callee: &str, state: State) -> State {
        delta(self.token_of(callee), state, self.mode)
    }

    fn is_api_function(&self, _callee: &str) -> bool {
        true
    }

    fn bottom(&self) -> State {
        State::bottom()
    }

    fn top(&self) -> State {
        State::top()
    }

    fn uninit(&self) -> State {
        State::uninit()
    }

    fn start(&self) -> State {
        State::start()
    }

    fn error(&self) -> State {
        State::error()
    }

    fn join(&self, a: State, b: State) -> State {
        a.join(b)
    }
}

// ============================================================================
// Allow-list description
// ============================================================================

/// Same lattice and transitions, but only curated or heuristically recognised
/// calls are API functions. Defaulted `Use` classifications are ignored.
#[derive(Debug, Clone)]
pub struct AllowListDescription {
    inner: UnsafeDropDescription,
}

impl AllowListDescription {
    pub fn new(classifier: Arc<Classifier>, mode: ConstructMode) -> Self {
        Self {
            inner: UnsafeDropDescription::new(classifier, mode),
        }
    }
}

impl TypestateDescription for AllowListDescription {
    type State = State;

    fn function_info(&self, callee: &str) -> FunctionInfo {
        self.inner.function_info(callee)
    }

    fn next_state(&self, callee: &str, state: State) -> State {
        self.inner.next_state(callee, state)
    }

    fn is_api_function(&self, callee: &str) -> bool {
        self.function_info(callee).provenance.is_recognised()
    }

    fn bottom(&self) -> State {
        self.inner.bottom()
    }

    fn top(&self) -> State {
        self.inner.top()
    }

    fn uninit(&self) -> State {
        self.inner.uninit()
    }

    fn start(&self) -> State {
        self.inner.start()
    }

    fn error(&self) -> State {
        self.inner.error()
    }

    fn join(&self, a: State, b: State) -> State {
        self.inner.join(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KnownFunctions;
    use crate::program::{DeclarationIndex, ProgramBuilder};

    fn classifier() -> Arc<Classifier> {
        let mut b = ProgramBuilder::new();
        b.declare("ext::opaque", 2, None);
        let program = b.build();
        Arc::new(Classifier::new(
            Arc::new(KnownFunctions::builtin()),
            Arc::new(DeclarationIndex::new(&program)),
        ))
    }

    #[test]
    fn next_state_follows_delta() {
        let d = UnsafeDropDescription::new(classifier(), ConstructMode::Consuming);
        assert_eq!(
            d.next_state("alloc::vec::Vec<u8>::as_mut_ptr", d.uninit()),
            State::RawReferenced
        );
        assert_eq!(
            d.next_state("core::ptr::drop_in_place<u8>", State::Dropped),
            State::DoubleFreeError
        );
        // Unknown symbols never abort; they degrade to no-ops.
        assert_eq!(d.next_state("who::knows", State::Dropped), State::Dropped);
    }

    #[test]
    fn mode_changes_factory_predicate_only_for_unsafe_construct() {
        let c = classifier();
        let consuming = UnsafeDropDescription::new(c.clone(), ConstructMode::Consuming);
        let factory = UnsafeDropDescription::new(c, ConstructMode::Factory);
        let id = "alloc::boxed::Box<T>::from_raw";

        assert!(!consuming.is_factory_function(id));
        assert!(factory.is_factory_function(id));
        assert!(consuming.is_consuming_function(id));
        assert_eq!(consuming.next_state(id, State::Uninit), State::TypestateViolation);
        assert_eq!(factory.next_state(id, State::Uninit), State::RawWrapped);

        let get = "alloc::boxed::Box<T>::into_raw";
        assert_eq!(consuming.is_factory_function(get), factory.is_factory_function(get));
    }

    #[test]
    fn coverage_policies() {
        let c = classifier();
        let full = UnsafeDropDescription::new(c.clone(), ConstructMode::Consuming);
        let allow = AllowListDescription::new(c, ConstructMode::Consuming);

        assert!(full.is_api_function("ext::opaque"));
        assert!(!allow.is_api_function("ext::opaque"));
        assert!(allow.is_api_function("core::ptr::drop_in_place<u8>"));
        assert!(allow.is_api_function("mycrate::Thing::into_raw"));
        assert_eq!(allow.consumer_positions("ext::opaque"), BTreeSet::from([0, 1]));
    }

    #[test]
    fn sentinels_are_stable() {
        let d = AllowListDescription::new(classifier(), ConstructMode::Factory);
        assert_eq!(d.bottom(), State::Bottom);
        assert_eq!(d.top(), State::Top);
        assert_eq!(d.uninit(), State::Uninit);
        assert_eq!(d.start(), State::RawReferenced);
        assert_eq!(d.error(), State::TypestateViolation);
        assert_eq!(d.join(State::Top, State::Used), State::Used);
    }
}
