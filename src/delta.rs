//! Transition function of the typestate automaton.
//!
//! `delta` is total over `Token x State` for both construct modes. The mode only
//! changes one cell: `UnsafeConstruct` applied to an `Uninit` value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classifier::Token;
use crate::state::State;

/// How calls that rebuild an owner from raw parts are modelled.
///
/// `Consuming` surfaces errors on the value the raw pointer came from;
/// `Factory` additionally tracks the freshly wrapped owner. The reconciler
/// needs one run of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstructMode {
    #[default]
    Consuming,
    Factory,
}

impl ConstructMode {
    pub const BOTH: [ConstructMode; 2] = [ConstructMode::Consuming, ConstructMode::Factory];

    pub fn from_flag(unsafe_construct_as_factory: bool) -> Self {
        if unsafe_construct_as_factory {
            ConstructMode::Factory
        } else {
            ConstructMode::Consuming
        }
    }

    pub fn unsafe_construct_as_factory(self) -> bool {
        matches!(self, ConstructMode::Factory)
    }
}

impl fmt::Display for ConstructMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unsafe_construct_as_factory={}",
            self.unsafe_construct_as_factory()
        )
    }
}

/// Successor of `state` after a call classified as `token`.
pub fn delta(token: Token, state: State, mode: ConstructMode) -> State {
    use State::*;

    match state {
        // Sentinels and error states absorb every token.
        Bottom | Top | UseAfterFreeError | DoubleFreeError | TypestateViolation => state,
        Uninit => match token {
            Token::Star => Uninit,
            Token::GetPtr => RawReferenced,
            Token::UnsafeConstruct => match mode {
                ConstructMode::Consuming => TypestateViolation,
                ConstructMode::Factory => RawWrapped,
            },
            Token::Drop | Token::Use => TypestateViolation,
        },
        RawReferenced => match token {
            Token::Star | Token::GetPtr => RawReferenced,
            Token::UnsafeConstruct => RawWrapped,
            Token::Drop => Dropped,
            Token::Use => Used,
        },
        RawWrapped => match token {
            Token::Star | Token::GetPtr | Token::UnsafeConstruct => RawWrapped,
            Token::Drop => Dropped,
            Token::Use => Used,
        },
        Used => match token {
            Token::Drop => Dropped,
            Token::Star | Token::GetPtr | Token::UnsafeConstruct | Token::Use => Used,
        },
        Dropped => match token {
            Token::Star => Dropped,
            Token::Drop => DoubleFreeError,
            Token::GetPtr | Token::UnsafeConstruct | Token::Use => UseAfterFreeError,
        },
    }
}

/// Fold a token sequence over a starting state.
pub fn run_tokens(
    start: State,
    tokens: impl IntoIterator<Item = Token>,
    mode: ConstructMode,
) -> State {
    tokens
        .into_iter()
        .fold(start, |state, token| delta(token, state, mode))
}
