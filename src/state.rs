//! Typestate lattice for values whose raw pointer escaped an owning container.
//!
//! The lattice is "vertical": states are totally ordered and `join` picks the
//! more informative of two states. The order, from low to high:
//!
//! | State               | Meaning                                                        |
//! |---------------------|----------------------------------------------------------------|
//! | `Bottom`            | lattice sentinel                                               |
//! | `Uninit`            | tracked but nothing happened to it yet                         |
//! | `RawReferenced`     | a raw pointer was taken from the value                         |
//! | `RawWrapped`        | the value was (re)built from a previously extracted raw pointer |
//! | `Used`              | read or otherwise consumed without being released              |
//! | `Dropped`           | released                                                       |
//! | `UseAfterFreeError` | touched after release                                          |
//! | `DoubleFreeError`   | released twice                                                 |
//! | `TypestateViolation`| ill-typed sequence, analysis noise                             |
//! | `Top`               | lattice sentinel                                               |
//!
//! `Top` and `Bottom` follow the solver convention where `Bottom` carries the most
//! information and `Top` the least, so `join` treats `Top` as its identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in the typestate lattice.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Bottom,
    Uninit,
    RawReferenced,
    RawWrapped,
    Used,
    Dropped,
    UseAfterFreeError,
    DoubleFreeError,
    TypestateViolation,
    Top,
}

impl State {
    pub const ALL: [State; 10] = [
        State::Bottom,
        State::Uninit,
        State::RawReferenced,
        State::RawWrapped,
        State::Used,
        State::Dropped,
        State::UseAfterFreeError,
        State::DoubleFreeError,
        State::TypestateViolation,
        State::Top,
    ];

    pub fn bottom() -> Self {
        State::Bottom
    }

    pub fn top() -> Self {
        State::Top
    }

    pub fn uninit() -> Self {
        State::Uninit
    }

    /// State a value enters on its first raw-pointer extraction.
    pub fn start() -> Self {
        State::RawReferenced
    }

    pub fn error() -> Self {
        State::TypestateViolation
    }

    /// Least upper bound under the information order.
    ///
    /// `Top` is ranked below everything else, so `join(Top, x) == x`. Every other
    /// pair resolves to the larger state in declaration order.
    pub fn join(self, other: State) -> State {
        if self.information_rank() >= other.information_rank() {
            self
        } else {
            other
        }
    }

    fn information_rank(self) -> u8 {
        match self {
            State::Top => 0,
            State::Bottom => 1,
            State::Uninit => 2,
            State::RawReferenced => 3,
            State::RawWrapped => 4,
            State::Used => 5,
            State::Dropped => 6,
            State::UseAfterFreeError => 7,
            State::DoubleFreeError => 8,
            State::TypestateViolation => 9,
        }
    }

    /// True for the two memory-safety findings the engine reports.
    pub fn is_memory_error(self) -> bool {
        self.error_kind().is_some()
    }

    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            State::UseAfterFreeError => Some(ErrorKind::UseAfterFree),
            State::DoubleFreeError => Some(ErrorKind::DoubleFree),
            _ => None,
        }
    }

    /// Error and sentinel states never change once reached.
    pub fn is_absorbing(self) -> bool {
        matches!(
            self,
            State::Bottom
                | State::Top
                | State::UseAfterFreeError
                | State::DoubleFreeError
                | State::TypestateViolation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Bottom => "BOTTOM",
            State::Uninit => "UNINIT",
            State::RawReferenced => "RAW_REFERENCED",
            State::RawWrapped => "RAW_WRAPPED",
            State::Used => "USED",
            State::Dropped => "DROPPED",
            State::UseAfterFreeError => "UAF_ERROR",
            State::DoubleFreeError => "DF_ERROR",
            State::TypestateViolation => "TS_ERROR",
            State::Top => "TOP",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory-safety bug class derived from an error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UseAfterFree,
    DoubleFree,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UseAfterFree => "use-after-free",
            ErrorKind::DoubleFree => "double-free",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join a sequence of states, starting from `Top`.
pub fn join_all(states: impl IntoIterator<Item = State>) -> State {
    states.into_iter().fold(State::Top, State::join)
}
