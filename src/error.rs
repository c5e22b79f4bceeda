use anyhow::Error as AnyhowError;
use thiserror::Error;

use crate::delta::ConstructMode;
use crate::solver::SolverError;

/// Result alias for errors emitted by the analysis engine.
pub type Result<T> = std::result::Result<T, UnsafeDropError>;

/// Structured error type for the engine and its drivers.
#[derive(Debug, Error)]
pub enum UnsafeDropError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed program: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// A solver run failed; the run is abandoned and nothing from it is reported.
    #[error("run with {mode} failed in solver stage `{}`: {source}", source.stage())]
    Solver {
        mode: ConstructMode,
        #[source]
        source: SolverError,
    },

    #[error("{0}")]
    Other(String),
}

impl UnsafeDropError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn solver(mode: ConstructMode, source: SolverError) -> Self {
        Self::Solver { mode, source }
    }
}

impl From<AnyhowError> for UnsafeDropError {
    fn from(err: AnyhowError) -> Self {
        UnsafeDropError::other(err.to_string())
    }
}

/// Convenience macro mirroring `anyhow::bail!` but returning UnsafeDropError.
#[macro_export]
macro_rules! unsafe_drop_bail {
    ($($arg:tt)*) => {
        return Err($crate::error::UnsafeDropError::other(format!($($arg)*)));
    };
}

/// Convenience macro mirroring `anyhow::ensure!`.
#[macro_export]
macro_rules! unsafe_drop_ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::unsafe_drop_bail!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solver_error_names_mode_and_stage() {
        let err = UnsafeDropError::solver(
            ConstructMode::Factory,
            SolverError::UnknownEntryPoint("main".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("unsafe_construct_as_factory=true"), "{msg}");
        assert!(msg.contains("`validate`"), "{msg}");
        assert!(msg.contains("main"), "{msg}");
    }

    #[test]
    fn ensure_macro_returns_other_error() {
        fn check(n: usize) -> Result<()> {
            crate::unsafe_drop_ensure!(n > 0, "expected a positive count, got {n}");
            Ok(())
        }

        assert!(check(1).is_ok());
        let err = check(0).unwrap_err();
        assert!(matches!(err, UnsafeDropError::Other(_)));
        assert_eq!(err.to_string(), "expected a positive count, got 0");
    }
}
