//! Typestate engine for finding use-after-free and double-free bugs around raw
//! pointers extracted from owning containers.
//!
//! The crate classifies call sites into tokens, runs a dataflow solver twice
//! with two construct modes, and reconciles both runs into findings.
//! [`Analyzer`] ties the pieces together.

// Allow patterns that are intentional in this codebase
#![allow(clippy::new_without_default)] // Builders and executors require explicit construction
#![allow(clippy::type_complexity)] // Nested state maps are spelled out in signatures

pub mod classifier;
pub mod cli;
pub mod config;
pub mod delta;
pub mod description;
pub mod error;
pub mod program;
pub mod reconcile;
pub mod report;
pub mod run;
pub mod solver;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use crate::classifier::{Classifier, KnownFunction, KnownFunctions};
use crate::config::UnsafeDropConfig;
use crate::error::{Result, UnsafeDropError};
use crate::program::{DeclarationIndex, Program};
use crate::reconcile::{Finding, ReconcileScope, Reconciler};
use crate::run::{RunExecutor, RunPair, RunSettings, UnfilteredRunPair};

/// Everything an analysis needs besides the program.
#[derive(Debug, Clone, Default)]
pub struct AnalysisSettings {
    pub run: RunSettings,
    pub scope: ReconcileScope,
    /// Extra curated classifier entries.
    pub known: Vec<KnownFunction>,
}

impl AnalysisSettings {
    pub fn from_config(cfg: &UnsafeDropConfig) -> Self {
        Self {
            run: cfg.analysis.run_settings(),
            scope: cfg.reconcile.scope,
            known: cfg.classifier.known.clone(),
        }
    }

    /// Builtin curated table extended with the configured entries.
    pub fn known_functions(&self) -> KnownFunctions {
        KnownFunctions::builtin().with_entries(self.known.iter().cloned())
    }
}

/// Outcome of analysing one program.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub unfiltered: UnfilteredRunPair,
    pub runs: RunPair,
    pub findings: Vec<Finding>,
}

/// Runs both construct modes over a program and reconciles them.
#[derive(Debug, Clone)]
pub struct Analyzer {
    settings: AnalysisSettings,
    known: Arc<KnownFunctions>,
}

impl Analyzer {
    pub fn new(settings: AnalysisSettings) -> Self {
        let known = Arc::new(settings.known_functions());
        Self { settings, known }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Classifier bound to `program`'s declarations.
    pub fn classifier_for(&self, program: &Program) -> Arc<Classifier> {
        Arc::new(Classifier::new(
            self.known.clone(),
            Arc::new(DeclarationIndex::new(program)),
        ))
    }

    pub fn analyze(&self, program: &Program) -> Result<Analysis> {
        if self.settings.run.entry_points.is_empty() {
            return Err(UnsafeDropError::config("no entry points to analyze"));
        }
        let classifier = self.classifier_for(program);
        let executor = RunExecutor::new(program, classifier.clone(), self.settings.run.clone());
        let unfiltered = executor.run_pair_unfiltered()?;
        let runs = executor.filter_pair(unfiltered.clone());
        let findings = Reconciler::new(program, &classifier)
            .with_scope(self.settings.scope)
            .reconcile(&runs.consuming, &runs.factory);
        Ok(Analysis {
            unfiltered,
            runs,
            findings,
        })
    }
}
